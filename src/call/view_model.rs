use async_trait::async_trait;
use futures_util::FutureExt;
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;
use webrtckit_core::call::{CallControlsState, CallState, CallTransition, CallUiEvent};
use webrtckit_core::engine::{MediaKind, PeerConnectionState};
use webrtckit_core::signaling::{IceCandidate, OfferMessage, SessionDescription, SignalingError};

use super::CallError;
use crate::background::SessionLifecycle;
use crate::config::KitConfig;
use crate::peer::PeerConnectionManager;
use crate::reconnect::{
    FailureType, ReconnectionManager, ReconnectionState, ReconnectionStrategy,
};
use crate::signaling::SignalingRepository;
use crate::stats::{RtcStatsCollector, RtcStatsReport};
use crate::turn::TurnCredentialService;
use crate::usecase::{
    AddIceCandidateUseCase, AnswerCallUseCase, CreateOfferUseCase, EndCallUseCase,
};

pub const REMOTE_HANGUP_REASON: &str = "Remote hangup";
pub const CONNECTION_FAILED_MESSAGE: &str = "Connection failed";

/// How long a reconnection attempt waits for the connection to come back.
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which side of the call this peer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CallRole {
    Caller,
    Callee,
}

/// Everything a UI renders for the current call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallViewState {
    pub call: CallState,
    pub controls: CallControlsState,
    pub session_id: Option<String>,
    pub role: Option<CallRole>,
}

/// Coordinates one call at a time between the UI, signaling and the peer
/// connection.
///
/// UI intents go through [`on_event`](Self::on_event) and are handled one at
/// a time. Signaling and engine events are followed by background tasks that
/// live as long as the session; they are aborted when the call ends and when
/// the view model is dropped.
pub struct CallViewModel {
    inner: Arc<Inner>,
}

struct Inner {
    user_id: String,
    enable_local_capture: bool,
    auto_reconnect: bool,
    peer: Arc<PeerConnectionManager>,
    signaling: Arc<dyn SignalingRepository>,
    create_offer: CreateOfferUseCase,
    answer_call: AnswerCallUseCase,
    ice_candidates: AddIceCandidateUseCase,
    end_call: EndCallUseCase,
    reconnection: ReconnectionManager,
    stats: RtcStatsCollector,
    state: watch::Sender<CallViewState>,
    ops: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    remote_user: Mutex<Option<String>>,
    resume_target: Mutex<Option<String>>,
}

/// Peer event receivers taken before a use case runs, so nothing emitted
/// during negotiation is missed.
struct PeerSubscriptions {
    local_candidates: broadcast::Receiver<IceCandidate>,
    connection: broadcast::Receiver<PeerConnectionState>,
    remote_tracks: broadcast::Receiver<MediaKind>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn next_event<T: Clone>(rx: &mut broadcast::Receiver<T>, what: &str) -> Option<T> {
    loop {
        match rx.recv().await {
            Ok(value) => return Some(value),
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "ViewModel", "Missed {skipped} {what} events");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

impl CallViewModel {
    pub fn new(
        config: &KitConfig,
        peer: Arc<PeerConnectionManager>,
        signaling: Arc<dyn SignalingRepository>,
        credentials: Arc<dyn TurnCredentialService>,
    ) -> Self {
        let inner = Inner {
            user_id: config.user_id.clone(),
            enable_local_capture: config.enable_local_capture,
            auto_reconnect: config.auto_reconnect,
            create_offer: CreateOfferUseCase::new(
                Arc::clone(&peer),
                Arc::clone(&signaling),
                Arc::clone(&credentials),
            ),
            answer_call: AnswerCallUseCase::new(
                Arc::clone(&peer),
                Arc::clone(&signaling),
                credentials,
            ),
            ice_candidates: AddIceCandidateUseCase::new(Arc::clone(&peer), Arc::clone(&signaling)),
            end_call: EndCallUseCase::new(Arc::clone(&peer), Arc::clone(&signaling)),
            reconnection: ReconnectionManager::new(),
            stats: RtcStatsCollector::new(Arc::clone(&peer), config.stats_interval()),
            state: watch::channel(CallViewState::default()).0,
            ops: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
            remote_user: Mutex::new(None),
            resume_target: Mutex::new(None),
            peer,
            signaling,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CallViewState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> CallViewState {
        self.inner.state.borrow().clone()
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn peer(&self) -> &Arc<PeerConnectionManager> {
        &self.inner.peer
    }

    pub fn stats(&self) -> watch::Receiver<Option<RtcStatsReport>> {
        self.inner.stats.subscribe()
    }

    pub fn reconnection(&self) -> &ReconnectionManager {
        &self.inner.reconnection
    }

    /// Offers addressed to this user, for the host to offer as incoming calls.
    pub async fn watch_incoming_calls(&self) -> Result<mpsc::Receiver<OfferMessage>, SignalingError> {
        self.inner
            .signaling
            .observe_incoming_offers(&self.inner.user_id)
            .await
    }

    pub async fn on_event(&self, event: CallUiEvent) {
        let inner = &self.inner;
        let _op = inner.ops.lock().await;
        debug!(target: "ViewModel", "Handling {event:?}");
        match event {
            CallUiEvent::StartCall(target) => inner.start_call(target).await,
            CallUiEvent::AnswerCall(offer) => inner.answer_call(offer).await,
            CallUiEvent::EndCall => inner.end_call().await,
            CallUiEvent::ToggleCamera(enabled) => match inner.peer.set_camera_enabled(enabled).await {
                Ok(()) => inner.state.send_modify(|s| {
                    s.controls.is_camera_enabled = enabled;
                    s.controls.is_local_video_visible = enabled;
                }),
                Err(e) => inner.fail(format!("Failed to toggle camera: {e}")),
            },
            CallUiEvent::ToggleMicrophone(enabled) => {
                match inner.peer.set_microphone_enabled(enabled).await {
                    Ok(()) => inner
                        .state
                        .send_modify(|s| s.controls.is_microphone_enabled = enabled),
                    Err(e) => warn!(target: "ViewModel", "Failed to toggle microphone: {e}"),
                }
            }
            CallUiEvent::SwitchCamera => match inner.peer.switch_camera().await {
                Ok(facing) => info!(target: "ViewModel", "Switched to {facing:?} camera"),
                Err(e) => warn!(target: "ViewModel", "Failed to switch camera: {e}"),
            },
            CallUiEvent::ToggleSpeaker(enabled) => inner
                .state
                .send_modify(|s| s.controls.is_speaker_enabled = enabled),
            CallUiEvent::DismissError => {
                if matches!(inner.state.borrow().call, CallState::Error(_)) {
                    inner.transition(CallTransition::DismissError);
                }
            }
        }
    }

    /// Stops every background task of the current session.
    pub async fn shutdown(&self) {
        self.inner.abort_tasks();
        self.inner.stats.stop().await;
    }
}

impl Drop for CallViewModel {
    fn drop(&mut self) {
        self.inner.abort_tasks();
    }
}

#[async_trait]
impl SessionLifecycle for CallViewModel {
    async fn cleanup_session(&self) {
        let target = lock(&self.inner.remote_user).clone();
        if !self.inner.state.borrow().call.is_active() {
            return;
        }
        self.on_event(CallUiEvent::EndCall).await;
        if self.inner.state.borrow().call.can_dial() {
            *lock(&self.inner.resume_target) = target;
        }
    }

    async fn resume_session(&self) {
        let Some(target) = lock(&self.inner.resume_target).take() else {
            return;
        };
        info!(target: "ViewModel", "Calling {target} again after background cleanup");
        self.on_event(CallUiEvent::StartCall(target)).await;
    }
}

impl Inner {
    /// Applies `transition`, leaving the state alone if the call is not in
    /// a state that accepts it.
    fn transition(&self, transition: CallTransition) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|s| match s.call.next(transition) {
            Ok(next) => {
                applied = true;
                let changed = next != s.call;
                if changed {
                    debug!(target: "ViewModel", "Call state {:?} -> {next:?}", s.call);
                }
                s.call = next;
                changed
            }
            Err(e) => {
                debug!(target: "ViewModel", "Ignoring {e}");
                false
            }
        });
        applied
    }

    fn fail(&self, message: String) {
        error!(target: "ViewModel", "{message}");
        self.transition(CallTransition::Failed(message));
    }

    fn is_current(&self, session_id: &str) -> bool {
        self.state.borrow().session_id.as_deref() == Some(session_id)
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn abort_tasks(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    fn subscribe_peer(&self) -> PeerSubscriptions {
        let events = self.peer.events();
        PeerSubscriptions {
            local_candidates: events.local_candidate.subscribe(),
            connection: events.connection_state.subscribe(),
            remote_tracks: events.remote_track.subscribe(),
        }
    }

    /// Drops whatever the previous session left running and records the new
    /// one.
    async fn begin_session(&self, session_id: &str, role: CallRole, remote_user: &str) {
        self.abort_tasks();
        self.stats.stop().await;
        self.reconnection.reset();
        *lock(&self.remote_user) = Some(remote_user.to_string());
        lock(&self.resume_target).take();
        self.state.send_modify(|s| {
            s.session_id = Some(session_id.to_string());
            s.role = Some(role);
            s.controls.connection_duration = 0;
            s.controls.local_ice_candidates = 0;
            s.controls.remote_ice_candidates = 0;
            s.controls.is_remote_video_visible = false;
        });
    }

    async fn abandon_session(&self) {
        if self.peer.session_id().await.is_some() {
            if let Err(e) = self.peer.close().await {
                debug!(target: "ViewModel", "Closing abandoned peer connection: {e}");
            }
        }
        self.state.send_modify(|s| {
            s.session_id = None;
            s.role = None;
        });
    }

    async fn start_call(self: &Arc<Self>, target: String) {
        if !self.transition(CallTransition::Dial) {
            warn!(target: "ViewModel", "Cannot start a call in state {:?}", self.state.borrow().call);
            return;
        }
        let session_id = Uuid::new_v4().to_string();
        self.begin_session(&session_id, CallRole::Caller, &target).await;
        let subscriptions = self.subscribe_peer();

        match self
            .create_offer
            .execute(&session_id, &self.user_id, &target, self.enable_local_capture)
            .await
        {
            Ok(_) => {
                info!(target: "ViewModel", "Calling {target} in session {session_id}");
                self.transition(CallTransition::OfferSent(session_id.clone()));
                self.start_observers(&session_id, subscriptions, None);
            }
            Err(e) => {
                self.fail(format!("Failed to start call: {e}"));
                self.abandon_session().await;
            }
        }
    }

    async fn answer_call(self: &Arc<Self>, offer: OfferMessage) {
        if !self.transition(CallTransition::Dial) {
            warn!(target: "ViewModel", "Cannot answer a call in state {:?}", self.state.borrow().call);
            return;
        }
        let session_id = offer.session_id.clone();
        self.begin_session(&session_id, CallRole::Callee, &offer.caller_id)
            .await;
        let subscriptions = self.subscribe_peer();

        match self
            .answer_call
            .execute(&offer, &self.user_id, self.enable_local_capture)
            .await
        {
            Ok(_) => {
                self.transition(CallTransition::Answered(session_id.clone()));
                self.start_observers(&session_id, subscriptions, Some(offer));
            }
            Err(e) => {
                self.fail(format!("Failed to answer call: {e}"));
                self.abandon_session().await;
            }
        }
    }

    async fn end_call(&self) {
        let Some(session_id) = self.state.borrow().session_id.clone() else {
            debug!(target: "ViewModel", "No session to end");
            return;
        };
        if !self.transition(CallTransition::Hangup) {
            return;
        }
        self.abort_tasks();
        self.stats.stop().await;

        match self.end_call.execute(&session_id, &self.user_id, true).await {
            Ok(()) => {
                self.transition(CallTransition::Finished(None));
                self.state.send_modify(|s| {
                    s.controls = CallControlsState::default();
                    s.session_id = None;
                    s.role = None;
                });
            }
            Err(e) => {
                self.fail(format!("Failed to end call: {e}"));
                self.abandon_session().await;
            }
        }
    }

    fn start_observers(
        self: &Arc<Self>,
        session_id: &str,
        subscriptions: PeerSubscriptions,
        answered_offer: Option<OfferMessage>,
    ) {
        let sid = session_id.to_string();
        let PeerSubscriptions {
            local_candidates,
            connection,
            remote_tracks,
        } = subscriptions;

        let negotiation = match answered_offer {
            None => tokio::spawn(Arc::clone(self).apply_answers(sid.clone())),
            Some(offer) => tokio::spawn(Arc::clone(self).answer_renegotiations(offer)),
        };
        let tasks = [
            tokio::spawn(Arc::clone(self).signal_local_candidates(sid.clone(), local_candidates)),
            tokio::spawn(Arc::clone(self).apply_remote_candidates(sid.clone())),
            tokio::spawn(Arc::clone(self).follow_connection_state(sid.clone(), connection)),
            tokio::spawn(Arc::clone(self).follow_remote_tracks(sid.clone(), remote_tracks)),
            tokio::spawn(Arc::clone(self).watch_remote_hangup(sid.clone())),
            tokio::spawn(Arc::clone(self).track_duration(sid)),
            negotiation,
        ];
        lock(&self.tasks).extend(tasks);
    }

    async fn signal_local_candidates(
        self: Arc<Self>,
        session_id: String,
        mut candidates: broadcast::Receiver<IceCandidate>,
    ) {
        while let Some(candidate) = next_event(&mut candidates, "local candidate").await {
            if candidate.candidate.is_empty() || !self.is_current(&session_id) {
                continue;
            }
            let candidate_id = Uuid::new_v4().to_string();
            match self
                .ice_candidates
                .signal_local(&session_id, &candidate_id, &candidate)
                .await
            {
                Ok(()) => self
                    .state
                    .send_modify(|s| s.controls.local_ice_candidates += 1),
                Err(e) => warn!(target: "ViewModel/Ice", "Failed to signal local candidate: {e}"),
            }
        }
    }

    async fn apply_remote_candidates(self: Arc<Self>, session_id: String) {
        let mut candidates = match self.signaling.observe_ice_candidates(&session_id).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(target: "ViewModel/Ice", "Cannot observe remote candidates: {e}");
                return;
            }
        };
        while let Some(candidate) = candidates.recv().await {
            if !self.is_current(&session_id) {
                break;
            }
            match self.ice_candidates.add_remote(candidate).await {
                Ok(()) => self
                    .state
                    .send_modify(|s| s.controls.remote_ice_candidates += 1),
                Err(e) => {
                    self.fail(format!("ICE candidate error: {e}"));
                    break;
                }
            }
        }
        trace!(target: "ViewModel/Ice", "Remote candidates for {session_id} ended");
    }

    /// Caller side: the first answer connects the call, later ones belong to
    /// renegotiations.
    async fn apply_answers(self: Arc<Self>, session_id: String) {
        let mut answers = match self.signaling.observe_answer(&session_id).await {
            Ok(rx) => rx,
            Err(e) => {
                self.fail(format!("Failed to start call: {e}"));
                return;
            }
        };
        let mut answered = false;
        while let Some(answer) = answers.recv().await {
            if !self.is_current(&session_id) {
                break;
            }
            let applied = self
                .peer
                .set_remote_description(SessionDescription::answer(answer.sdp))
                .await;
            match applied {
                Ok(()) if !answered => {
                    answered = true;
                    info!(target: "ViewModel/Signaling", "{} answered session {session_id}", answer.callee_id);
                    self.transition(CallTransition::AnswerReceived(session_id.clone()));
                }
                Ok(()) => debug!(target: "ViewModel/Signaling", "Applied renegotiated answer"),
                Err(e) if !answered => {
                    self.fail(format!("Failed to apply answer: {e}"));
                    break;
                }
                Err(e) => warn!(target: "ViewModel/Signaling", "Ignoring renegotiated answer: {e}"),
            }
        }
    }

    /// Callee side: answers offers that follow the one that started the
    /// call, such as ICE restarts from the caller.
    async fn answer_renegotiations(self: Arc<Self>, answered: OfferMessage) {
        let session_id = answered.session_id.clone();
        let mut offers = match self.signaling.observe_offer(&session_id).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(target: "ViewModel/Signaling", "Cannot observe re-offers: {e}");
                return;
            }
        };
        while let Some(offer) = offers.recv().await {
            if offer.timestamp == answered.timestamp && offer.sdp == answered.sdp {
                continue;
            }
            if !self.is_current(&session_id) {
                break;
            }
            info!(target: "ViewModel/Signaling", "Renegotiating session {session_id}");
            if let Err(e) = self.answer_call.renegotiate(&offer, &self.user_id).await {
                warn!(target: "ViewModel/Signaling", "Renegotiation failed ({e}), answering on a new connection");
                if let Err(e) = self
                    .answer_call
                    .execute(&offer, &self.user_id, self.enable_local_capture)
                    .await
                {
                    warn!(target: "ViewModel/Signaling", "Could not answer re-offer: {e}");
                }
            }
        }
    }

    async fn follow_connection_state(
        self: Arc<Self>,
        session_id: String,
        mut states: broadcast::Receiver<PeerConnectionState>,
    ) {
        while let Some(state) = next_event(&mut states, "connection state").await {
            if !self.is_current(&session_id) {
                break;
            }
            match state {
                PeerConnectionState::Connected => {
                    self.transition(CallTransition::MediaConnected(session_id.clone()));
                    if !self.reconnection.is_reconnecting() {
                        self.reconnection.handle_reconnection_success();
                    }
                    self.stats.start().await;
                }
                PeerConnectionState::Disconnected if self.auto_reconnect => {
                    self.spawn_reconnect(&session_id, FailureType::Minor);
                }
                PeerConnectionState::Failed if self.auto_reconnect => {
                    self.spawn_reconnect(&session_id, FailureType::Major);
                }
                PeerConnectionState::Disconnected => {
                    self.spawn_teardown(session_id.clone(), CallTransition::ConnectionLost);
                }
                PeerConnectionState::Failed => {
                    self.reconnection
                        .handle_failure(FailureType::Fatal, |_| async { Ok(()) }.boxed())
                        .await;
                    self.spawn_teardown(
                        session_id.clone(),
                        CallTransition::Failed(CONNECTION_FAILED_MESSAGE.to_string()),
                    );
                }
                PeerConnectionState::New
                | PeerConnectionState::Connecting
                | PeerConnectionState::Closed => {}
            }
        }
    }

    async fn follow_remote_tracks(
        self: Arc<Self>,
        session_id: String,
        mut tracks: broadcast::Receiver<MediaKind>,
    ) {
        while let Some(kind) = next_event(&mut tracks, "remote track").await {
            if kind == MediaKind::Video && self.is_current(&session_id) {
                self.state
                    .send_modify(|s| s.controls.is_remote_video_visible = true);
            }
        }
    }

    async fn watch_remote_hangup(self: Arc<Self>, session_id: String) {
        let mut hangups = match self.signaling.observe_hangup(&session_id).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(target: "ViewModel/Signaling", "Cannot observe hangups: {e}");
                return;
            }
        };
        while let Some(hangup) = hangups.recv().await {
            if hangup.user_id == self.user_id {
                continue;
            }
            info!(target: "ViewModel/Signaling", "{} hung up session {session_id}", hangup.user_id);
            let reason = hangup
                .reason
                .unwrap_or_else(|| REMOTE_HANGUP_REASON.to_string());
            self.spawn_teardown(session_id, CallTransition::Finished(Some(reason)));
            return;
        }
    }

    async fn track_duration(self: Arc<Self>, session_id: String) {
        let every = Duration::from_secs(1);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            ticker.tick().await;
            let counted = self.state.send_if_modified(|s| {
                if s.session_id.as_deref() != Some(session_id.as_str()) || !s.call.is_active() {
                    return false;
                }
                s.controls.connection_duration += 1;
                true
            });
            if counted {
                trace!(target: "ViewModel/Duration", "Call duration {}", self.state.borrow().controls.formatted_duration());
            }
        }
    }

    fn spawn_reconnect(self: &Arc<Self>, session_id: &str, failure: FailureType) {
        if self.reconnection.is_reconnecting() {
            debug!(target: "ViewModel", "Reconnection already running, ignoring {failure:?}");
            return;
        }
        let inner = Arc::clone(self);
        let session_id = session_id.to_string();
        let task = tokio::spawn(async move {
            let outcome = inner
                .reconnection
                .handle_failure(failure, |strategy| {
                    Arc::clone(&inner)
                        .reconnect_attempt(session_id.clone(), strategy)
                        .boxed()
                })
                .await;
            if outcome == ReconnectionState::Failed {
                inner.spawn_teardown(
                    session_id,
                    CallTransition::Failed(CONNECTION_FAILED_MESSAGE.to_string()),
                );
            }
        });
        self.track(task);
    }

    /// The caller re-offers; the callee waits for the caller's re-offer to
    /// bring the connection back.
    async fn reconnect_attempt(
        self: Arc<Self>,
        session_id: String,
        strategy: ReconnectionStrategy,
    ) -> Result<(), CallError> {
        if !self.is_current(&session_id) {
            return Err(CallError::NoActiveSession);
        }
        let role = self.state.borrow().role;
        if role == Some(CallRole::Caller) {
            let Some(remote_user) = lock(&self.remote_user).clone() else {
                return Err(CallError::NoActiveSession);
            };
            match strategy {
                ReconnectionStrategy::IceRestart => {
                    self.create_offer
                        .execute_ice_restart(&session_id, &self.user_id, &remote_user)
                        .await?;
                }
                ReconnectionStrategy::FullReconnection => {
                    self.create_offer
                        .execute(
                            &session_id,
                            &self.user_id,
                            &remote_user,
                            self.enable_local_capture,
                        )
                        .await?;
                }
            }
        }

        if self
            .peer
            .wait_for_state(PeerConnectionState::Connected, RECONNECT_TIMEOUT)
            .await
        {
            Ok(())
        } else {
            Err(CallError::ReconnectTimeout)
        }
    }

    /// Ends `session_id` without a hangup from a task that is not one of the
    /// session's own, since those get aborted here.
    fn spawn_teardown(self: &Arc<Self>, session_id: String, transition: CallTransition) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _op = inner.ops.lock().await;
            if !inner.is_current(&session_id) {
                return;
            }
            inner.transition(transition);
            inner.abort_tasks();
            inner.stats.stop().await;
            if let Err(e) = inner.end_call.execute(&session_id, &inner.user_id, false).await {
                warn!(target: "ViewModel", "Teardown of {session_id} failed: {e}");
            }
            inner.state.send_modify(|s| {
                s.session_id = None;
                s.role = None;
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::MemorySignalingStore;
    use crate::test_utils::{
        MOCK_ANSWER_SDP, MOCK_OFFER_SDP, MockPeerConnectionEngine, MockTurnCredentialService,
    };
    use crate::turn::TurnCredentialError;
    use webrtckit_core::engine::EngineEvent;
    use webrtckit_core::signaling::{AnswerMessage, HangupMessage, now_millis};

    struct Harness {
        engine: Arc<MockPeerConnectionEngine>,
        store: Arc<MemorySignalingStore>,
        vm: CallViewModel,
    }

    fn harness_with(
        engine: MockPeerConnectionEngine,
        credentials: MockTurnCredentialService,
    ) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let engine = Arc::new(engine);
        let store = MemorySignalingStore::new();
        let config = KitConfig {
            user_id: "alice".to_string(),
            ..KitConfig::default()
        };
        let vm = CallViewModel::new(
            &config,
            PeerConnectionManager::new(engine.clone()),
            Arc::new(store.repository()),
            Arc::new(credentials),
        );
        Harness { engine, store, vm }
    }

    fn harness() -> Harness {
        harness_with(MockPeerConnectionEngine::new(), MockTurnCredentialService::new())
    }

    async fn wait_for_call(vm: &CallViewModel, pred: impl Fn(&CallState) -> bool) -> CallViewState {
        let mut rx = vm.subscribe();
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(&s.call)))
            .await
            .expect("timed out waiting for call state")
            .expect("view model dropped");
        state.clone()
    }

    async fn start(h: &Harness) -> String {
        h.vm.on_event(CallUiEvent::StartCall("bob".into())).await;
        let state = h.vm.state();
        assert!(matches!(state.call, CallState::WaitingForAnswer(_)));
        state.session_id.unwrap()
    }

    #[tokio::test]
    async fn test_start_call_sends_offer_and_waits() {
        let h = harness();
        let sid = start(&h).await;

        let state = h.vm.state();
        assert_eq!(state.call, CallState::WaitingForAnswer(sid.clone()));
        assert_eq!(state.role, Some(CallRole::Caller));
        assert!(Uuid::parse_str(&sid).is_ok());
        assert!(h.store.contains_session(&sid));
        assert!(h.engine.is_capturing());
    }

    #[tokio::test]
    async fn test_start_call_failure_then_dismiss() {
        let h = harness_with(
            MockPeerConnectionEngine::new(),
            MockTurnCredentialService::new().failing_with(TurnCredentialError::Timeout),
        );
        h.vm.on_event(CallUiEvent::StartCall("bob".into())).await;
        assert_eq!(
            h.vm.state().call,
            CallState::Error("Failed to start call: TURN credential request timed out".into())
        );
        assert!(h.vm.state().session_id.is_none());

        // A failed call blocks dialing until dismissed.
        h.vm.on_event(CallUiEvent::StartCall("bob".into())).await;
        assert!(matches!(h.vm.state().call, CallState::Error(_)));

        h.vm.on_event(CallUiEvent::DismissError).await;
        assert_eq!(h.vm.state().call, CallState::Idle);
    }

    #[tokio::test]
    async fn test_answer_connects_caller() {
        let h = harness();
        let sid = start(&h).await;

        h.store
            .repository()
            .send_answer(AnswerMessage {
                session_id: sid.clone(),
                sdp: MOCK_ANSWER_SDP.to_string(),
                callee_id: "bob".into(),
                timestamp: now_millis(),
            })
            .await
            .unwrap();

        let state = wait_for_call(&h.vm, CallState::is_connected).await;
        assert_eq!(state.call, CallState::Connected(sid));
        assert_eq!(
            h.engine.remote_description().unwrap().sdp,
            MOCK_ANSWER_SDP
        );
    }

    #[tokio::test]
    async fn test_local_candidates_are_signaled_and_counted() {
        let h = harness_with(
            MockPeerConnectionEngine::new().with_auto_connect(),
            MockTurnCredentialService::new(),
        );
        let sid = start(&h).await;

        let mut rx = h.vm.subscribe();
        rx.wait_for(|s| s.controls.local_ice_candidates == 1)
            .await
            .unwrap();
        assert_eq!(h.store.candidate_count(&sid), 1);
    }

    #[tokio::test]
    async fn test_disconnect_ends_call() {
        let h = harness();
        let sid = start(&h).await;

        h.engine
            .emit(EngineEvent::ConnectionState(PeerConnectionState::Disconnected))
            .await;
        wait_for_call(&h.vm, CallState::is_terminal).await;
        assert_eq!(
            h.vm.state().call,
            CallState::Ended(Some("Connection lost".into()))
        );

        let mut rx = h.vm.subscribe();
        rx.wait_for(|s| s.session_id.is_none()).await.unwrap();
        assert!(!h.store.contains_session(&sid));
    }

    #[tokio::test]
    async fn test_failed_connection_without_auto_reconnect() {
        let h = harness();
        start(&h).await;

        h.engine
            .emit(EngineEvent::ConnectionState(PeerConnectionState::Failed))
            .await;
        let state = wait_for_call(&h.vm, CallState::is_terminal).await;
        assert_eq!(state.call, CallState::Error("Connection failed".into()));
        assert_eq!(h.vm.reconnection().state(), ReconnectionState::Failed);
    }

    #[tokio::test]
    async fn test_remote_hangup_ends_call() {
        let h = harness();
        let sid = start(&h).await;

        h.store
            .repository()
            .send_hangup(HangupMessage {
                session_id: sid,
                user_id: "bob".into(),
                reason: None,
                timestamp: now_millis(),
            })
            .await
            .unwrap();

        let state = wait_for_call(&h.vm, CallState::is_terminal).await;
        assert_eq!(state.call, CallState::Ended(Some("Remote hangup".into())));
    }

    #[tokio::test]
    async fn test_end_call_sends_hangup_and_resets() {
        let h = harness();
        let sid = start(&h).await;
        let observer = h.store.repository();
        let mut hangups = observer.observe_hangup(&sid).await.unwrap();
        h.vm.on_event(CallUiEvent::ToggleSpeaker(true)).await;

        h.vm.on_event(CallUiEvent::EndCall).await;
        let state = h.vm.state();
        assert_eq!(state.call, CallState::Ended(None));
        assert_eq!(state.controls, CallControlsState::default());
        assert!(state.session_id.is_none());

        let hangup = hangups.recv().await.unwrap();
        assert_eq!(hangup.user_id, "alice");
        assert_eq!(hangup.reason.as_deref(), Some("user_ended"));
        assert!(!h.store.contains_session(&sid));
    }

    #[tokio::test]
    async fn test_end_call_survives_capture_stop_failure() {
        let h = harness();
        let sid = start(&h).await;
        let observer = h.store.repository();
        let mut hangups = observer.observe_hangup(&sid).await.unwrap();
        h.engine.fail_on("stop_local_capture");

        h.vm.on_event(CallUiEvent::EndCall).await;
        let state = h.vm.state();
        assert_eq!(state.call, CallState::Ended(None));
        assert!(state.session_id.is_none());
        assert_eq!(hangups.recv().await.unwrap().user_id, "alice");
        assert_eq!(h.engine.call_count("close"), 1);
        assert!(h.vm.peer().session_id().await.is_none());
        assert!(!h.store.contains_session(&sid));
    }

    #[tokio::test]
    async fn test_end_call_without_session_is_ignored() {
        let h = harness();
        h.vm.on_event(CallUiEvent::EndCall).await;
        assert_eq!(h.vm.state().call, CallState::Idle);
        assert!(h.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_media_toggles() {
        let h = harness();
        h.vm.on_event(CallUiEvent::ToggleCamera(false)).await;
        h.vm.on_event(CallUiEvent::ToggleMicrophone(false)).await;
        let controls = h.vm.state().controls;
        assert!(!controls.is_camera_enabled);
        assert!(!controls.is_local_video_visible);
        assert!(!controls.is_microphone_enabled);
        assert!(!h.engine.camera_enabled());

        h.engine.fail_on("set_camera_enabled");
        h.vm.on_event(CallUiEvent::ToggleCamera(true)).await;
        assert_eq!(
            h.vm.state().call,
            CallState::Error("Failed to toggle camera: engine error: set_camera_enabled failed".into())
        );
    }

    #[tokio::test]
    async fn test_remote_video_track_shows_remote_video() {
        let h = harness();
        start(&h).await;
        h.engine.emit(EngineEvent::RemoteTrack(MediaKind::Audio)).await;
        h.engine.emit(EngineEvent::RemoteTrack(MediaKind::Video)).await;

        let mut rx = h.vm.subscribe();
        rx.wait_for(|s| s.controls.is_remote_video_visible)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_counts_while_active() {
        let h = harness();
        start(&h).await;
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(h.vm.state().controls.connection_duration, 3);

        h.vm.on_event(CallUiEvent::EndCall).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.vm.state().controls.connection_duration, 0);
    }

    #[tokio::test]
    async fn test_callee_answers_reoffer_on_new_connection_when_renegotiation_fails() {
        let h = harness();
        let caller = h.store.repository();
        let offer = OfferMessage {
            session_id: "s-in".into(),
            sdp: MOCK_OFFER_SDP.to_string(),
            caller_id: "bob".into(),
            callee_id: "alice".into(),
            timestamp: 1,
        };
        caller.send_offer(offer.clone()).await.unwrap();
        let mut answers = caller.observe_answer("s-in").await.unwrap();

        h.vm.on_event(CallUiEvent::AnswerCall(offer)).await;
        assert_eq!(h.vm.state().role, Some(CallRole::Callee));
        h.engine
            .emit(EngineEvent::ConnectionState(PeerConnectionState::Connected))
            .await;
        wait_for_call(&h.vm, CallState::is_connected).await;
        assert_eq!(answers.recv().await.unwrap().callee_id, "alice");

        // Answers are keyed by timestamp and SDP; keep the next one apart.
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.engine.fail_once("set_remote_description");
        caller
            .send_offer(OfferMessage {
                session_id: "s-in".into(),
                sdp: format!("{MOCK_OFFER_SDP}a=ice-options:renomination\r\n"),
                caller_id: "bob".into(),
                callee_id: "alice".into(),
                timestamp: 2,
            })
            .await
            .unwrap();

        let second = tokio::time::timeout(Duration::from_secs(5), answers.recv())
            .await
            .expect("timed out waiting for the second answer")
            .unwrap();
        assert_eq!(second.sdp, MOCK_ANSWER_SDP);
        assert_eq!(h.engine.call_count("initialize"), 2);
        assert_eq!(h.engine.call_count("set_remote_description"), 3);
        assert_eq!(h.vm.state().call, CallState::Connected("s-in".into()));
    }
}
