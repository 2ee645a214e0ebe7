use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use webrtckit_core::engine::{
    CameraFacing, EngineError, EngineEvent, IceServerConfig, PeerConnectionEngine,
    PeerConnectionState,
};
use webrtckit_core::signaling::{IceCandidate, SessionDescription};
use webrtckit_core::stats::RawStatsEntry;

use super::events::PeerEventBus;

/// Owns the engine's peer connection for the session in progress.
///
/// Engine events are fanned out on [`PeerEventBus`]; subscribe before calling
/// [`initialize`](Self::initialize) to see the first candidates. Remote
/// candidates that arrive before the remote description are held back and
/// applied once it is set.
pub struct PeerConnectionManager {
    engine: Arc<dyn PeerConnectionEngine>,
    events: Arc<PeerEventBus>,
    state: Arc<watch::Sender<PeerConnectionState>>,
    session_id: Mutex<Option<String>>,
    has_remote_description: AtomicBool,
    pending_candidates: Mutex<Vec<IceCandidate>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl PeerConnectionManager {
    pub fn new(engine: Arc<dyn PeerConnectionEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            events: Arc::new(PeerEventBus::new()),
            state: Arc::new(watch::channel(PeerConnectionState::New).0),
            session_id: Mutex::new(None),
            has_remote_description: AtomicBool::new(false),
            pending_candidates: Mutex::new(Vec::new()),
            pump: Mutex::new(None),
        })
    }

    pub fn events(&self) -> &PeerEventBus {
        &self.events
    }

    pub fn engine(&self) -> &Arc<dyn PeerConnectionEngine> {
        &self.engine
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PeerConnectionState> {
        self.state.subscribe()
    }

    pub fn connection_state(&self) -> PeerConnectionState {
        *self.state.borrow()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    /// Creates the peer connection for `session_id`, replacing any previous one.
    pub async fn initialize(
        &self,
        session_id: &str,
        urls: Vec<String>,
        username: &str,
        password: &str,
    ) -> Result<(), EngineError> {
        if let Some(previous) = self.pump.lock().await.take() {
            debug!("Replacing peer connection of a previous session");
            previous.abort();
        }
        self.reset_negotiation().await;

        let ice_servers = vec![IceServerConfig {
            urls,
            username: username.to_string(),
            credential: password.to_string(),
        }];
        let engine_events = self.engine.initialize(session_id, ice_servers).await?;

        *self.session_id.lock().await = Some(session_id.to_string());
        self.state.send_replace(PeerConnectionState::New);
        let pump = tokio::spawn(forward_events(
            engine_events,
            Arc::clone(&self.events),
            Arc::clone(&self.state),
        ));
        *self.pump.lock().await = Some(pump);

        info!("Peer connection initialized for session {session_id}");
        Ok(())
    }

    pub async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.engine.create_offer(false).await
    }

    /// An offer with fresh ICE credentials, for recovering a dropped path.
    pub async fn restart_ice(&self) -> Result<SessionDescription, EngineError> {
        info!("Restarting ICE");
        self.engine.create_offer(true).await
    }

    pub async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.engine.create_answer().await
    }

    pub async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        self.engine.set_local_description(description).await
    }

    /// Applies the remote description, then any candidates held back for it.
    pub async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        self.engine.set_remote_description(description).await?;
        self.has_remote_description.store(true, Ordering::Release);

        let pending = std::mem::take(&mut *self.pending_candidates.lock().await);
        if !pending.is_empty() {
            debug!("Applying {} buffered remote candidates", pending.len());
        }
        for candidate in pending {
            if let Err(e) = self.engine.add_ice_candidate(candidate).await {
                warn!("Dropping buffered remote candidate: {e}");
            }
        }
        Ok(())
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        if !self.has_remote_description.load(Ordering::Acquire) {
            self.pending_candidates.lock().await.push(candidate);
            return Ok(());
        }
        self.engine.add_ice_candidate(candidate).await
    }

    pub async fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().await.len()
    }

    pub async fn start_local_capture(&self) -> Result<(), EngineError> {
        self.engine.start_local_capture().await
    }

    pub async fn stop_local_capture(&self) -> Result<(), EngineError> {
        self.engine.stop_local_capture().await
    }

    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.engine.set_camera_enabled(enabled).await
    }

    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.engine.set_microphone_enabled(enabled).await
    }

    pub async fn switch_camera(&self) -> Result<CameraFacing, EngineError> {
        self.engine.switch_camera().await
    }

    pub async fn collect_stats(&self) -> Result<Vec<RawStatsEntry>, EngineError> {
        self.engine.collect_stats().await
    }

    /// Closes the connection and forgets the session.
    pub async fn close(&self) -> Result<(), EngineError> {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        self.reset_negotiation().await;
        *self.session_id.lock().await = None;
        let closed = self.engine.close().await;
        self.state.send_replace(PeerConnectionState::Closed);
        let _ = self.events.connection_state.send(PeerConnectionState::Closed);
        closed
    }

    /// Waits until the connection reaches `target`; false on timeout or
    /// when the connection closes first.
    pub async fn wait_for_state(&self, target: PeerConnectionState, within: Duration) -> bool {
        let mut state = self.state.subscribe();
        let reached = state.wait_for(|s| {
            *s == target || (*s == PeerConnectionState::Closed && target != PeerConnectionState::Closed)
        });
        match tokio::time::timeout(within, reached).await {
            Ok(Ok(s)) => *s == target,
            _ => false,
        }
    }

    async fn reset_negotiation(&self) {
        self.has_remote_description.store(false, Ordering::Release);
        self.pending_candidates.lock().await.clear();
    }
}

async fn forward_events(
    mut engine_events: mpsc::Receiver<EngineEvent>,
    bus: Arc<PeerEventBus>,
    state: Arc<watch::Sender<PeerConnectionState>>,
) {
    while let Some(event) = engine_events.recv().await {
        // Send errors only mean nobody is subscribed right now.
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                let _ = bus.local_candidate.send(candidate);
            }
            EngineEvent::IceGatheringComplete => {
                debug!(target: "Peer/Events", "ICE gathering complete");
                let _ = bus.ice_gathering_complete.send(());
            }
            EngineEvent::ConnectionState(new_state) => {
                let previous = state.send_replace(new_state);
                if previous != new_state {
                    info!(target: "Peer/Events", "Connection state {previous} -> {new_state}");
                }
                let _ = bus.connection_state.send(new_state);
            }
            EngineEvent::RemoteTrack(kind) => {
                debug!(target: "Peer/Events", "Remote {kind:?} track");
                let _ = bus.remote_track.send(kind);
            }
        }
    }
    debug!(target: "Peer/Events", "Engine event stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockPeerConnectionEngine;
    use webrtckit_core::engine::MediaKind;

    async fn initialized() -> (Arc<MockPeerConnectionEngine>, Arc<PeerConnectionManager>) {
        let engine = Arc::new(MockPeerConnectionEngine::new());
        let manager = PeerConnectionManager::new(engine.clone());
        manager
            .initialize("s1", vec!["stun:stun.example.org".into()], "", "")
            .await
            .unwrap();
        (engine, manager)
    }

    #[tokio::test]
    async fn test_initialize_passes_ice_servers() {
        let (engine, manager) = initialized().await;
        assert_eq!(manager.session_id().await.as_deref(), Some("s1"));
        let servers = engine.ice_servers();
        assert_eq!(servers[0].urls, vec!["stun:stun.example.org".to_string()]);
    }

    #[tokio::test]
    async fn test_engine_events_reach_bus_and_state() {
        let engine = Arc::new(MockPeerConnectionEngine::new());
        let manager = PeerConnectionManager::new(engine.clone());
        let mut candidates = manager.events().local_candidate.subscribe();
        let mut tracks = manager.events().remote_track.subscribe();
        manager.initialize("s1", vec![], "", "").await.unwrap();

        let candidate = IceCandidate::new("candidate:1").with_sdp_m_line_index(0);
        engine
            .emit(EngineEvent::LocalCandidate(candidate.clone()))
            .await;
        engine.emit(EngineEvent::RemoteTrack(MediaKind::Video)).await;
        engine
            .emit(EngineEvent::ConnectionState(PeerConnectionState::Connected))
            .await;

        assert_eq!(candidates.recv().await.unwrap(), candidate);
        assert_eq!(tracks.recv().await.unwrap(), MediaKind::Video);
        assert!(
            manager
                .wait_for_state(PeerConnectionState::Connected, Duration::from_secs(1))
                .await
        );
        assert_eq!(manager.connection_state(), PeerConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_candidates_wait_for_remote_description() {
        let (engine, manager) = initialized().await;
        manager
            .add_ice_candidate(IceCandidate::new("candidate:early"))
            .await
            .unwrap();
        assert_eq!(manager.pending_candidate_count().await, 1);
        assert!(engine.added_candidates().is_empty());

        manager
            .set_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        manager
            .add_ice_candidate(IceCandidate::new("candidate:late"))
            .await
            .unwrap();

        let added: Vec<_> = engine
            .added_candidates()
            .into_iter()
            .map(|c| c.candidate)
            .collect();
        assert_eq!(added, vec!["candidate:early", "candidate:late"]);
        assert_eq!(manager.pending_candidate_count().await, 0);
    }

    #[tokio::test]
    async fn test_restart_ice_requests_restart_offer() {
        let (engine, manager) = initialized().await;
        manager.restart_ice().await.unwrap();
        assert!(engine.calls().contains(&"create_offer(ice_restart)".to_string()));
    }

    #[tokio::test]
    async fn test_close_resets_session() {
        let (engine, manager) = initialized().await;
        manager.close().await.unwrap();
        assert_eq!(manager.connection_state(), PeerConnectionState::Closed);
        assert!(manager.session_id().await.is_none());
        assert!(engine.calls().contains(&"close".to_string()));
        assert!(
            !manager
                .wait_for_state(PeerConnectionState::Connected, Duration::from_millis(50))
                .await
        );
    }
}
