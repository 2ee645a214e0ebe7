use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use log::{debug, trace, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use webrtckit_core::signaling::{
    AnswerMessage, HangupMessage, IceCandidate, IceCandidateMessage, OfferMessage,
    SignalingError, SignalingMessage,
};

use super::repository::SignalingRepository;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const OBSERVER_CHANNEL_CAPACITY: usize = 64;

/// One call's state on the signaling side.
#[derive(Debug, Clone, Default)]
struct SessionDocument {
    offer: Option<OfferMessage>,
    answer: Option<AnswerMessage>,
    hangup: Option<HangupMessage>,
    /// Insertion ordered `(candidate id, candidate)` pairs.
    ice_candidates: Vec<(String, IceCandidateMessage)>,
}

impl SessionDocument {
    /// The document replayed as the events that built it.
    fn replay(&self, session_id: &str) -> Vec<StoreEvent> {
        let mut events = Vec::with_capacity(self.ice_candidates.len() + 3);
        if let Some(offer) = &self.offer {
            events.push(StoreEvent::Offer(offer.clone()));
        }
        if let Some(answer) = &self.answer {
            events.push(StoreEvent::Answer(answer.clone()));
        }
        for (candidate_id, message) in &self.ice_candidates {
            events.push(StoreEvent::Candidate {
                candidate_id: candidate_id.clone(),
                message: message.clone(),
            });
        }
        if let Some(hangup) = &self.hangup {
            events.push(StoreEvent::Hangup(hangup.clone()));
        }
        trace!("Replaying {} events for session {}", events.len(), session_id);
        events
    }
}

#[derive(Debug, Clone)]
enum StoreEvent {
    Offer(OfferMessage),
    Answer(AnswerMessage),
    Candidate {
        candidate_id: String,
        message: IceCandidateMessage,
    },
    Hangup(HangupMessage),
    Deleted(String),
}

impl StoreEvent {
    fn session_id(&self) -> &str {
        match self {
            Self::Offer(m) => &m.session_id,
            Self::Answer(m) => &m.session_id,
            Self::Candidate { message, .. } => &message.session_id,
            Self::Hangup(m) => &m.session_id,
            Self::Deleted(sid) => sid,
        }
    }
}

/// In-process signaling backend holding one document per session.
///
/// Offers and answers overwrite the previous value (renegotiation), ICE
/// candidates accumulate, and deleting a session ends every observer of it.
#[derive(Debug)]
pub struct MemorySignalingStore {
    sessions: DashMap<String, SessionDocument>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemorySignalingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        })
    }

    /// A repository handle; candidates it sends are not echoed back to it.
    pub fn repository(self: &Arc<Self>) -> MemorySignalingRepository {
        MemorySignalingRepository {
            store: Arc::clone(self),
            own_candidates: Arc::new(DashSet::new()),
        }
    }

    pub fn contains_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn candidate_count(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map_or(0, |doc| doc.ice_candidates.len())
    }

    /// Stores `message` in its session document and notifies observers.
    ///
    /// A candidate without an id is keyed by its candidate line.
    pub fn apply(&self, message: SignalingMessage, candidate_id: Option<String>) {
        let session_id = message.session_id().to_string();
        let event = {
            let mut doc = self.sessions.entry(session_id.clone()).or_default();
            match message {
                SignalingMessage::Offer(offer) => {
                    doc.offer = Some(offer.clone());
                    StoreEvent::Offer(offer)
                }
                SignalingMessage::Answer(answer) => {
                    doc.answer = Some(answer.clone());
                    StoreEvent::Answer(answer)
                }
                SignalingMessage::IceCandidate(candidate) => {
                    let candidate_id =
                        candidate_id.unwrap_or_else(|| candidate.sdp_candidate.clone());
                    if doc.ice_candidates.iter().any(|(id, _)| *id == candidate_id) {
                        trace!("Candidate {candidate_id} already stored for {session_id}");
                        return;
                    }
                    doc.ice_candidates
                        .push((candidate_id.clone(), candidate.clone()));
                    StoreEvent::Candidate {
                        candidate_id,
                        message: candidate,
                    }
                }
                SignalingMessage::Hangup(hangup) => {
                    doc.hangup = Some(hangup.clone());
                    StoreEvent::Hangup(hangup)
                }
                SignalingMessage::TurnCredential(_) => {
                    debug!("Ignoring turn-credential message for session {session_id}");
                    return;
                }
            }
        };
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    pub fn delete(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            debug!("Deleted signaling session {session_id}");
        }
        let _ = self.events.send(StoreEvent::Deleted(session_id.to_string()));
    }

    fn replay(&self, scope: Option<&str>) -> Vec<StoreEvent> {
        match scope {
            Some(sid) => self
                .sessions
                .get(sid)
                .map(|doc| doc.replay(sid))
                .unwrap_or_default(),
            None => self
                .sessions
                .iter()
                .flat_map(|entry| entry.value().replay(entry.key()))
                .collect(),
        }
    }

    /// Spawns a task feeding `extract`ed items into a channel.
    ///
    /// The task replays the current documents first and then follows live
    /// events. Items are deduplicated by the key `extract` returns. With a
    /// `scope`, the stream ends when that session is deleted.
    fn observe<T, F>(self: &Arc<Self>, scope: Option<String>, extract: F) -> mpsc::Receiver<T>
    where
        T: Send + 'static,
        F: Fn(&StoreEvent) -> Option<(String, T)> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(OBSERVER_CHANNEL_CAPACITY);
        // Subscribe before replaying so nothing falls between the two.
        let mut events = self.events.subscribe();
        let backlog = self.replay(scope.as_deref());
        let store = Arc::clone(self);

        tokio::spawn(async move {
            let mut seen = HashSet::new();
            let deliver = |event: &StoreEvent, seen: &mut HashSet<String>| {
                extract(event).filter(|(key, _)| seen.insert(key.clone()))
            };

            for event in &backlog {
                if let Some((_, item)) = deliver(event, &mut seen) {
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
            }

            loop {
                let received = tokio::select! {
                    received = events.recv() => received,
                    _ = tx.closed() => return,
                };
                let batch = match received {
                    Ok(StoreEvent::Deleted(sid)) if scope.as_deref() == Some(sid.as_str()) => {
                        trace!("Session {sid} deleted, closing observer");
                        return;
                    }
                    Ok(event) => {
                        if scope
                            .as_deref()
                            .is_some_and(|sid| sid != event.session_id())
                        {
                            continue;
                        }
                        vec![event]
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Signaling observer lagged by {skipped} events, resyncing");
                        store.replay(scope.as_deref())
                    }
                    Err(RecvError::Closed) => return,
                };
                for event in &batch {
                    if let Some((_, item)) = deliver(event, &mut seen) {
                        if tx.send(item).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        rx
    }
}

/// A participant's handle on a [`MemorySignalingStore`].
#[derive(Debug, Clone)]
pub struct MemorySignalingRepository {
    store: Arc<MemorySignalingStore>,
    own_candidates: Arc<DashSet<String>>,
}

impl MemorySignalingRepository {
    pub fn store(&self) -> &Arc<MemorySignalingStore> {
        &self.store
    }

    /// Marks a candidate id as sent by this participant.
    pub(super) fn mark_own_candidate(&self, candidate_id: &str) {
        self.own_candidates.insert(candidate_id.to_string());
    }
}

#[async_trait]
impl SignalingRepository for MemorySignalingRepository {
    async fn send_offer(&self, offer: OfferMessage) -> Result<(), SignalingError> {
        self.store.apply(SignalingMessage::Offer(offer), None);
        Ok(())
    }

    async fn send_answer(&self, answer: AnswerMessage) -> Result<(), SignalingError> {
        self.store.apply(SignalingMessage::Answer(answer), None);
        Ok(())
    }

    async fn send_ice_candidate(
        &self,
        session_id: &str,
        candidate_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        self.mark_own_candidate(candidate_id);
        self.store.apply(
            SignalingMessage::ice_candidate(session_id, candidate),
            Some(candidate_id.to_string()),
        );
        Ok(())
    }

    async fn send_hangup(&self, hangup: HangupMessage) -> Result<(), SignalingError> {
        self.store.apply(SignalingMessage::Hangup(hangup), None);
        Ok(())
    }

    async fn observe_offer(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<OfferMessage>, SignalingError> {
        Ok(self
            .store
            .observe(Some(session_id.to_string()), |event| match event {
                StoreEvent::Offer(offer) => {
                    Some((format!("{}:{}", offer.timestamp, offer.sdp), offer.clone()))
                }
                _ => None,
            }))
    }

    async fn observe_answer(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<AnswerMessage>, SignalingError> {
        Ok(self
            .store
            .observe(Some(session_id.to_string()), |event| match event {
                StoreEvent::Answer(answer) => {
                    Some((format!("{}:{}", answer.timestamp, answer.sdp), answer.clone()))
                }
                _ => None,
            }))
    }

    async fn observe_ice_candidates(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<IceCandidate>, SignalingError> {
        let own = Arc::clone(&self.own_candidates);
        Ok(self
            .store
            .observe(Some(session_id.to_string()), move |event| match event {
                StoreEvent::Candidate {
                    candidate_id,
                    message,
                } if !own.contains(candidate_id) && !message.sdp_candidate.is_empty() => {
                    Some((candidate_id.clone(), message.to_candidate()))
                }
                _ => None,
            }))
    }

    async fn observe_hangup(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<HangupMessage>, SignalingError> {
        Ok(self
            .store
            .observe(Some(session_id.to_string()), |event| match event {
                StoreEvent::Hangup(hangup) => Some((hangup.user_id.clone(), hangup.clone())),
                _ => None,
            }))
    }

    async fn observe_incoming_offers(
        &self,
        user_id: &str,
    ) -> Result<mpsc::Receiver<OfferMessage>, SignalingError> {
        let user_id = user_id.to_string();
        Ok(self.store.observe(None, move |event| match event {
            StoreEvent::Offer(offer) if offer.callee_id == user_id => {
                Some((offer.session_id.clone(), offer.clone()))
            }
            _ => None,
        }))
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), SignalingError> {
        self.store.delete(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(1);

    fn offer(session_id: &str, callee: &str) -> OfferMessage {
        OfferMessage {
            session_id: session_id.into(),
            sdp: "v=0 offer".into(),
            caller_id: "alice".into(),
            callee_id: callee.into(),
            timestamp: 1,
        }
    }

    async fn next<T>(rx: &mut mpsc::Receiver<T>) -> Option<T> {
        timeout(WAIT, rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn test_observer_replays_existing_offer() {
        let store = MemorySignalingStore::new();
        let caller = store.repository();
        let callee = store.repository();

        caller.send_offer(offer("s1", "bob")).await.unwrap();
        let mut offers = callee.observe_offer("s1").await.unwrap();
        assert_eq!(next(&mut offers).await.unwrap().caller_id, "alice");
    }

    #[tokio::test]
    async fn test_answer_reaches_caller_observer() {
        let store = MemorySignalingStore::new();
        let caller = store.repository();
        let callee = store.repository();

        let mut answers = caller.observe_answer("s1").await.unwrap();
        callee
            .send_answer(AnswerMessage {
                session_id: "s1".into(),
                sdp: "v=0 answer".into(),
                callee_id: "bob".into(),
                timestamp: 2,
            })
            .await
            .unwrap();
        assert_eq!(next(&mut answers).await.unwrap().sdp, "v=0 answer");
    }

    #[tokio::test]
    async fn test_candidates_are_not_echoed_to_sender() {
        let store = MemorySignalingStore::new();
        let alice = store.repository();
        let bob = store.repository();

        let mut alice_sees = alice.observe_ice_candidates("s1").await.unwrap();
        let mut bob_sees = bob.observe_ice_candidates("s1").await.unwrap();

        let candidate = IceCandidate::new("candidate:1 1 UDP 1 10.0.0.1 9 typ host")
            .with_sdp_mid("0")
            .with_sdp_m_line_index(0);
        alice
            .send_ice_candidate("s1", "c-1", &candidate)
            .await
            .unwrap();
        // Redelivery of the same id is dropped by the store.
        alice
            .send_ice_candidate("s1", "c-1", &candidate)
            .await
            .unwrap();

        assert_eq!(next(&mut bob_sees).await, Some(candidate));
        assert!(timeout(Duration::from_millis(50), alice_sees.recv()).await.is_err());
        assert_eq!(store.candidate_count("s1"), 1);
    }

    #[tokio::test]
    async fn test_delete_ends_observers() {
        let store = MemorySignalingStore::new();
        let repo = store.repository();
        repo.send_offer(offer("s1", "bob")).await.unwrap();
        let mut hangups = repo.observe_hangup("s1").await.unwrap();

        repo.delete_session("s1").await.unwrap();
        assert!(next(&mut hangups).await.is_none());
        assert!(!store.contains_session("s1"));
    }

    #[tokio::test]
    async fn test_incoming_offers_filtered_by_callee() {
        let store = MemorySignalingStore::new();
        let repo = store.repository();
        repo.send_offer(offer("s1", "bob")).await.unwrap();

        let mut incoming = repo.observe_incoming_offers("bob").await.unwrap();
        repo.send_offer(offer("s2", "carol")).await.unwrap();
        repo.send_offer(offer("s3", "bob")).await.unwrap();

        assert_eq!(next(&mut incoming).await.unwrap().session_id, "s1");
        assert_eq!(next(&mut incoming).await.unwrap().session_id, "s3");
    }

    #[tokio::test]
    async fn test_renegotiated_offer_is_delivered() {
        let store = MemorySignalingStore::new();
        let repo = store.repository();
        let mut offers = repo.observe_offer("s1").await.unwrap();

        repo.send_offer(offer("s1", "bob")).await.unwrap();
        let mut restart = offer("s1", "bob");
        restart.sdp = "v=0 ice-restart".into();
        restart.timestamp = 5;
        repo.send_offer(restart).await.unwrap();

        assert_eq!(next(&mut offers).await.unwrap().sdp, "v=0 offer");
        assert_eq!(next(&mut offers).await.unwrap().sdp, "v=0 ice-restart");
        assert_eq!(store.session_count(), 1);
    }
}
