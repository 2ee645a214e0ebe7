use async_trait::async_trait;
use log::{debug, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtckit_core::net::{SignalingTransport, TransportEvent, TransportFactory};
use webrtckit_core::signaling::{
    AnswerMessage, HangupMessage, IceCandidate, OfferMessage, SignalingEnvelope, SignalingError,
    SignalingMessage,
};

use super::memory::{MemorySignalingRepository, MemorySignalingStore};
use super::repository::SignalingRepository;

/// Signaling over a [`SignalingTransport`] such as a WebSocket.
///
/// Outgoing messages are written as [`SignalingEnvelope`] JSON frames.
/// Incoming frames are folded into a local mirror store, so observers get the
/// same replay and dedup behaviour as the in-memory backend.
pub struct TransportSignalingRepository {
    transport: Arc<dyn SignalingTransport>,
    mirror: MemorySignalingRepository,
    connected: Arc<AtomicBool>,
    pump: JoinHandle<()>,
}

impl TransportSignalingRepository {
    pub async fn connect(factory: &dyn TransportFactory) -> Result<Arc<Self>, SignalingError> {
        let (transport, events) = factory
            .create_transport()
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;

        let mirror = MemorySignalingStore::new().repository();
        let connected = Arc::new(AtomicBool::new(true));
        let pump = tokio::spawn(run_pump(
            events,
            Arc::clone(mirror.store()),
            Arc::clone(&connected),
        ));

        Ok(Arc::new(Self {
            transport,
            mirror,
            connected,
            pump,
        }))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.transport.disconnect().await;
    }

    async fn send_envelope(&self, envelope: SignalingEnvelope) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::Closed);
        }
        envelope.message.validate()?;
        let frame = envelope.to_json()?;
        trace!(
            "Sending {} for session {}",
            envelope.message.message_type(),
            envelope.message.session_id()
        );
        self.transport
            .send_text(&frame)
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))
    }
}

impl Drop for TransportSignalingRepository {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn run_pump(
    mut events: mpsc::Receiver<TransportEvent>,
    mirror: Arc<MemorySignalingStore>,
    connected: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => {
                info!(target: "Signaling/Transport", "Signaling transport connected");
                connected.store(true, Ordering::Relaxed);
            }
            TransportEvent::TextReceived(text) => {
                let envelope = match SignalingEnvelope::from_json(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!(target: "Signaling/Transport", "Skipping undecodable frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = envelope.message.validate() {
                    debug!(target: "Signaling/Transport", "Skipping invalid message: {e}");
                    continue;
                }
                mirror.apply(envelope.message, envelope.candidate_id);
            }
            TransportEvent::Disconnected => {
                warn!(target: "Signaling/Transport", "Signaling transport disconnected");
                connected.store(false, Ordering::Relaxed);
                break;
            }
        }
    }
}

#[async_trait]
impl SignalingRepository for TransportSignalingRepository {
    async fn send_offer(&self, offer: OfferMessage) -> Result<(), SignalingError> {
        self.send_envelope(SignalingEnvelope::new(SignalingMessage::Offer(offer)))
            .await
    }

    async fn send_answer(&self, answer: AnswerMessage) -> Result<(), SignalingError> {
        self.send_envelope(SignalingEnvelope::new(SignalingMessage::Answer(answer)))
            .await
    }

    async fn send_ice_candidate(
        &self,
        session_id: &str,
        candidate_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        // Marked before sending so a relayed echo is never surfaced.
        self.mirror.mark_own_candidate(candidate_id);
        let envelope =
            SignalingEnvelope::new(SignalingMessage::ice_candidate(session_id, candidate))
                .with_candidate_id(candidate_id);
        self.send_envelope(envelope).await
    }

    async fn send_hangup(&self, hangup: HangupMessage) -> Result<(), SignalingError> {
        self.send_envelope(SignalingEnvelope::new(SignalingMessage::Hangup(hangup)))
            .await
    }

    async fn observe_offer(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<OfferMessage>, SignalingError> {
        self.mirror.observe_offer(session_id).await
    }

    async fn observe_answer(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<AnswerMessage>, SignalingError> {
        self.mirror.observe_answer(session_id).await
    }

    async fn observe_ice_candidates(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<IceCandidate>, SignalingError> {
        self.mirror.observe_ice_candidates(session_id).await
    }

    async fn observe_hangup(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<HangupMessage>, SignalingError> {
        self.mirror.observe_hangup(session_id).await
    }

    async fn observe_incoming_offers(
        &self,
        user_id: &str,
    ) -> Result<mpsc::Receiver<OfferMessage>, SignalingError> {
        self.mirror.observe_incoming_offers(user_id).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), SignalingError> {
        self.mirror.delete_session(session_id).await
    }
}
