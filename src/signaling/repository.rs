use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtckit_core::signaling::{
    AnswerMessage, HangupMessage, IceCandidate, OfferMessage, SignalingError,
};

/// Session-keyed access to the signaling channel.
///
/// Observers replay what the session already holds and then follow new
/// messages. Each stream ends when the session is deleted. ICE candidates are
/// deduplicated by candidate id, and candidates sent through the same
/// repository are never echoed back to it.
#[async_trait]
pub trait SignalingRepository: Send + Sync {
    async fn send_offer(&self, offer: OfferMessage) -> Result<(), SignalingError>;

    async fn send_answer(&self, answer: AnswerMessage) -> Result<(), SignalingError>;

    async fn send_ice_candidate(
        &self,
        session_id: &str,
        candidate_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError>;

    async fn send_hangup(&self, hangup: HangupMessage) -> Result<(), SignalingError>;

    async fn observe_offer(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<OfferMessage>, SignalingError>;

    async fn observe_answer(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<AnswerMessage>, SignalingError>;

    async fn observe_ice_candidates(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<IceCandidate>, SignalingError>;

    async fn observe_hangup(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<HangupMessage>, SignalingError>;

    /// First offer of every session addressed to `user_id`.
    async fn observe_incoming_offers(
        &self,
        user_id: &str,
    ) -> Result<mpsc::Receiver<OfferMessage>, SignalingError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), SignalingError>;
}
