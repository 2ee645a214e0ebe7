use log::info;
use std::sync::Arc;
use webrtckit_core::signaling::{AnswerMessage, OfferMessage, SessionDescription, now_millis};

use crate::call::CallError;
use crate::peer::PeerConnectionManager;
use crate::signaling::SignalingRepository;
use crate::turn::TurnCredentialService;

/// Callee side: credentials, peer connection, capture, remote offer, answer,
/// signal.
pub struct AnswerCallUseCase {
    peer: Arc<PeerConnectionManager>,
    signaling: Arc<dyn SignalingRepository>,
    credentials: Arc<dyn TurnCredentialService>,
}

impl AnswerCallUseCase {
    pub fn new(
        peer: Arc<PeerConnectionManager>,
        signaling: Arc<dyn SignalingRepository>,
        credentials: Arc<dyn TurnCredentialService>,
    ) -> Self {
        Self {
            peer,
            signaling,
            credentials,
        }
    }

    pub async fn execute(
        &self,
        offer: &OfferMessage,
        callee_id: &str,
        enable_capture: bool,
    ) -> Result<SessionDescription, CallError> {
        let session_id = offer.session_id.as_str();
        let credential = self.credentials.get_credentials(session_id).await?;
        self.peer
            .initialize(
                session_id,
                credential.urls,
                &credential.username,
                &credential.password,
            )
            .await?;

        if enable_capture {
            self.peer.start_local_capture().await?;
        }

        let answer = self.answer(offer, callee_id).await?;
        info!("Answered session {session_id} from {}", offer.caller_id);
        Ok(answer)
    }

    /// Answers a follow-up offer on the existing connection.
    pub async fn renegotiate(
        &self,
        offer: &OfferMessage,
        callee_id: &str,
    ) -> Result<SessionDescription, CallError> {
        self.answer(offer, callee_id).await
    }

    async fn answer(
        &self,
        offer: &OfferMessage,
        callee_id: &str,
    ) -> Result<SessionDescription, CallError> {
        self.peer
            .set_remote_description(SessionDescription::offer(offer.sdp.clone()))
            .await?;
        let answer = self.peer.create_answer().await?;
        self.peer.set_local_description(answer.clone()).await?;

        self.signaling
            .send_answer(AnswerMessage {
                session_id: offer.session_id.clone(),
                sdp: answer.sdp.clone(),
                callee_id: callee_id.to_string(),
                timestamp: now_millis(),
            })
            .await?;
        Ok(answer)
    }
}
