use log::{info, warn};
use std::sync::Arc;
use webrtckit_core::signaling::{HangupMessage, now_millis};

use crate::call::CallError;
use crate::peer::PeerConnectionManager;
use crate::signaling::SignalingRepository;

/// Hangup reason sent when the local user ends the call.
pub const END_REASON_USER: &str = "user_ended";

pub struct EndCallUseCase {
    peer: Arc<PeerConnectionManager>,
    signaling: Arc<dyn SignalingRepository>,
}

impl EndCallUseCase {
    pub fn new(peer: Arc<PeerConnectionManager>, signaling: Arc<dyn SignalingRepository>) -> Self {
        Self { peer, signaling }
    }

    /// Tears the session down. A graceful end also stops capture and tells
    /// the remote peer. Failures of those two steps are logged; the
    /// connection is always closed and the session always deleted.
    pub async fn execute(
        &self,
        session_id: &str,
        user_id: &str,
        graceful: bool,
    ) -> Result<(), CallError> {
        if graceful {
            if let Err(e) = self.peer.stop_local_capture().await {
                warn!("Failed to stop local capture for {session_id}: {e}");
            }
            let hangup = HangupMessage {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                reason: Some(END_REASON_USER.to_string()),
                timestamp: now_millis(),
            };
            if let Err(e) = self.signaling.send_hangup(hangup).await {
                warn!("Failed to send hangup for {session_id}: {e}");
            }
        }

        let closed = self.peer.close().await;
        let deleted = self.signaling.delete_session(session_id).await;
        closed?;
        deleted?;
        info!("Session {session_id} ended");
        Ok(())
    }
}
