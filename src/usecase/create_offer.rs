use log::info;
use std::sync::Arc;
use webrtckit_core::signaling::{OfferMessage, SessionDescription, now_millis};

use crate::call::CallError;
use crate::peer::PeerConnectionManager;
use crate::signaling::SignalingRepository;
use crate::turn::TurnCredentialService;

/// Caller side: credentials, peer connection, capture, offer, signal.
pub struct CreateOfferUseCase {
    peer: Arc<PeerConnectionManager>,
    signaling: Arc<dyn SignalingRepository>,
    credentials: Arc<dyn TurnCredentialService>,
}

impl CreateOfferUseCase {
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
        session_id: &str,
        caller_id: &str,
        callee_id: &str,
        enable_capture: bool,
    ) -> Result<SessionDescription, CallError> {
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

        let offer = self.peer.create_offer().await?;
        self.peer.set_local_description(offer.clone()).await?;
        self.send(session_id, &offer, caller_id, callee_id).await?;

        info!("Offer sent for session {session_id} to {callee_id}");
        Ok(offer)
    }

    /// Re-offers on the existing connection with fresh ICE credentials.
    pub async fn execute_ice_restart(
        &self,
        session_id: &str,
        caller_id: &str,
        callee_id: &str,
    ) -> Result<SessionDescription, CallError> {
        let offer = self.peer.restart_ice().await?;
        self.peer.set_local_description(offer.clone()).await?;
        self.send(session_id, &offer, caller_id, callee_id).await?;
        Ok(offer)
    }

    async fn send(
        &self,
        session_id: &str,
        offer: &SessionDescription,
        caller_id: &str,
        callee_id: &str,
    ) -> Result<(), CallError> {
        self.signaling
            .send_offer(OfferMessage {
                session_id: session_id.to_string(),
                sdp: offer.sdp.clone(),
                caller_id: caller_id.to_string(),
                callee_id: callee_id.to_string(),
                timestamp: now_millis(),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MOCK_OFFER_SDP, MockTurnCredentialService};
    use crate::turn::TurnCredentialError;
    use crate::usecase::fixtures::fixture;

    #[tokio::test]
    async fn test_runs_steps_in_order_and_signals_offer() {
        let f = fixture();
        let use_case = CreateOfferUseCase::new(f.peer.clone(), f.signaling.clone(), f.credentials);
        let mut offers = f.signaling.observe_offer("s1").await.unwrap();

        let offer = use_case.execute("s1", "alice", "bob", true).await.unwrap();
        assert_eq!(offer.sdp, MOCK_OFFER_SDP);
        assert_eq!(
            f.engine.calls(),
            vec![
                "initialize",
                "start_local_capture",
                "create_offer",
                "set_local_description"
            ]
        );
        assert_eq!(f.engine.ice_servers()[0].username, "1700000000:s1");

        let sent = offers.recv().await.unwrap();
        assert_eq!(sent.caller_id, "alice");
        assert_eq!(sent.callee_id, "bob");
        assert_eq!(sent.sdp, MOCK_OFFER_SDP);
    }

    #[tokio::test]
    async fn test_capture_is_optional() {
        let f = fixture();
        let use_case = CreateOfferUseCase::new(f.peer, f.signaling, f.credentials);
        use_case.execute("s1", "alice", "bob", false).await.unwrap();
        assert_eq!(f.engine.call_count("start_local_capture"), 0);
    }

    #[tokio::test]
    async fn test_credential_failure_aborts_before_engine() {
        let f = fixture();
        let credentials = Arc::new(
            MockTurnCredentialService::new().failing_with(TurnCredentialError::Unauthorized),
        );
        let use_case = CreateOfferUseCase::new(f.peer, f.signaling, credentials);

        let err = use_case.execute("s1", "alice", "bob", true).await.unwrap_err();
        assert!(matches!(err, CallError::Credentials(TurnCredentialError::Unauthorized)));
        assert!(f.engine.calls().is_empty());
        assert!(!f.store.contains_session("s1"));
    }

    #[tokio::test]
    async fn test_engine_failure_does_not_signal() {
        let f = fixture();
        f.engine.fail_on("create_offer");
        let use_case = CreateOfferUseCase::new(f.peer, f.signaling, f.credentials);

        let err = use_case.execute("s1", "alice", "bob", true).await.unwrap_err();
        assert!(matches!(err, CallError::Engine(_)));
        assert!(!f.store.contains_session("s1"));
    }

    #[tokio::test]
    async fn test_ice_restart_reoffers() {
        let f = fixture();
        let use_case = CreateOfferUseCase::new(f.peer, f.signaling, f.credentials);
        use_case.execute("s1", "alice", "bob", false).await.unwrap();
        use_case
            .execute_ice_restart("s1", "alice", "bob")
            .await
            .unwrap();
        assert_eq!(f.engine.call_count("create_offer(ice_restart)"), 1);
        assert_eq!(f.engine.call_count("initialize"), 1);
    }
}
