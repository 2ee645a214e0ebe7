use std::sync::Arc;
use webrtckit_core::signaling::IceCandidate;

use crate::call::CallError;
use crate::peer::PeerConnectionManager;
use crate::signaling::SignalingRepository;

pub struct AddIceCandidateUseCase {
    peer: Arc<PeerConnectionManager>,
    signaling: Arc<dyn SignalingRepository>,
}

impl AddIceCandidateUseCase {
    pub fn new(peer: Arc<PeerConnectionManager>, signaling: Arc<dyn SignalingRepository>) -> Self {
        Self { peer, signaling }
    }

    /// Hands a candidate received from the remote peer to the engine.
    pub async fn add_remote(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.peer.add_ice_candidate(candidate).await?;
        Ok(())
    }

    /// Publishes a locally gathered candidate under `candidate_id`.
    pub async fn signal_local(
        &self,
        session_id: &str,
        candidate_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), CallError> {
        self.signaling
            .send_ice_candidate(session_id, candidate_id, candidate)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::fixtures::fixture;
    use webrtckit_core::signaling::SessionDescription;

    #[tokio::test]
    async fn test_add_remote_reaches_engine() {
        let f = fixture();
        f.peer.initialize("s1", vec![], "", "").await.unwrap();
        f.peer
            .set_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        let use_case = AddIceCandidateUseCase::new(f.peer, f.signaling);

        let candidate = IceCandidate::new("candidate:1").with_sdp_m_line_index(0);
        use_case.add_remote(candidate.clone()).await.unwrap();
        assert_eq!(f.engine.added_candidates(), vec![candidate]);
    }

    #[tokio::test]
    async fn test_add_remote_surfaces_engine_error() {
        let f = fixture();
        f.peer.initialize("s1", vec![], "", "").await.unwrap();
        f.peer
            .set_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        f.engine.fail_on("add_ice_candidate");
        let use_case = AddIceCandidateUseCase::new(f.peer, f.signaling);

        assert!(use_case
            .add_remote(IceCandidate::new("candidate:bad"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_signal_local_stores_candidate() {
        let f = fixture();
        let use_case = AddIceCandidateUseCase::new(f.peer, f.signaling);
        let candidate = IceCandidate::new("candidate:1")
            .with_sdp_mid("0")
            .with_sdp_m_line_index(0);
        use_case.signal_local("s1", "c-1", &candidate).await.unwrap();
        assert_eq!(f.store.candidate_count("s1"), 1);
    }
}
