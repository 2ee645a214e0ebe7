use async_trait::async_trait;
use log::warn;
use webrtckit_core::turn::TurnCredential;

use super::{TurnCredentialError, TurnCredentialService};

/// Degrades to public STUN servers when the wrapped service fails.
///
/// Calls through STUN only still connect peers that are not behind a
/// symmetric NAT.
pub struct FallbackTurnCredentialService<S> {
    inner: S,
}

impl<S: TurnCredentialService> FallbackTurnCredentialService<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: TurnCredentialService> TurnCredentialService for FallbackTurnCredentialService<S> {
    async fn get_credentials(
        &self,
        session_id: &str,
    ) -> Result<TurnCredential, TurnCredentialError> {
        match self.inner.get_credentials(session_id).await {
            Ok(credential) => Ok(credential),
            Err(e) => {
                warn!("Using STUN-only ICE servers for {session_id}: {e}");
                Ok(TurnCredential::stun_fallback())
            }
        }
    }
}
