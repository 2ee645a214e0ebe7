//! Where the ICE server credentials of a session come from.
//!
//! The default chain is [`FallbackTurnCredentialService`] over
//! [`CachedTurnCredentialService`] over [`HttpTurnCredentialService`]:
//! lookups hit the TURN API once per session and degrade to public STUN
//! servers when the API is unreachable.

mod cached;
mod fallback;
mod http;
mod shared_secret;

use async_trait::async_trait;
use thiserror::Error;

pub use cached::CachedTurnCredentialService;
pub use fallback::FallbackTurnCredentialService;
pub use http::HttpTurnCredentialService;
pub use shared_secret::SharedSecretTurnCredentialService;
pub use webrtckit_core::turn::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnCredentialError {
    #[error("unauthorized: invalid TURN credentials")]
    Unauthorized,

    #[error("TURN credentials not found")]
    NotFound,

    #[error("TURN server error: HTTP {0}")]
    ServerError(u16),

    #[error("failed to fetch TURN credentials: {0}")]
    FetchFailed(String),

    #[error("invalid TURN credential response: {0}")]
    InvalidResponse(String),

    #[error("TURN credential request timed out")]
    Timeout,

    #[error("invalid TURN credential request: {0}")]
    InvalidInput(String),
}

impl TurnCredentialError {
    /// Whether asking again may give a different answer.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Unauthorized | Self::NotFound | Self::InvalidInput(_)
        )
    }
}

impl From<RestCredentialError> for TurnCredentialError {
    fn from(err: RestCredentialError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

#[async_trait]
pub trait TurnCredentialService: Send + Sync {
    async fn get_credentials(&self, session_id: &str)
    -> Result<TurnCredential, TurnCredentialError>;
}

#[async_trait]
impl<T: TurnCredentialService + ?Sized> TurnCredentialService for std::sync::Arc<T> {
    async fn get_credentials(
        &self,
        session_id: &str,
    ) -> Result<TurnCredential, TurnCredentialError> {
        (**self).get_credentials(session_id).await
    }
}
