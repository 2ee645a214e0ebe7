use async_trait::async_trait;
use webrtckit_core::turn::{DEFAULT_TTL_SECS, RestCredentialIssuer, TurnCredential};

use super::{TurnCredentialError, TurnCredentialService};

/// Mints TURN REST credentials locally from the deployment's shared secret.
///
/// The session id is used as the user id part of the username.
#[derive(Debug)]
pub struct SharedSecretTurnCredentialService {
    issuer: RestCredentialIssuer,
    ttl: i64,
}

impl SharedSecretTurnCredentialService {
    pub fn new(
        secret: impl Into<String>,
        server: impl Into<String>,
        port: u16,
    ) -> Result<Self, TurnCredentialError> {
        Ok(Self {
            issuer: RestCredentialIssuer::new(secret, server, port)?,
            ttl: DEFAULT_TTL_SECS,
        })
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn issuer(&self) -> &RestCredentialIssuer {
        &self.issuer
    }
}

#[async_trait]
impl TurnCredentialService for SharedSecretTurnCredentialService {
    async fn get_credentials(
        &self,
        session_id: &str,
    ) -> Result<TurnCredential, TurnCredentialError> {
        let now = chrono::Utc::now().timestamp();
        Ok(self.issuer.issue(session_id, self.ttl, now)?)
    }
}
