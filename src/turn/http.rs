use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use webrtckit_core::net::{HttpClient, HttpRequest, HttpResponse};
use webrtckit_core::turn::{TurnApiResponse, TurnCredential};

use super::{TurnCredentialError, TurnCredentialService};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Fetches credentials from the TURN credentials API.
///
/// `GET {base_url}/turn/credentials?session=<id>&service=turn`, answered with
/// `{"username", "password", "ttl", "uris"}`.
pub struct HttpTurnCredentialService {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
}

impl HttpTurnCredentialService {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn credentials_url(&self, session_id: &str) -> String {
        format!(
            "{}/turn/credentials?session={}&service=turn",
            self.base_url,
            urlencoding::encode(session_id)
        )
    }

    async fn fetch(&self, session_id: &str) -> Result<TurnCredential, TurnCredentialError> {
        let request =
            HttpRequest::get(self.credentials_url(session_id)).with_header("Accept", "application/json");

        let response = tokio::time::timeout(self.timeout, self.http_client.execute(request))
            .await
            .map_err(|_| TurnCredentialError::Timeout)?
            .map_err(|e| TurnCredentialError::FetchFailed(e.to_string()))?;

        decode_response(response)
    }
}

fn decode_response(response: HttpResponse) -> Result<TurnCredential, TurnCredentialError> {
    match response.status_code {
        200..=299 => {
            let raw: TurnApiResponse = serde_json::from_slice(&response.body)
                .map_err(|e| TurnCredentialError::InvalidResponse(e.to_string()))?;
            if raw.uris.is_empty() {
                return Err(TurnCredentialError::InvalidResponse(
                    "no uris in response".to_string(),
                ));
            }
            Ok(raw.into())
        }
        401 => Err(TurnCredentialError::Unauthorized),
        404 => Err(TurnCredentialError::NotFound),
        code @ 500..=599 => Err(TurnCredentialError::ServerError(code)),
        code => Err(TurnCredentialError::FetchFailed(format!("HTTP {code}"))),
    }
}

#[async_trait]
impl TurnCredentialService for HttpTurnCredentialService {
    async fn get_credentials(
        &self,
        session_id: &str,
    ) -> Result<TurnCredential, TurnCredentialError> {
        if session_id.is_empty() {
            return Err(TurnCredentialError::InvalidInput(
                "session id is empty".to_string(),
            ));
        }

        let mut retries = 0;
        loop {
            match self.fetch(session_id).await {
                Ok(credential) => {
                    debug!(
                        "Fetched TURN credentials for {session_id} ({} uris, ttl {}s)",
                        credential.urls.len(),
                        credential.ttl
                    );
                    return Ok(credential);
                }
                Err(e) if !e.is_retryable() || retries >= self.max_retries => return Err(e),
                Err(e) => {
                    retries += 1;
                    let delay = Duration::from_secs(1 << retries);
                    warn!(
                        "TURN credential fetch failed ({e}), retry {retries}/{} in {delay:?}",
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
