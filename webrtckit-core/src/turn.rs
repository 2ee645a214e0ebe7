//! TURN/STUN credential model and time-limited REST credentials.
//!
//! REST credentials follow the coturn `use-auth-secret` scheme: the username
//! is `"<expiry unix seconds>:<user id>"` and the password is the base64
//! HMAC-SHA1 of that username under the shared secret.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use thiserror::Error;

use crate::engine::IceServerConfig;
use crate::signaling::{SignalingMessage, TurnCredentialMessage, now_millis};

type HmacSha1 = Hmac<Sha1>;

pub const MIN_TTL_SECS: i64 = 60;
pub const MAX_TTL_SECS: i64 = 86_400;
pub const DEFAULT_TTL_SECS: i64 = 3_600;
const MAX_USER_ID_LEN: usize = 128;
const TURNS_PORT: u16 = 5349;

const FALLBACK_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Credentials for the ICE servers of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCredential {
    pub username: String,
    pub password: String,
    /// Lifetime in seconds.
    pub ttl: i64,
    pub urls: Vec<String>,
}

impl TurnCredential {
    /// Public STUN servers only; used when no TURN credentials are available.
    pub fn stun_fallback() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            ttl: DEFAULT_TTL_SECS,
            urls: FALLBACK_STUN_URLS.iter().map(|u| u.to_string()).collect(),
        }
    }

    /// A single ICE server entry carrying every URL of the credential.
    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        vec![IceServerConfig {
            urls: self.urls.clone(),
            username: self.username.clone(),
            credential: self.password.clone(),
        }]
    }

    pub fn is_stun_only(&self) -> bool {
        self.urls.iter().all(|u| u.starts_with("stun:"))
    }

    pub fn to_signaling_message(&self, session_id: impl Into<String>) -> SignalingMessage {
        SignalingMessage::TurnCredential(TurnCredentialMessage {
            session_id: session_id.into(),
            username: self.username.clone(),
            password: self.password.clone(),
            ttl: self.ttl,
            urls: self.urls.clone(),
            timestamp: now_millis(),
        })
    }
}

impl From<TurnCredentialMessage> for TurnCredential {
    fn from(msg: TurnCredentialMessage) -> Self {
        Self {
            username: msg.username,
            password: msg.password,
            ttl: msg.ttl,
            urls: msg.urls,
        }
    }
}

/// Response body of `GET /turn/credentials`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnApiResponse {
    pub username: String,
    pub password: String,
    pub ttl: i64,
    pub uris: Vec<String>,
}

impl From<TurnApiResponse> for TurnCredential {
    fn from(resp: TurnApiResponse) -> Self {
        Self {
            username: resp.username,
            password: resp.password,
            ttl: resp.ttl,
            urls: resp.uris,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RestCredentialError {
    #[error("ttl must be between 60 and 86400 seconds, got {0}")]
    InvalidTtl(i64),

    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("shared secret is empty")]
    EmptySecret,

    #[error("malformed username: {0:?}")]
    MalformedUsername(String),

    #[error("invalid hmac key")]
    InvalidKey,
}

/// Issues REST credentials for one TURN deployment.
#[derive(Clone)]
pub struct RestCredentialIssuer {
    secret: String,
    server: String,
    port: u16,
}

impl std::fmt::Debug for RestCredentialIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestCredentialIssuer")
            .field("secret", &"<redacted>")
            .field("server", &self.server)
            .field("port", &self.port)
            .finish()
    }
}

impl RestCredentialIssuer {
    pub fn new(
        secret: impl Into<String>,
        server: impl Into<String>,
        port: u16,
    ) -> Result<Self, RestCredentialError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(RestCredentialError::EmptySecret);
        }
        Ok(Self {
            secret,
            server: server.into(),
            port,
        })
    }

    /// UDP, TCP and TLS relay URIs of the deployment.
    pub fn uris(&self) -> Vec<String> {
        vec![
            format!("turn:{}:{}?transport=udp", self.server, self.port),
            format!("turn:{}:{}?transport=tcp", self.server, self.port),
            format!("turns:{}:{}?transport=tcp", self.server, TURNS_PORT),
        ]
    }

    /// Issues a credential valid from `now_unix` for `ttl` seconds.
    pub fn issue(
        &self,
        user_id: &str,
        ttl: i64,
        now_unix: i64,
    ) -> Result<TurnCredential, RestCredentialError> {
        if !(MIN_TTL_SECS..=MAX_TTL_SECS).contains(&ttl) {
            return Err(RestCredentialError::InvalidTtl(ttl));
        }
        if !is_valid_user_id(user_id) {
            return Err(RestCredentialError::InvalidUserId(user_id.to_string()));
        }

        let username = format!("{}:{}", now_unix + ttl, user_id);
        let password = sign(&self.secret, &username)?;
        Ok(TurnCredential {
            username,
            password,
            ttl,
            urls: self.uris(),
        })
    }

    /// Checks the signature and expiry of a credential this issuer produced.
    pub fn verify(
        &self,
        username: &str,
        password: &str,
        now_unix: i64,
    ) -> Result<bool, RestCredentialError> {
        let (expiry, _user) = username
            .split_once(':')
            .ok_or_else(|| RestCredentialError::MalformedUsername(username.to_string()))?;
        let expiry: i64 = expiry
            .parse()
            .map_err(|_| RestCredentialError::MalformedUsername(username.to_string()))?;
        if expiry < now_unix {
            return Ok(false);
        }

        let Ok(signature) = STANDARD.decode(password) else {
            return Ok(false);
        };
        let mut mac = mac_for(&self.secret)?;
        mac.update(username.as_bytes());
        Ok(mac.verify_slice(&signature).is_ok())
    }
}

fn mac_for(secret: &str) -> Result<HmacSha1, RestCredentialError> {
    HmacSha1::new_from_slice(secret.as_bytes()).map_err(|_| RestCredentialError::InvalidKey)
}

fn sign(secret: &str, username: &str) -> Result<String, RestCredentialError> {
    let mut mac = mac_for(secret)?;
    mac.update(username.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Checks a REST credential against `secret` without building an issuer.
pub fn verify_rest_credential(
    secret: &str,
    username: &str,
    password: &str,
    now_unix: i64,
) -> Result<bool, RestCredentialError> {
    RestCredentialIssuer::new(secret, "", 0)?.verify(username, password, now_unix)
}

/// `^[A-Za-z0-9._-]{1,128}$`
pub fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> RestCredentialIssuer {
        RestCredentialIssuer::new("north-secret", "turn.example.org", 3478).unwrap()
    }

    #[test]
    fn test_stun_fallback() {
        let cred = TurnCredential::stun_fallback();
        assert!(cred.is_stun_only());
        assert_eq!(cred.ttl, 3600);
        assert_eq!(
            cred.urls,
            vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string()
            ]
        );
        assert!(cred.username.is_empty() && cred.password.is_empty());
    }

    #[test]
    fn test_api_response_maps_uris_to_urls() {
        let resp: TurnApiResponse = serde_json::from_str(
            r#"{"username":"1700003600:alice","password":"pw","ttl":3600,"uris":["turn:t:3478?transport=udp"]}"#,
        )
        .unwrap();
        let cred = TurnCredential::from(resp);
        assert_eq!(cred.urls, vec!["turn:t:3478?transport=udp".to_string()]);
        assert!(!cred.is_stun_only());
    }

    #[test]
    fn test_to_signaling_message() {
        let msg = TurnCredential::stun_fallback().to_signaling_message("s1");
        assert_eq!(msg.session_id(), "s1");
        assert!(msg.validate().is_ok());
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "turn-credential");
        assert_eq!(json["urls"][1], "stun:stun1.l.google.com:19302");
    }

    #[test]
    fn test_issue_known_vector() {
        let cred = issuer().issue("alice", 3600, 1_700_000_000).unwrap();
        assert_eq!(cred.username, "1700003600:alice");
        assert_eq!(cred.password, sign("north-secret", "1700003600:alice").unwrap());
        assert_eq!(
            cred.urls,
            vec![
                "turn:turn.example.org:3478?transport=udp".to_string(),
                "turn:turn.example.org:3478?transport=tcp".to_string(),
                "turns:turn.example.org:5349?transport=tcp".to_string(),
            ]
        );
    }

    #[test]
    fn test_rfc2202_hmac_sha1() {
        // RFC 2202 test case 2.
        let mut mac = mac_for("Jefe").unwrap();
        mac.update(b"what do ya want for nothing?");
        let digest = mac.finalize().into_bytes();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(hex, "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }

    #[test]
    fn test_issue_validates_input() {
        let issuer = issuer();
        assert_eq!(
            issuer.issue("alice", 59, 0),
            Err(RestCredentialError::InvalidTtl(59))
        );
        assert_eq!(
            issuer.issue("alice", 86_401, 0),
            Err(RestCredentialError::InvalidTtl(86_401))
        );
        assert!(issuer.issue("bad user", 3600, 0).is_err());
        assert!(issuer.issue(&"a".repeat(129), 3600, 0).is_err());
        assert!(issuer.issue("a.b_c-d", 3600, 0).is_ok());
        assert_eq!(
            RestCredentialIssuer::new("", "t", 3478).unwrap_err(),
            RestCredentialError::EmptySecret
        );
    }

    #[test]
    fn test_verify_signature_and_expiry() {
        let issuer = issuer();
        let cred = issuer.issue("bob", 600, 1_000).unwrap();
        assert_eq!(issuer.verify(&cred.username, &cred.password, 1_500), Ok(true));
        assert_eq!(issuer.verify(&cred.username, &cred.password, 1_601), Ok(false));
        assert_eq!(issuer.verify(&cred.username, "AAAA", 1_500), Ok(false));
        assert!(issuer.verify("no-colon", &cred.password, 0).is_err());
    }

    #[test]
    fn test_free_verify_and_ice_servers() {
        let cred = issuer().issue("carol", 60, 0).unwrap();
        assert_eq!(
            verify_rest_credential("north-secret", &cred.username, &cred.password, 30),
            Ok(true)
        );
        assert_eq!(
            verify_rest_credential("other", &cred.username, &cred.password, 30),
            Ok(false)
        );

        let servers = cred.ice_servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls.len(), 3);
        assert_eq!(servers[0].credential, cred.password);
    }
}
