use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown signaling message type: {0}")]
    UnknownType(String),

    #[error("invalid signaling message: {0}")]
    Invalid(&'static str),

    #[error("signaling transport error: {0}")]
    Transport(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("signaling channel closed")]
    Closed,
}
