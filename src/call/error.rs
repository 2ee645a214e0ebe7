use thiserror::Error;
use webrtckit_core::call::InvalidTransition;
use webrtckit_core::engine::EngineError;
use webrtckit_core::signaling::SignalingError;

use crate::turn::TurnCredentialError;

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Credentials(#[from] TurnCredentialError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("no active session")]
    NoActiveSession,

    #[error("timed out waiting for the connection to recover")]
    ReconnectTimeout,
}
