//! Seam between the SDK and the WebRTC engine it drives.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::signaling::{IceCandidate, SessionDescription};
use crate::stats::RawStatsEntry;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("peer connection not initialized")]
    NotInitialized,

    #[error("sdp error: {0}")]
    Sdp(String),

    #[error("ice error: {0}")]
    Ice(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("engine error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

impl CameraFacing {
    pub fn flipped(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

/// An ICE server entry handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Notifications emitted by an initialized peer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    LocalCandidate(IceCandidate),
    IceGatheringComplete,
    ConnectionState(PeerConnectionState),
    RemoteTrack(MediaKind),
}

/// A single peer connection plus the local media feeding it.
///
/// `initialize` must be called before any other operation; it hands back the
/// engine's event stream, which ends when the connection is closed.
#[async_trait]
pub trait PeerConnectionEngine: Send + Sync {
    async fn initialize(
        &self,
        session_id: &str,
        ice_servers: Vec<IceServerConfig>,
    ) -> Result<mpsc::Receiver<EngineEvent>, EngineError>;

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, description: SessionDescription)
    -> Result<(), EngineError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    async fn start_local_capture(&self) -> Result<(), EngineError>;

    async fn stop_local_capture(&self) -> Result<(), EngineError>;

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), EngineError>;

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), EngineError>;

    async fn switch_camera(&self) -> Result<CameraFacing, EngineError>;

    async fn collect_stats(&self) -> Result<Vec<RawStatsEntry>, EngineError>;

    async fn close(&self) -> Result<(), EngineError>;

    fn connection_state(&self) -> PeerConnectionState;
}
