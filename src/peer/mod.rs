//! Peer connection management on top of a [`PeerConnectionEngine`].
//!
//! [`PeerConnectionEngine`]: webrtckit_core::engine::PeerConnectionEngine

mod events;
mod manager;
#[cfg(feature = "webrtc-engine")]
mod rtc_engine;

pub use events::PeerEventBus;
pub use manager::PeerConnectionManager;
#[cfg(feature = "webrtc-engine")]
pub use rtc_engine::WebRtcEngine;
pub use webrtckit_core::engine::*;
