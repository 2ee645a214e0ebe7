//! WebRTCKit: signaling and call-state coordination for peer-to-peer
//! audio/video calls.
//!
//! The crate wraps a WebRTC engine behind [`PeerConnectionEngine`] and drives
//! it from a [`CallViewModel`] whose state a UI layer observes.
//!
//! [`PeerConnectionEngine`]: webrtckit_core::engine::PeerConnectionEngine

pub use webrtckit_core;

pub mod background;
pub mod call;
pub mod config;
pub mod kit;
pub mod peer;
pub mod reconnect;
pub mod signaling;
pub mod stats;
pub mod turn;
pub mod usecase;
pub mod version;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use call::{CallViewModel, CallViewState};
pub use config::KitConfig;
pub use kit::WebRtcKit;
pub use version::{VERSION_NUMBER, VERSION_STRING};
pub use webrtckit_core::signaling::SignalingMessage;
