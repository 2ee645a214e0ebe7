//! Signaling channel between the two peers of a call.
//!
//! # Architecture
//!
//! - [`SignalingRepository`]: session-keyed send/observe operations
//! - [`MemorySignalingStore`]: in-process session documents, shared by
//!   [`MemorySignalingRepository`] handles and used as the local mirror of
//!   [`TransportSignalingRepository`]
//! - [`TransportSignalingRepository`]: JSON envelopes over a WebSocket

mod memory;
mod repository;
mod transport;

pub use memory::{MemorySignalingRepository, MemorySignalingStore};
pub use repository::SignalingRepository;
pub use transport::TransportSignalingRepository;
pub use webrtckit_core::signaling::*;
