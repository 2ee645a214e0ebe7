//! Runtime-agnostic core of WebRTCKit.
//!
//! Everything in this crate is either plain data, pure logic, or a trait the
//! platform crate implements. No task is ever spawned from here.

pub mod call;
pub mod engine;
pub mod net;
pub mod reconnect;
pub mod signaling;
pub mod stats;
pub mod turn;
pub mod version;
