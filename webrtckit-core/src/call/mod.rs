//! Call lifecycle model shared by every platform layer.
//!
//! # Architecture
//!
//! - [`state`]: the call state machine and its transition table
//! - [`controls`]: media toggles and counters shown next to the call
//! - [`event`]: user intents the view model consumes

pub mod controls;
pub mod event;
pub mod state;

pub use controls::CallControlsState;
pub use event::CallUiEvent;
pub use state::{CallState, CallTransition, InvalidTransition};
