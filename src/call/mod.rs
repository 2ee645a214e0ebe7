//! Call lifecycle: the view model driving one call and the state it
//! publishes.

mod error;
mod view_model;

pub use error::CallError;
pub use view_model::{
    CONNECTION_FAILED_MESSAGE, CallRole, CallViewModel, CallViewState, REMOTE_HANGUP_REASON,
};
pub use webrtckit_core::call::*;
