//! Wire-level signaling schema.
//!
//! Messages are JSON objects tagged by `"type"` with camelCase fields, e.g.
//!
//! ```json
//! {"type":"offer","sessionId":"s1","sdp":"v=0...","callerId":"alice","calleeId":"bob","timestamp":1700000000000}
//! ```

mod error;
mod message;

pub use error::SignalingError;
pub use message::{
    AnswerMessage, HangupMessage, IceCandidate, IceCandidateMessage, MessageType, OfferMessage,
    SdpType, SessionDescription, SignalingEnvelope, SignalingMessage, TurnCredentialMessage,
    now_millis,
};
