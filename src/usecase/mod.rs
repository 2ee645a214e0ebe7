//! The steps of a call, each driving the peer connection and signaling in
//! a fixed order.

mod add_ice_candidate;
mod answer_call;
mod create_offer;
mod end_call;

pub use add_ice_candidate::AddIceCandidateUseCase;
pub use answer_call::AnswerCallUseCase;
pub use create_offer::CreateOfferUseCase;
pub use end_call::{END_REASON_USER, EndCallUseCase};
