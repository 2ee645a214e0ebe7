use crate::signaling::OfferMessage;

/// User intents delivered to the call view model.
#[derive(Debug, Clone, PartialEq)]
pub enum CallUiEvent {
    /// Place a call to the given user id.
    StartCall(String),
    /// Accept an incoming offer.
    AnswerCall(OfferMessage),
    EndCall,
    ToggleCamera(bool),
    ToggleMicrophone(bool),
    SwitchCamera,
    ToggleSpeaker(bool),
    DismissError,
}
