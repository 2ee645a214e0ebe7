//! Call state machine implementation.

use serde::Serialize;

/// Reason recorded when the media path drops without a hangup.
pub const CONNECTION_LOST_REASON: &str = "Connection lost";

/// Current state of a call as observed by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", content = "detail", rename_all = "camelCase")]
pub enum CallState {
    /// No call in progress.
    #[default]
    Idle,
    /// Credentials, peer connection and local media are being prepared.
    Connecting,
    /// Offer sent, waiting for the callee's answer.
    WaitingForAnswer(String),
    /// Media path established for the session.
    Connected(String),
    /// Local hangup in progress.
    Ending,
    /// Call finished, optionally with a reason.
    Ended(Option<String>),
    /// Call failed; must be dismissed before the next call.
    Error(String),
}

impl CallState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::WaitingForAnswer(_) | Self::Connected(_)
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended(_) | Self::Error(_))
    }

    pub fn can_dial(&self) -> bool {
        matches!(self, Self::Idle | Self::Ended(_))
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::WaitingForAnswer(sid) | Self::Connected(sid) => Some(sid),
            _ => None,
        }
    }

    /// Computes the state reached by `transition`, leaving `self` untouched.
    pub fn next(&self, transition: CallTransition) -> Result<CallState, InvalidTransition> {
        let next = match (self, transition) {
            (Self::Idle | Self::Ended(_), CallTransition::Dial) => Self::Connecting,
            (Self::Connecting, CallTransition::OfferSent(sid)) => Self::WaitingForAnswer(sid),
            (Self::Connecting, CallTransition::Answered(sid)) => Self::Connected(sid),
            (
                Self::Connecting | Self::WaitingForAnswer(_),
                CallTransition::AnswerReceived(sid) | CallTransition::MediaConnected(sid),
            ) => Self::Connected(sid),
            (Self::Connected(current), CallTransition::MediaConnected(sid)) if *current == sid => {
                Self::Connected(sid)
            }
            (state, CallTransition::Hangup) if state.is_active() => Self::Ending,
            (Self::Ending, CallTransition::Finished(reason)) => Self::Ended(reason),
            (state, CallTransition::Finished(reason)) if state.is_active() => Self::Ended(reason),
            (state, CallTransition::ConnectionLost) if state.is_active() => {
                Self::Ended(Some(CONNECTION_LOST_REASON.to_string()))
            }
            (_, CallTransition::Failed(message)) => Self::Error(message),
            (Self::Error(_), CallTransition::DismissError) => Self::Idle,
            (Self::Ended(_) | Self::Error(_), CallTransition::Reset) => Self::Idle,
            (state, attempted) => {
                return Err(InvalidTransition {
                    current_state: format!("{state:?}"),
                    attempted: format!("{attempted:?}"),
                });
            }
        };
        Ok(next)
    }

    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        *self = self.next(transition)?;
        Ok(())
    }
}

/// State transitions for calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTransition {
    /// Outgoing call requested.
    Dial,
    /// Local offer published for the session.
    OfferSent(String),
    /// Remote answer applied on the caller side.
    AnswerReceived(String),
    /// Local answer published on the callee side.
    Answered(String),
    /// Engine reported the peer connection as connected.
    MediaConnected(String),
    /// Local hangup started.
    Hangup,
    /// Call torn down.
    Finished(Option<String>),
    /// Engine reported the peer connection as disconnected.
    ConnectionLost,
    Failed(String),
    DismissError,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> String {
        "5f0c1a3e-2b1d-4c55-9a8e-1f2d3c4b5a69".to_string()
    }

    /// Test complete outgoing call flow.
    /// Flow: Idle → Connecting → WaitingForAnswer → Connected → Ending → Ended
    #[test]
    fn test_outgoing_call_flow() {
        let mut state = CallState::default();
        assert_eq!(state, CallState::Idle);

        state.apply_transition(CallTransition::Dial).unwrap();
        assert_eq!(state, CallState::Connecting);
        assert!(state.is_active());

        state.apply_transition(CallTransition::OfferSent(sid())).unwrap();
        assert_eq!(state.session_id(), Some(sid().as_str()));

        state
            .apply_transition(CallTransition::AnswerReceived(sid()))
            .unwrap();
        assert!(state.is_connected());

        state.apply_transition(CallTransition::Hangup).unwrap();
        assert_eq!(state, CallState::Ending);

        state.apply_transition(CallTransition::Finished(None)).unwrap();
        assert_eq!(state, CallState::Ended(None));
        assert!(state.is_terminal());
    }

    /// Test incoming call flow.
    /// Flow: Idle → Connecting → Connected
    #[test]
    fn test_incoming_call_flow() {
        let mut state = CallState::Idle;
        state.apply_transition(CallTransition::Dial).unwrap();
        state.apply_transition(CallTransition::Answered(sid())).unwrap();
        assert_eq!(state, CallState::Connected(sid()));
    }

    /// Engine reporting connected again for the same session is accepted.
    #[test]
    fn test_media_connected_is_idempotent() {
        let mut state = CallState::Connected(sid());
        state
            .apply_transition(CallTransition::MediaConnected(sid()))
            .unwrap();
        assert_eq!(state, CallState::Connected(sid()));

        let err = state
            .apply_transition(CallTransition::MediaConnected("other".into()))
            .unwrap_err();
        assert!(err.attempted.contains("MediaConnected"));
    }

    #[test]
    fn test_connection_lost_ends_with_reason() {
        let mut state = CallState::WaitingForAnswer(sid());
        state.apply_transition(CallTransition::ConnectionLost).unwrap();
        assert_eq!(state, CallState::Ended(Some("Connection lost".into())));
    }

    #[test]
    fn test_failure_from_any_state_then_dismiss() {
        for start in [
            CallState::Idle,
            CallState::Connecting,
            CallState::Connected(sid()),
            CallState::Ending,
        ] {
            let mut state = start;
            state
                .apply_transition(CallTransition::Failed("boom".into()))
                .unwrap();
            assert_eq!(state, CallState::Error("boom".into()));
            state.apply_transition(CallTransition::DismissError).unwrap();
            assert_eq!(state, CallState::Idle);
        }
    }

    /// A failed call must be dismissed before dialing again.
    #[test]
    fn test_cannot_dial_from_error() {
        let state = CallState::Error("x".into());
        assert!(!state.can_dial());
        let err = state.next(CallTransition::Dial).unwrap_err();
        assert_eq!(err.to_string(), "invalid transition Dial in state Error(\"x\")");
    }

    #[test]
    fn test_hangup_requires_active_call() {
        assert!(CallState::Idle.next(CallTransition::Hangup).is_err());
        assert!(CallState::Ended(None).next(CallTransition::Hangup).is_err());
        assert_eq!(
            CallState::Connecting.next(CallTransition::Hangup).unwrap(),
            CallState::Ending
        );
    }

    #[test]
    fn test_redial_after_ended() {
        let state = CallState::Ended(Some("Connection lost".into()));
        assert_eq!(state.next(CallTransition::Dial).unwrap(), CallState::Connecting);
        assert_eq!(state.next(CallTransition::Reset).unwrap(), CallState::Idle);
    }

    #[test]
    fn test_dismiss_outside_error_is_rejected() {
        assert!(CallState::Idle.next(CallTransition::DismissError).is_err());
    }
}
