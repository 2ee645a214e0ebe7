use serde::{Deserialize, Serialize};

use super::error::SignalingError;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Discriminant of a [`SignalingMessage`], matching the wire `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Offer,
    Answer,
    IceCandidate,
    TurnCredential,
    Hangup,
}

impl MessageType {
    pub fn tag_name(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::TurnCredential => "turn-credential",
            Self::Hangup => "hangup",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "ice-candidate" => Some(Self::IceCandidate),
            "turn-credential" => Some(Self::TurnCredential),
            "hangup" => Some(Self::Hangup),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP blob together with its role in the negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate as produced and consumed by the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate line (e.g., "candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host")
    pub candidate: String,
    /// SDP media stream identification (e.g., "0" for audio)
    pub sdp_mid: Option<String>,
    /// SDP media line index
    pub sdp_m_line_index: Option<u16>,
    /// Username fragment for ICE
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    pub fn with_sdp_mid(mut self, sdp_mid: impl Into<String>) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self
    }

    pub fn with_sdp_m_line_index(mut self, index: u16) -> Self {
        self.sdp_m_line_index = Some(index);
        self
    }

    pub fn with_username_fragment(mut self, ufrag: impl Into<String>) -> Self {
        self.username_fragment = Some(ufrag.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferMessage {
    pub session_id: String,
    pub sdp: String,
    pub caller_id: String,
    pub callee_id: String,
    #[serde(default = "now_millis")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerMessage {
    pub session_id: String,
    pub sdp: String,
    pub callee_id: String,
    #[serde(default = "now_millis")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateMessage {
    pub session_id: String,
    #[serde(default)]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: u16,
    pub sdp_candidate: String,
    #[serde(default = "now_millis")]
    pub timestamp: i64,
}

impl IceCandidateMessage {
    pub fn to_candidate(&self) -> IceCandidate {
        let candidate = IceCandidate::new(self.sdp_candidate.clone())
            .with_sdp_m_line_index(self.sdp_m_line_index);
        if self.sdp_mid.is_empty() {
            candidate
        } else {
            candidate.with_sdp_mid(self.sdp_mid.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCredentialMessage {
    pub session_id: String,
    pub username: String,
    pub password: String,
    pub ttl: i64,
    pub urls: Vec<String>,
    #[serde(default = "now_millis")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangupMessage {
    pub session_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default = "now_millis")]
    pub timestamp: i64,
}

/// A message exchanged between peers through the signaling channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalingMessage {
    #[serde(rename = "offer")]
    Offer(OfferMessage),
    #[serde(rename = "answer")]
    Answer(AnswerMessage),
    #[serde(rename = "ice-candidate")]
    IceCandidate(IceCandidateMessage),
    #[serde(rename = "turn-credential")]
    TurnCredential(TurnCredentialMessage),
    #[serde(rename = "hangup")]
    Hangup(HangupMessage),
}

impl SignalingMessage {
    pub fn offer(
        session_id: impl Into<String>,
        sdp: impl Into<String>,
        caller_id: impl Into<String>,
        callee_id: impl Into<String>,
    ) -> Self {
        Self::Offer(OfferMessage {
            session_id: session_id.into(),
            sdp: sdp.into(),
            caller_id: caller_id.into(),
            callee_id: callee_id.into(),
            timestamp: now_millis(),
        })
    }

    pub fn answer(
        session_id: impl Into<String>,
        sdp: impl Into<String>,
        callee_id: impl Into<String>,
    ) -> Self {
        Self::Answer(AnswerMessage {
            session_id: session_id.into(),
            sdp: sdp.into(),
            callee_id: callee_id.into(),
            timestamp: now_millis(),
        })
    }

    pub fn ice_candidate(session_id: impl Into<String>, candidate: &IceCandidate) -> Self {
        Self::IceCandidate(IceCandidateMessage {
            session_id: session_id.into(),
            sdp_mid: candidate.sdp_mid.clone().unwrap_or_default(),
            sdp_m_line_index: candidate.sdp_m_line_index.unwrap_or(0),
            sdp_candidate: candidate.candidate.clone(),
            timestamp: now_millis(),
        })
    }

    pub fn hangup(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self::Hangup(HangupMessage {
            session_id: session_id.into(),
            user_id: user_id.into(),
            reason,
            timestamp: now_millis(),
        })
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::Offer(m) => &m.session_id,
            Self::Answer(m) => &m.session_id,
            Self::IceCandidate(m) => &m.session_id,
            Self::TurnCredential(m) => &m.session_id,
            Self::Hangup(m) => &m.session_id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Offer(_) => MessageType::Offer,
            Self::Answer(_) => MessageType::Answer,
            Self::IceCandidate(_) => MessageType::IceCandidate,
            Self::TurnCredential(_) => MessageType::TurnCredential,
            Self::Hangup(_) => MessageType::Hangup,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Offer(m) => m.timestamp,
            Self::Answer(m) => m.timestamp,
            Self::IceCandidate(m) => m.timestamp,
            Self::TurnCredential(m) => m.timestamp,
            Self::Hangup(m) => m.timestamp,
        }
    }

    /// The SDP carried by an offer or answer.
    pub fn session_description(&self) -> Option<SessionDescription> {
        match self {
            Self::Offer(m) => Some(SessionDescription::offer(m.sdp.clone())),
            Self::Answer(m) => Some(SessionDescription::answer(m.sdp.clone())),
            _ => None,
        }
    }

    /// Structural checks a receiver applies before acting on a message.
    pub fn validate(&self) -> Result<(), SignalingError> {
        if self.session_id().is_empty() {
            return Err(SignalingError::Invalid("empty sessionId"));
        }
        match self {
            Self::Offer(m) if m.sdp.is_empty() => Err(SignalingError::Invalid("empty offer sdp")),
            Self::Answer(m) if m.sdp.is_empty() => {
                Err(SignalingError::Invalid("empty answer sdp"))
            }
            Self::IceCandidate(m) if m.sdp_candidate.is_empty() => {
                Err(SignalingError::Invalid("empty sdpCandidate"))
            }
            Self::TurnCredential(m) if m.urls.is_empty() => {
                Err(SignalingError::Invalid("turn credential without urls"))
            }
            Self::TurnCredential(m) if m.ttl <= 0 => {
                Err(SignalingError::Invalid("non-positive turn credential ttl"))
            }
            _ => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a message, reporting an unrecognised `type` separately from
    /// malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, SignalingError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, SignalingError> {
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(SignalingError::Invalid("missing type"))?;
        if MessageType::from_tag(tag).is_none() {
            return Err(SignalingError::UnknownType(tag.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Frame relayed by a signaling server. `candidate_id` lets receivers
/// deduplicate ICE candidates that are delivered more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    pub message: SignalingMessage,
}

impl SignalingEnvelope {
    pub fn new(message: SignalingMessage) -> Self {
        Self {
            candidate_id: None,
            message,
        }
    }

    pub fn with_candidate_id(mut self, candidate_id: impl Into<String>) -> Self {
        self.candidate_id = Some(candidate_id.into());
        self
    }

    pub fn to_json(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SignalingError> {
        let mut value: serde_json::Value = serde_json::from_str(json)?;
        let message = value
            .get_mut("message")
            .map(serde_json::Value::take)
            .ok_or(SignalingError::Invalid("missing message"))?;
        let candidate_id = value
            .get("candidateId")
            .and_then(|c| c.as_str())
            .map(str::to_string);
        Ok(Self {
            candidate_id,
            message: SignalingMessage::from_value(message)?,
        })
    }
}
