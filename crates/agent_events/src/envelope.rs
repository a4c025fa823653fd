use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::delta::PartDelta;
use crate::model::{Role, TokenUsage};
use crate::status::SessionStatus;
use crate::SessionId;

pub const SESSION_STATUS: &str = "session.status";
pub const SESSION_IDLE: &str = "session.idle";
pub const SESSION_ERROR: &str = "session.error";
pub const MESSAGE_UPDATED: &str = "message.updated";
pub const MESSAGE_PART_UPDATED: &str = "message.part.updated";

/// Message snapshot metadata. Only used for token/cost accounting and echo
/// suppression, never as a completion signal.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageInfo {
    pub message_id: Option<String>,
    pub role: Role,
    pub completed_at: Option<i64>,
    pub tokens: Option<TokenUsage>,
    pub cost: Option<f64>,
}

impl MessageInfo {
    /// Accepts `role` at the top level or inside `info`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let info = value.get("info");
        let field = |key: &str| value.get(key).or_else(|| info.and_then(|info| info.get(key)));

        let role = field("role").and_then(Value::as_str).and_then(Role::parse)?;
        let message_id = field("id").and_then(Value::as_str).map(str::to_string);
        let completed_at = field("time")
            .and_then(|time| time.get("completed"))
            .and_then(Value::as_i64);

        Some(Self {
            message_id,
            role,
            completed_at,
            tokens: field("tokens").map(TokenUsage::from_value),
            cost: field("cost").and_then(Value::as_f64),
        })
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut info = Map::new();
        if let Some(message_id) = &self.message_id {
            info.insert("id".to_string(), json!(message_id));
        }
        let mut time = Map::new();
        if let Some(completed_at) = self.completed_at {
            time.insert("completed".to_string(), json!(completed_at));
        }
        info.insert("time".to_string(), Value::Object(time));
        if let Some(tokens) = &self.tokens {
            info.insert("tokens".to_string(), tokens.to_value());
        }
        if let Some(cost) = self.cost {
            info.insert("cost".to_string(), json!(cost));
        }

        json!({ "role": self.role.as_str(), "info": Value::Object(info), "parts": [] })
    }
}

/// Typed payload of an [`Envelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(SessionStatus),
    /// Coarse per-turn boundary; a fallback for [`SessionEvent::Status`] idle.
    Idle,
    Error { message: String },
    MessageUpdated(MessageInfo),
    PartUpdated(PartDelta),
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status(_) => SESSION_STATUS,
            Self::Idle => SESSION_IDLE,
            Self::Error { .. } => SESSION_ERROR,
            Self::MessageUpdated(_) => MESSAGE_UPDATED,
            Self::PartUpdated(_) => MESSAGE_PART_UPDATED,
        }
    }

    fn data(&self) -> Value {
        match self {
            Self::Status(status) => status.to_value(),
            Self::Idle => json!({}),
            Self::Error { message } => json!({ "message": message }),
            Self::MessageUpdated(info) => info.to_value(),
            Self::PartUpdated(delta) => delta.to_value(),
        }
    }

    fn decode(event_type: &str, data: &Value) -> Result<Self, EnvelopeDecodeError> {
        let malformed = || EnvelopeDecodeError::MalformedData {
            event_type: event_type.to_string(),
        };

        match event_type {
            SESSION_STATUS => SessionStatus::from_value(data)
                .map(Self::Status)
                .ok_or_else(malformed),
            SESSION_IDLE => Ok(Self::Idle),
            SESSION_ERROR => {
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown session error");
                Ok(Self::Error {
                    message: message.to_string(),
                })
            }
            MESSAGE_UPDATED => MessageInfo::from_value(data)
                .map(Self::MessageUpdated)
                .ok_or_else(malformed),
            MESSAGE_PART_UPDATED => PartDelta::from_value(data)
                .map(Self::PartUpdated)
                .ok_or_else(malformed),
            other => Err(EnvelopeDecodeError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeDecodeError {
    #[error("unknown envelope type '{0}'")]
    UnknownType(String),
    #[error("malformed data for envelope type '{event_type}'")]
    MalformedData { event_type: String },
}

/// Normalized unit crossing the coordinator -> presentation boundary.
///
/// `session_id` is always the resolved owner. `child_session_id` is set only
/// when the event originated from a nested sub-agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireEnvelope", try_from = "WireEnvelope")]
pub struct Envelope {
    pub session_id: SessionId,
    pub child_session_id: Option<String>,
    pub event: SessionEvent,
}

impl Envelope {
    #[must_use]
    pub fn new(session_id: impl Into<SessionId>, event: SessionEvent) -> Self {
        Self {
            session_id: session_id.into(),
            child_session_id: None,
            event,
        }
    }

    #[must_use]
    pub fn from_child(
        session_id: impl Into<SessionId>,
        child_session_id: impl Into<String>,
        event: SessionEvent,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            child_session_id: Some(child_session_id.into()),
            event,
        }
    }

    #[must_use]
    pub fn is_child(&self) -> bool {
        self.child_session_id.is_some()
    }
}

/// JSON shape of an [`Envelope`]: `{type, sessionId, childSessionId?, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_session_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        Self {
            event_type: envelope.event.event_type().to_string(),
            data: envelope.event.data(),
            session_id: envelope.session_id,
            child_session_id: envelope.child_session_id,
        }
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = EnvelopeDecodeError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let event = SessionEvent::decode(&wire.event_type, &wire.data)?;
        Ok(Self {
            session_id: wire.session_id,
            child_session_id: wire.child_session_id,
            event,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::delta::PartDeltaKind;

    #[test]
    fn status_envelope_uses_camel_case_wire_fields() {
        let envelope = Envelope::from_child(
            "app-1",
            "ses_child",
            SessionEvent::Status(SessionStatus::Busy),
        );
        let value = serde_json::to_value(&envelope).expect("serialize");

        assert_eq!(
            value,
            json!({
                "type": "session.status",
                "sessionId": "app-1",
                "childSessionId": "ses_child",
                "data": { "type": "busy" }
            })
        );
    }

    #[test]
    fn parent_envelope_omits_child_id() {
        let value =
            serde_json::to_value(Envelope::new("app-1", SessionEvent::Idle)).expect("serialize");
        assert!(value.get("childSessionId").is_none());
        assert_eq!(value["type"], "session.idle");
    }

    #[test]
    fn decodes_part_updated_from_wire() {
        let envelope: Envelope = serde_json::from_value(json!({
            "type": "message.part.updated",
            "sessionId": "app-1",
            "data": { "type": "text", "messageID": "msg_1", "delta": "Hel" }
        }))
        .expect("deserialize");

        assert_eq!(envelope.session_id, "app-1");
        assert!(!envelope.is_child());
        assert_matches!(
            envelope.event,
            SessionEvent::PartUpdated(PartDelta {
                kind: PartDeltaKind::Text { .. },
                ..
            })
        );
    }

    #[test]
    fn unknown_type_is_a_decode_error() {
        let result = serde_json::from_value::<Envelope>(json!({
            "type": "file.edited",
            "sessionId": "app-1",
            "data": {}
        }));
        assert!(result.is_err());

        let wire = WireEnvelope {
            event_type: "file.edited".to_string(),
            session_id: "app-1".to_string(),
            child_session_id: None,
            data: json!({}),
        };
        assert_eq!(
            Envelope::try_from(wire),
            Err(EnvelopeDecodeError::UnknownType("file.edited".to_string()))
        );
    }

    #[test]
    fn malformed_status_is_a_decode_error() {
        let wire = WireEnvelope {
            event_type: SESSION_STATUS.to_string(),
            session_id: "app-1".to_string(),
            child_session_id: None,
            data: json!({ "type": "sleeping" }),
        };
        assert_matches!(
            Envelope::try_from(wire),
            Err(EnvelopeDecodeError::MalformedData { .. })
        );
    }

    #[test]
    fn message_info_reads_nested_accounting() {
        let info = MessageInfo::from_value(&json!({
            "role": "assistant",
            "info": {
                "id": "msg_2",
                "time": { "created": 1, "completed": 9 },
                "tokens": { "input": 5, "output": 7 },
                "cost": 0.25
            }
        }))
        .expect("parses");

        assert_eq!(info.message_id.as_deref(), Some("msg_2"));
        assert_eq!(info.completed_at, Some(9));
        assert_eq!(info.tokens.map(|tokens| tokens.output), Some(7));
        assert_eq!(info.cost, Some(0.25));
        assert_eq!(MessageInfo::from_value(&info.to_value()), Some(info));
    }
}
