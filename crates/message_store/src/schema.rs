use agent_events::Message;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRecordType {
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRecordType {
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogHeader {
    #[serde(rename = "type")]
    pub record_type: LogRecordType,
    pub version: u32,
    pub session_id: String,
    pub created_at: String,
}

impl LogHeader {
    #[must_use]
    pub fn v1(session_id: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            record_type: LogRecordType::Session,
            version: 1,
            session_id: session_id.into(),
            created_at: created_at.into(),
        }
    }
}

/// One committed message, appended once and never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageRecord {
    #[serde(rename = "type")]
    pub record_type: MessageRecordType,
    pub ts: String,
    pub message: Message,
}

impl MessageRecord {
    #[must_use]
    pub fn new(ts: impl Into<String>, message: Message) -> Self {
        Self {
            record_type: MessageRecordType::Message,
            ts: ts.into(),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JsonLine {
    Session(LogHeader),
    Message(MessageRecord),
}

impl JsonLine {
    /// Dispatches on the `type` field; records keep that field, so the tag is
    /// read before the whole object is handed to the record struct.
    pub(crate) fn from_str(line: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        match value.get("type").and_then(serde_json::Value::as_str) {
            Some("message") => serde_json::from_value(value).map(Self::Message),
            _ => serde_json::from_value(value).map(Self::Session),
        }
    }
}
