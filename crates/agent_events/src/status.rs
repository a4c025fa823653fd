use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Authoritative lifecycle signal for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Busy,
    /// Transient provider failure; the runtime is still working on the turn.
    Retry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<i64>,
    },
}

impl SessionStatus {
    /// Parses either the bare string form (`"busy"`) or the object form
    /// (`{"type": "retry", "attempt": 2}`). Unknown shapes yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(kind) = value.as_str() {
            return Self::from_parts(kind, None);
        }

        let object = value.as_object()?;
        let kind = object.get("type").and_then(Value::as_str)?;
        Self::from_parts(kind, Some(object))
    }

    fn from_parts(kind: &str, fields: Option<&Map<String, Value>>) -> Option<Self> {
        Some(match kind {
            "idle" => Self::Idle,
            "busy" => Self::Busy,
            "retry" => {
                let field = |key: &str| fields.and_then(|fields| fields.get(key));
                Self::Retry {
                    attempt: field("attempt")
                        .and_then(Value::as_u64)
                        .and_then(|attempt| u32::try_from(attempt).ok()),
                    message: field("message").and_then(Value::as_str).map(str::to_string),
                    next: field("next").and_then(Value::as_i64),
                }
            }
            _ => return None,
        })
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Idle => json!({ "type": "idle" }),
            Self::Busy => json!({ "type": "busy" }),
            Self::Retry {
                attempt,
                message,
                next,
            } => {
                let mut object = Map::new();
                object.insert("type".to_string(), json!("retry"));
                if let Some(attempt) = attempt {
                    object.insert("attempt".to_string(), json!(attempt));
                }
                if let Some(message) = message {
                    object.insert("message".to_string(), json!(message));
                }
                if let Some(next) = next {
                    object.insert("next".to_string(), json!(next));
                }
                Value::Object(object)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Retry { .. } => "retry",
        }
    }

    /// Busy and retry both mean the runtime is still producing output.
    #[must_use]
    pub fn is_working(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}
