//! Normalization of raw `{ "type", "properties" }` runtime events.

use agent_events::{MessageInfo, PartDelta, RuntimeSessionId, SessionEvent, SessionStatus};
use serde_json::Value;

/// A raw runtime event reduced to what the coordinator acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// `session.created` / `session.updated`: parent-of bookkeeping only.
    Lineage {
        session_id: RuntimeSessionId,
        parent_id: Option<RuntimeSessionId>,
    },
    /// An event that is forwarded once its owner is resolved.
    Session {
        session_id: RuntimeSessionId,
        event: SessionEvent,
    },
}

/// Returns `None` for unknown types and for events that cannot be attributed
/// to a runtime session.
#[must_use]
pub fn normalize(raw: &Value) -> Option<RuntimeEvent> {
    let Some(event_type) = raw.get("type").and_then(Value::as_str) else {
        tracing::debug!("dropping runtime event without a type");
        return None;
    };
    let properties = raw.get("properties").unwrap_or(&Value::Null);

    let normalized = match event_type {
        "session.created" | "session.updated" => lineage(properties),
        "session.status" => {
            let status = properties.get("status").and_then(SessionStatus::from_value);
            match status {
                Some(status) => session_event(properties, SessionEvent::Status(status)),
                None => {
                    tracing::debug!(event_type, "dropping malformed session status");
                    return None;
                }
            }
        }
        "session.idle" => session_event(properties, SessionEvent::Idle),
        "session.error" => session_event(
            properties,
            SessionEvent::Error {
                message: error_message(properties.get("error")),
            },
        ),
        "message.updated" => match MessageInfo::from_value(properties) {
            Some(info) => session_event(properties, SessionEvent::MessageUpdated(info)),
            None => {
                tracing::debug!(event_type, "dropping message update without a role");
                return None;
            }
        },
        "message.part.updated" => {
            let part = properties.get("part").unwrap_or(&Value::Null);
            let delta = properties.get("delta").and_then(Value::as_str);
            match PartDelta::from_runtime(part, delta) {
                Some(delta) => session_event(properties, SessionEvent::PartUpdated(delta)),
                None => {
                    tracing::debug!(event_type, "dropping unattributable part");
                    return None;
                }
            }
        }
        other => {
            tracing::debug!(event_type = other, "dropping unknown runtime event");
            return None;
        }
    };

    if normalized.is_none() {
        tracing::debug!(event_type, "dropping runtime event without a session id");
    }
    normalized
}

fn lineage(properties: &Value) -> Option<RuntimeEvent> {
    let info = properties.get("info")?;
    let session_id = info.get("id").and_then(Value::as_str)?;
    let parent_id = info
        .get("parentID")
        .or_else(|| info.get("parentId"))
        .and_then(Value::as_str)
        .filter(|parent| !parent.is_empty());

    Some(RuntimeEvent::Lineage {
        session_id: session_id.to_string(),
        parent_id: parent_id.map(str::to_string),
    })
}

fn session_event(properties: &Value, event: SessionEvent) -> Option<RuntimeEvent> {
    Some(RuntimeEvent::Session {
        session_id: session_id(properties)?,
        event,
    })
}

/// `sessionID` lives at the top level, or inside `part` or `info`.
fn session_id(properties: &Value) -> Option<RuntimeSessionId> {
    [
        properties.get("sessionID"),
        properties.get("part").and_then(|part| part.get("sessionID")),
        properties.get("info").and_then(|info| info.get("sessionID")),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .filter(|id| !id.is_empty())
    .map(str::to_string)
}

fn error_message(error: Option<&Value>) -> String {
    let Some(error) = error else {
        return "unknown session error".to_string();
    };
    if let Some(message) = error.as_str() {
        return message.to_string();
    }
    error
        .get("message")
        .or_else(|| error.get("data").and_then(|data| data.get("message")))
        .or_else(|| error.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown session error")
        .to_string()
}
