use serde_json::{json, Map, Value};

use crate::model::{SubtaskStatus, TokenUsage, ToolStatus};

/// One incremental transcript change carried by `message.part.updated`.
#[derive(Debug, Clone, PartialEq)]
pub struct PartDelta {
    /// Runtime message the part belongs to, used for echo suppression.
    pub message_id: Option<String>,
    pub kind: PartDeltaKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartDeltaKind {
    /// `delta` is an increment; `text` is the full text so far. Either may be absent.
    Text {
        part_id: Option<String>,
        text: Option<String>,
        delta: Option<String>,
    },
    Reasoning {
        part_id: Option<String>,
        text: Option<String>,
        delta: Option<String>,
    },
    Tool {
        call_id: String,
        name: Option<String>,
        input: Option<Value>,
        status: Option<ToolStatus>,
        output: Option<String>,
        error: Option<String>,
        started_at: Option<i64>,
        finished_at: Option<i64>,
    },
    /// Change attributed to a nested sub-agent run. `inner` carries the child's
    /// own part delta; `status` carries lifecycle changes of the child session.
    Subtask {
        child_session_id: String,
        description: Option<String>,
        agent: Option<String>,
        status: Option<SubtaskStatus>,
        error: Option<String>,
        inner: Option<Box<PartDelta>>,
    },
    StepStart {
        part_id: Option<String>,
    },
    StepFinish {
        reason: Option<String>,
        tokens: TokenUsage,
        cost: f64,
    },
    Compaction {
        auto: bool,
    },
}

impl PartDelta {
    #[must_use]
    pub fn new(message_id: Option<String>, kind: PartDeltaKind) -> Self {
        Self { message_id, kind }
    }

    /// Wraps a child session's own delta so it lands in that child's subtask part.
    #[must_use]
    pub fn for_child(child_session_id: impl Into<String>, inner: PartDelta) -> Self {
        Self {
            message_id: None,
            kind: PartDeltaKind::Subtask {
                child_session_id: child_session_id.into(),
                description: None,
                agent: None,
                status: None,
                error: None,
                inner: Some(Box::new(inner)),
            },
        }
    }

    /// Lifecycle-only change for a child session's subtask part.
    #[must_use]
    pub fn child_status(
        child_session_id: impl Into<String>,
        status: SubtaskStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            message_id: None,
            kind: PartDeltaKind::Subtask {
                child_session_id: child_session_id.into(),
                description: None,
                agent: None,
                status: Some(status),
                error,
                inner: None,
            },
        }
    }

    /// Parses a part object that may carry its own `delta` field.
    pub fn from_value(value: &Value) -> Option<Self> {
        let delta = value.get("delta").and_then(Value::as_str);
        Self::from_runtime(value, delta)
    }

    /// Parses a runtime part object plus the optional streamed increment that
    /// accompanied it. Returns `None` only when the part cannot be attributed
    /// (unknown type, tool without any identifier, subtask without a child id).
    pub fn from_runtime(part: &Value, delta: Option<&str>) -> Option<Self> {
        let object = part.as_object()?;
        let part_type = str_field(object, &["type"]).unwrap_or("text");
        let message_id = str_field(object, &["messageID", "messageId", "message_id"])
            .map(str::to_string);
        let part_id = str_field(object, &["id"]).map(str::to_string);

        let kind = match part_type {
            "text" => {
                let text = str_field(object, &["text"]).map(str::to_string);
                let delta = delta.map(str::to_string);
                if text.is_none() && delta.is_none() {
                    return None;
                }
                PartDeltaKind::Text {
                    part_id,
                    text,
                    delta,
                }
            }
            "reasoning" => {
                let text = str_field(object, &["text"]).map(str::to_string);
                let delta = delta.map(str::to_string);
                if text.is_none() && delta.is_none() {
                    return None;
                }
                PartDeltaKind::Reasoning {
                    part_id,
                    text,
                    delta,
                }
            }
            "tool" | "tool-invocation" | "tool_use" => parse_tool(object, part_id)?,
            "subtask" => {
                let child_session_id =
                    str_field(object, &["childSessionID", "childSessionId"])?
                        .to_string();
                let inner = object
                    .get("part")
                    .and_then(Self::from_value)
                    .map(Box::new);
                PartDeltaKind::Subtask {
                    child_session_id,
                    description: str_field(object, &["description", "prompt"])
                        .map(str::to_string),
                    agent: str_field(object, &["agent"]).map(str::to_string),
                    status: str_field(object, &["status"]).and_then(SubtaskStatus::parse),
                    error: str_field(object, &["error"]).map(str::to_string),
                    inner,
                }
            }
            "step-start" | "step_start" => PartDeltaKind::StepStart { part_id },
            "step-finish" | "step_finish" => PartDeltaKind::StepFinish {
                reason: str_field(object, &["reason"]).map(str::to_string),
                tokens: object
                    .get("tokens")
                    .map(TokenUsage::from_value)
                    .unwrap_or_default(),
                cost: object.get("cost").and_then(Value::as_f64).unwrap_or(0.0),
            },
            "compaction" => PartDeltaKind::Compaction {
                auto: object.get("auto").and_then(Value::as_bool).unwrap_or(false),
            },
            _ => return None,
        };

        Some(Self { message_id, kind })
    }

    /// Canonical wire form, readable by [`PartDelta::from_value`].
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        if let Some(message_id) = &self.message_id {
            object.insert("messageID".to_string(), json!(message_id));
        }

        match &self.kind {
            PartDeltaKind::Text {
                part_id,
                text,
                delta,
            }
            | PartDeltaKind::Reasoning {
                part_id,
                text,
                delta,
            } => {
                let part_type = if matches!(self.kind, PartDeltaKind::Text { .. }) {
                    "text"
                } else {
                    "reasoning"
                };
                object.insert("type".to_string(), json!(part_type));
                insert_opt(&mut object, "id", part_id.as_ref().map(|id| json!(id)));
                insert_opt(&mut object, "text", text.as_ref().map(|text| json!(text)));
                insert_opt(&mut object, "delta", delta.as_ref().map(|delta| json!(delta)));
            }
            PartDeltaKind::Tool {
                call_id,
                name,
                input,
                status,
                output,
                error,
                started_at,
                finished_at,
            } => {
                object.insert("type".to_string(), json!("tool"));
                object.insert("callID".to_string(), json!(call_id));
                insert_opt(&mut object, "tool", name.as_ref().map(|name| json!(name)));

                let mut state = Map::new();
                insert_opt(&mut state, "status", status.map(|status| json!(status.as_str())));
                insert_opt(&mut state, "input", input.clone());
                insert_opt(&mut state, "output", output.as_ref().map(|output| json!(output)));
                insert_opt(&mut state, "error", error.as_ref().map(|error| json!(error)));

                let mut time = Map::new();
                insert_opt(&mut time, "start", started_at.map(|start| json!(start)));
                insert_opt(&mut time, "end", finished_at.map(|end| json!(end)));
                if !time.is_empty() {
                    state.insert("time".to_string(), Value::Object(time));
                }
                object.insert("state".to_string(), Value::Object(state));
            }
            PartDeltaKind::Subtask {
                child_session_id,
                description,
                agent,
                status,
                error,
                inner,
            } => {
                object.insert("type".to_string(), json!("subtask"));
                object.insert("childSessionID".to_string(), json!(child_session_id));
                insert_opt(
                    &mut object,
                    "description",
                    description.as_ref().map(|description| json!(description)),
                );
                insert_opt(&mut object, "agent", agent.as_ref().map(|agent| json!(agent)));
                insert_opt(&mut object, "status", status.map(|status| json!(status.as_str())));
                insert_opt(&mut object, "error", error.as_ref().map(|error| json!(error)));
                insert_opt(&mut object, "part", inner.as_ref().map(|inner| inner.to_value()));
            }
            PartDeltaKind::StepStart { part_id } => {
                object.insert("type".to_string(), json!("step-start"));
                insert_opt(&mut object, "id", part_id.as_ref().map(|id| json!(id)));
            }
            PartDeltaKind::StepFinish {
                reason,
                tokens,
                cost,
            } => {
                object.insert("type".to_string(), json!("step-finish"));
                insert_opt(&mut object, "reason", reason.as_ref().map(|reason| json!(reason)));
                object.insert("tokens".to_string(), tokens.to_value());
                object.insert("cost".to_string(), json!(cost));
            }
            PartDeltaKind::Compaction { auto } => {
                object.insert("type".to_string(), json!("compaction"));
                object.insert("auto".to_string(), json!(auto));
            }
        }

        Value::Object(object)
    }
}

fn parse_tool(object: &Map<String, Value>, part_id: Option<String>) -> Option<PartDeltaKind> {
    let call_id = str_field(object, &["callID", "callId", "call_id"])
        .map(str::to_string)
        .or(part_id)?;
    let name = str_field(object, &["tool", "name"]).map(str::to_string);

    let state = object.get("state");
    let state_object = state.and_then(Value::as_object);
    let status = match state {
        Some(Value::String(status)) => ToolStatus::parse(status),
        _ => state_object
            .and_then(|state| str_field(state, &["status"]))
            .and_then(ToolStatus::parse),
    };

    let input = state_object
        .and_then(|state| state.get("input"))
        .or_else(|| object.get("input"))
        .or_else(|| object.get("args"))
        .cloned();
    let output = state_object
        .and_then(|state| state.get("output"))
        .or_else(|| object.get("result"))
        .and_then(value_to_text);
    let error = state_object
        .and_then(|state| state.get("error"))
        .or_else(|| object.get("error"))
        .and_then(error_text);

    let time = state_object.and_then(|state| state.get("time"));
    let started_at = time.and_then(|time| time.get("start")).and_then(Value::as_i64);
    let finished_at = time.and_then(|time| time.get("end")).and_then(Value::as_i64);

    Some(PartDeltaKind::Tool {
        call_id,
        name,
        input,
        status,
        output,
        error,
        started_at,
        finished_at,
    })
}

fn str_field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Object(object) => str_field(object, &["message", "name"]).map(str::to_string),
        other => value_to_text(other),
    }
}

fn insert_opt(object: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        object.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn text_part_with_streamed_delta() {
        let delta = PartDelta::from_runtime(
            &json!({
                "id": "prt_1",
                "sessionID": "ses_1",
                "messageID": "msg_1",
                "type": "text",
                "text": "Hello wor"
            }),
            Some("wor"),
        )
        .expect("text part parses");

        assert_eq!(delta.message_id.as_deref(), Some("msg_1"));
        assert_eq!(
            delta.kind,
            PartDeltaKind::Text {
                part_id: Some("prt_1".to_string()),
                text: Some("Hello wor".to_string()),
                delta: Some("wor".to_string()),
            }
        );
    }

    #[test]
    fn text_part_without_content_is_dropped() {
        assert_eq!(PartDelta::from_value(&json!({ "type": "text" })), None);
    }

    #[test]
    fn tool_part_reads_nested_state_object() {
        let delta = PartDelta::from_value(&json!({
            "type": "tool",
            "callID": "call_9",
            "tool": "bash",
            "state": {
                "status": "completed",
                "input": { "command": "ls" },
                "output": "Cargo.toml",
                "time": { "start": 10, "end": 20 }
            }
        }))
        .expect("tool part parses");

        assert_eq!(
            delta.kind,
            PartDeltaKind::Tool {
                call_id: "call_9".to_string(),
                name: Some("bash".to_string()),
                input: Some(json!({ "command": "ls" })),
                status: Some(ToolStatus::Success),
                output: Some("Cargo.toml".to_string()),
                error: None,
                started_at: Some(10),
                finished_at: Some(20),
            }
        );
    }

    #[test]
    fn legacy_tool_invocation_shape_is_accepted() {
        let delta = PartDelta::from_value(&json!({
            "type": "tool-invocation",
            "id": "prt_7",
            "tool": "read",
            "args": { "path": "a.rs" },
            "state": "failed",
            "error": { "message": "not found" }
        }))
        .expect("legacy tool parses");

        assert_matches!(
            delta.kind,
            PartDeltaKind::Tool {
                ref call_id,
                status: Some(ToolStatus::Error),
                ref error,
                ..
            } if call_id == "prt_7" && error.as_deref() == Some("not found")
        );
    }

    #[test]
    fn tool_without_any_identifier_is_dropped() {
        assert_eq!(
            PartDelta::from_value(&json!({ "type": "tool", "tool": "bash" })),
            None
        );
    }

    #[test]
    fn step_finish_defaults_missing_accounting_to_zero() {
        let delta = PartDelta::from_value(&json!({ "type": "step-finish" })).expect("parses");
        assert_eq!(
            delta.kind,
            PartDeltaKind::StepFinish {
                reason: None,
                tokens: TokenUsage::default(),
                cost: 0.0,
            }
        );
    }

    #[test]
    fn unknown_part_type_is_dropped() {
        assert_eq!(PartDelta::from_value(&json!({ "type": "snapshot" })), None);
        assert_eq!(PartDelta::from_value(&json!("text")), None);
    }

    #[test]
    fn child_wrapper_survives_wire_form() {
        let inner = PartDelta::new(
            Some("msg_child".to_string()),
            PartDeltaKind::Text {
                part_id: None,
                text: None,
                delta: Some("nested".to_string()),
            },
        );
        let wrapped = PartDelta::for_child("ses_child", inner);

        assert_eq!(PartDelta::from_value(&wrapped.to_value()), Some(wrapped));
    }

    #[test]
    fn tool_wire_form_is_readable() {
        let tool = PartDelta::new(
            None,
            PartDeltaKind::Tool {
                call_id: "c1".to_string(),
                name: Some("grep".to_string()),
                input: Some(json!({ "pattern": "fn" })),
                status: Some(ToolStatus::Running),
                output: None,
                error: None,
                started_at: Some(3),
                finished_at: None,
            },
        );

        assert_eq!(PartDelta::from_value(&tool.to_value()), Some(tool));
    }
}
