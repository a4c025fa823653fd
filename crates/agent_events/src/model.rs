use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// Lifecycle of a tool invocation. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl ToolStatus {
    /// Parses runtime spellings, including the `completed`/`failed` aliases.
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "success" | "completed" => Self::Success,
            "error" | "failed" => Self::Error,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Success | Self::Error => 2,
        }
    }

    /// Returns the status after observing `next`; regressions and terminal flips are ignored.
    #[must_use]
    pub fn advance(self, next: Self) -> Self {
        if self.is_terminal() || next.rank() <= self.rank() {
            self
        } else {
            next
        }
    }
}

/// Lifecycle of a nested sub-agent run. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Running,
    Completed,
    Error,
}

impl SubtaskStatus {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "running" | "busy" | "pending" => Self::Running,
            "completed" | "success" | "idle" => Self::Completed,
            "error" | "failed" => Self::Error,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    #[must_use]
    pub fn advance(self, next: Self) -> Self {
        if self.is_terminal() {
            self
        } else {
            next
        }
    }
}

/// Token accounting reported by the runtime per step or per message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl TokenUsage {
    /// Reads the runtime's `{input, output, reasoning, cache: {read, write}}` shape.
    ///
    /// Missing or non-numeric fields count as zero.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let field = |value: Option<&Value>, key: &str| {
            value
                .and_then(|value| value.get(key))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        let cache = value.get("cache");

        Self {
            input: field(Some(value), "input"),
            output: field(Some(value), "output"),
            reasoning: field(Some(value), "reasoning"),
            cache_read: field(cache, "read"),
            cache_write: field(cache, "write"),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "input": self.input,
            "output": self.output,
            "reasoning": self.reasoning,
            "cache": { "read": self.cache_read, "write": self.cache_write },
        })
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        [self.output, self.reasoning, self.cache_read, self.cache_write]
            .into_iter()
            .fold(self.input, u64::saturating_add)
    }

    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self {
            input: self.input.saturating_add(other.input),
            output: self.output.saturating_add(other.output),
            reasoning: self.reasoning.saturating_add(other.reasoning),
            cache_read: self.cache_read.saturating_add(other.cache_read),
            cache_write: self.cache_write.saturating_add(other.cache_write),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPart {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
    pub status: ToolStatus,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A nested sub-agent run folded into its parent's in-progress message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskPart {
    pub child_session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub status: SubtaskStatus,
    #[serde(default)]
    pub parts: Vec<Part>,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStartPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFinishPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub tokens: TokenUsage,
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionPart {
    #[serde(default)]
    pub auto: bool,
}

/// One typed element of a message transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text(TextPart),
    ToolUse(ToolPart),
    Subtask(SubtaskPart),
    Reasoning(ReasoningPart),
    StepStart(StepStartPart),
    StepFinish(StepFinishPart),
    Compaction(CompactionPart),
}

impl Part {
    /// Returns true while a tool call or sub-agent run has not reached a terminal status.
    #[must_use]
    pub fn is_active(&self) -> bool {
        match self {
            Self::ToolUse(tool) => !tool.status.is_terminal(),
            Self::Subtask(subtask) => {
                !subtask.status.is_terminal() || subtask.parts.iter().any(Part::is_active)
            }
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::ToolUse(_) => "tool_use",
            Self::Subtask(_) => "subtask",
            Self::Reasoning(_) => "reasoning",
            Self::StepStart(_) => "step_start",
            Self::StepFinish(_) => "step_finish",
            Self::Compaction(_) => "compaction",
        }
    }
}

/// One turn's output as persisted by the message store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Message {
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role, created_at: i64, parts: Vec<Part>) -> Self {
        Self {
            id: id.into(),
            role,
            created_at,
            completed_at: None,
            parts,
            tokens: None,
            cost: None,
        }
    }

    #[must_use]
    pub fn has_active_parts(&self) -> bool {
        self.parts.iter().any(Part::is_active)
    }

    /// Concatenated text of all `text` parts, in order.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect()
    }
}
