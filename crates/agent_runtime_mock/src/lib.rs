//! Deterministic scripted agent runtime.
//!
//! Produces the raw `{ "type", "properties" }` event objects an agent runtime
//! streams, so the session coordinator can be exercised without a live
//! backend. Scripts are built per runtime session and replayed in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::{json, Map, Value};

/// Canned raw event constructors.
pub mod events {
    use serde_json::{json, Value};

    #[must_use]
    pub fn raw(event_type: &str, properties: Value) -> Value {
        json!({ "type": event_type, "properties": properties })
    }

    #[must_use]
    pub fn session_created(id: &str, parent_id: Option<&str>) -> Value {
        let mut info = json!({ "id": id });
        if let Some(parent_id) = parent_id {
            info["parentID"] = json!(parent_id);
        }
        raw("session.created", json!({ "info": info }))
    }

    #[must_use]
    pub fn status(session_id: &str, status: &str) -> Value {
        raw(
            "session.status",
            json!({ "sessionID": session_id, "status": { "type": status } }),
        )
    }

    #[must_use]
    pub fn retry(session_id: &str, attempt: u32, message: &str) -> Value {
        raw(
            "session.status",
            json!({
                "sessionID": session_id,
                "status": { "type": "retry", "attempt": attempt, "message": message },
            }),
        )
    }

    #[must_use]
    pub fn idle(session_id: &str) -> Value {
        raw("session.idle", json!({ "sessionID": session_id }))
    }

    #[must_use]
    pub fn error(session_id: &str, message: &str) -> Value {
        raw(
            "session.error",
            json!({
                "sessionID": session_id,
                "error": { "name": "UnknownError", "message": message },
            }),
        )
    }

    #[must_use]
    pub fn message(session_id: &str, message_id: &str, role: &str) -> Value {
        raw(
            "message.updated",
            json!({ "info": { "id": message_id, "sessionID": session_id, "role": role } }),
        )
    }

    #[must_use]
    pub fn message_completed(
        session_id: &str,
        message_id: &str,
        completed_at: i64,
        tokens: Value,
        cost: f64,
    ) -> Value {
        raw(
            "message.updated",
            json!({
                "info": {
                    "id": message_id,
                    "sessionID": session_id,
                    "role": "assistant",
                    "time": { "completed": completed_at },
                    "tokens": tokens,
                    "cost": cost,
                },
            }),
        )
    }

    /// `part` must already carry `sessionID`.
    #[must_use]
    pub fn part(part: Value, delta: Option<&str>) -> Value {
        let mut properties = json!({ "part": part });
        if let Some(delta) = delta {
            properties["delta"] = json!(delta);
        }
        raw("message.part.updated", properties)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Emit(Value),
    Pause(Duration),
}

/// Builder for the event stream of one or more runtime sessions.
///
/// Every part helper attributes the event to the currently selected session
/// and message (see [`Script::session`] and [`Script::assistant`]).
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<ScriptStep>,
    session_id: String,
    message_id: String,
    next_part: u32,
    token_pause: Option<Duration>,
}

impl Script {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Pause inserted after every streamed text token.
    #[must_use]
    pub fn token_pause(mut self, pause: Duration) -> Self {
        self.token_pause = Some(pause);
        self
    }

    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    #[must_use]
    pub fn raw(mut self, event: Value) -> Self {
        self.steps.push(ScriptStep::Emit(event));
        self
    }

    #[must_use]
    pub fn pause(mut self, pause: Duration) -> Self {
        self.steps.push(ScriptStep::Pause(pause));
        self
    }

    #[must_use]
    pub fn child_created(self, child_id: &str, parent_id: &str) -> Self {
        self.raw(events::session_created(child_id, Some(parent_id)))
    }

    #[must_use]
    pub fn busy(self) -> Self {
        self.status("busy")
    }

    /// Authoritative `session.status` change, e.g. `"idle"`.
    #[must_use]
    pub fn status(self, status: &str) -> Self {
        let event = events::status(&self.session_id, status);
        self.raw(event)
    }

    #[must_use]
    pub fn retry(self, attempt: u32, message: &str) -> Self {
        let event = events::retry(&self.session_id, attempt, message);
        self.raw(event)
    }

    /// Coarse `session.idle` turn boundary.
    #[must_use]
    pub fn idle(self) -> Self {
        let event = events::idle(&self.session_id);
        self.raw(event)
    }

    #[must_use]
    pub fn error(self, message: &str) -> Self {
        let event = events::error(&self.session_id, message);
        self.raw(event)
    }

    /// Echo of the user's own prompt, as runtimes report it.
    #[must_use]
    pub fn user_echo(self, message_id: &str, text: &str) -> Self {
        let session_id = self.session_id.clone();
        let part = json!({
            "id": format!("{message_id}-text"),
            "sessionID": session_id,
            "messageID": message_id,
            "type": "text",
            "text": text,
        });
        self.raw(events::message(&session_id, message_id, "user"))
            .raw(events::part(part, None))
    }

    #[must_use]
    pub fn assistant(mut self, message_id: &str) -> Self {
        self.message_id = message_id.to_string();
        let event = events::message(&self.session_id, message_id, "assistant");
        self.raw(event)
    }

    #[must_use]
    pub fn complete_message(self, completed_at: i64, tokens: Value, cost: f64) -> Self {
        let event = events::message_completed(
            &self.session_id,
            &self.message_id,
            completed_at,
            tokens,
            cost,
        );
        self.raw(event)
    }

    /// Streams `text` as one text part, one whitespace-delimited token per event.
    #[must_use]
    pub fn text(mut self, text: &str) -> Self {
        let part_id = self.next_part_id();
        let mut so_far = String::new();
        let mut pending = String::new();
        for ch in text.chars() {
            pending.push(ch);
            if matches!(ch, ' ' | '\n') {
                self = self.text_token(&part_id, &mut so_far, std::mem::take(&mut pending));
            }
        }
        if !pending.is_empty() {
            self = self.text_token(&part_id, &mut so_far, pending);
        }
        self
    }

    #[must_use]
    pub fn reasoning(mut self, text: &str) -> Self {
        let part_id = self.next_part_id();
        let part = self.part_base(&part_id, "reasoning", [("text", json!(text))]);
        self.raw(events::part(part, Some(text)))
    }

    #[must_use]
    pub fn step_start(mut self) -> Self {
        let part_id = self.next_part_id();
        let part = self.part_base(&part_id, "step-start", []);
        self.raw(events::part(part, None))
    }

    #[must_use]
    pub fn step_finish(mut self, tokens: Value, cost: f64) -> Self {
        let part_id = self.next_part_id();
        let part = self.part_base(
            &part_id,
            "step-finish",
            [
                ("reason", json!("stop")),
                ("tokens", tokens),
                ("cost", json!(cost)),
            ],
        );
        self.raw(events::part(part, None))
    }

    #[must_use]
    pub fn compaction(mut self, auto: bool) -> Self {
        let part_id = self.next_part_id();
        let part = self.part_base(&part_id, "compaction", [("auto", json!(auto))]);
        self.raw(events::part(part, None))
    }

    /// One tool update; call repeatedly with the same `call_id` to advance it.
    #[must_use]
    pub fn tool(mut self, call_id: &str, name: &str, state: Value) -> Self {
        let part_id = format!("{call_id}-part");
        self.next_part += 1;
        let part = self.part_base(
            &part_id,
            "tool",
            [
                ("callID", json!(call_id)),
                ("tool", json!(name)),
                ("state", state),
            ],
        );
        self.raw(events::part(part, None))
    }

    /// Subtask part announcing a nested run in `child_id`.
    #[must_use]
    pub fn subtask(mut self, child_id: &str, description: &str, agent: &str) -> Self {
        let part_id = self.next_part_id();
        let part = self.part_base(
            &part_id,
            "subtask",
            [
                ("childSessionID", json!(child_id)),
                ("description", json!(description)),
                ("agent", json!(agent)),
            ],
        );
        self.raw(events::part(part, None))
    }

    #[must_use]
    pub fn build(self) -> MockRuntime {
        MockRuntime { steps: self.steps }
    }

    fn next_part_id(&mut self) -> String {
        self.next_part += 1;
        format!("{}-p{}", self.message_id, self.next_part)
    }

    fn part_base<const N: usize>(
        &self,
        part_id: &str,
        part_type: &str,
        fields: [(&str, Value); N],
    ) -> Value {
        let mut object = Map::new();
        object.insert("id".to_string(), json!(part_id));
        object.insert("sessionID".to_string(), json!(self.session_id));
        object.insert("messageID".to_string(), json!(self.message_id));
        object.insert("type".to_string(), json!(part_type));
        for (key, value) in fields {
            object.insert(key.to_string(), value);
        }
        Value::Object(object)
    }

    fn text_token(self, part_id: &str, so_far: &mut String, token: String) -> Self {
        so_far.push_str(&token);
        let part = self.part_base(part_id, "text", [("text", json!(so_far.as_str()))]);
        let pause = self.token_pause;
        let next = self.raw(events::part(part, Some(&token)));
        match pause {
            Some(pause) => next.pause(pause),
            None => next,
        }
    }
}

/// Replays a built [`Script`].
#[derive(Debug, Clone, Default)]
pub struct MockRuntime {
    steps: Vec<ScriptStep>,
}

impl MockRuntime {
    #[must_use]
    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    /// Raw events in emission order, pauses skipped.
    #[must_use]
    pub fn events(&self) -> Vec<Value> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                ScriptStep::Emit(event) => Some(event.clone()),
                ScriptStep::Pause(_) => None,
            })
            .collect()
    }

    /// Emits every scripted event, sleeping on pauses. Stops early once
    /// `cancel` is set and returns the number of events emitted.
    pub fn run(&self, cancel: &AtomicBool, emit: &mut dyn FnMut(Value)) -> usize {
        let mut emitted = 0;
        for step in &self.steps {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            match step {
                ScriptStep::Emit(event) => {
                    emit(event.clone());
                    emitted += 1;
                }
                ScriptStep::Pause(pause) => thread::sleep(*pause),
            }
        }
        emitted
    }
}
