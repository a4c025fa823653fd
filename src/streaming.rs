//! In-memory state of the response a mount is currently showing.

use std::collections::{BTreeMap, HashSet};

use agent_events::{Message, MessageInfo, Part, PartDelta, Role, SessionStatus, TokenUsage};

use crate::assembler::{self, ChildIndex};

/// Token and cost totals for one turn. Each assistant message contributes its
/// latest snapshot; totals are summed across messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnAccounting {
    per_message: BTreeMap<String, (TokenUsage, f64)>,
}

impl TurnAccounting {
    pub fn record(&mut self, message_id: &str, tokens: Option<TokenUsage>, cost: Option<f64>) {
        if tokens.is_none() && cost.is_none() {
            return;
        }
        let entry = self
            .per_message
            .entry(message_id.to_string())
            .or_insert((TokenUsage::default(), 0.0));
        if let Some(tokens) = tokens {
            entry.0 = tokens;
        }
        if let Some(cost) = cost {
            entry.1 = cost;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.per_message.is_empty()
    }

    #[must_use]
    pub fn tokens(&self) -> TokenUsage {
        self.per_message
            .values()
            .fold(TokenUsage::default(), |total, (tokens, _)| {
                total.saturating_add(*tokens)
            })
    }

    #[must_use]
    pub fn cost(&self) -> f64 {
        self.per_message.values().map(|(_, cost)| cost).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingState {
    pub is_streaming: bool,
    pub finalized: bool,
    parts: Vec<Part>,
    children: ChildIndex,
    turn: u64,
    turn_started_at: Option<i64>,
    accounting: TurnAccounting,
    user_message_ids: HashSet<String>,
    assistant_message_id: Option<String>,
    committed_message_ids: HashSet<String>,
    rehydrated_from: Option<String>,
}

impl StreamingState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds in-progress state for a new mount.
    ///
    /// `last_persisted` seeds the parts only when it is an assistant message
    /// that never completed. `parked` is the state a previous mount for the
    /// same session left behind; its parts follow the persisted ones.
    #[must_use]
    pub fn rehydrate(last_persisted: Option<&Message>, parked: Option<StreamingState>) -> Self {
        let base = last_persisted
            .filter(|message| message.role == Role::Assistant && message.completed_at.is_none());

        let mut state = parked.unwrap_or_default();
        if let Some(base) = base {
            if state.rehydrated_from.as_deref() != Some(base.id.as_str()) {
                let mut parts = base.parts.clone();
                parts.append(&mut state.parts);
                state.parts = parts;
                state.rehydrated_from = Some(base.id.clone());
                state.turn_started_at.get_or_insert(base.created_at);
            }
        }

        state.children = assembler::index_children(&state.parts);
        state.is_streaming = state.has_active_parts();
        state
    }

    /// Starts a new user turn: clears everything the previous turn left and
    /// optimistically marks the session as streaming.
    pub fn begin_turn(&mut self, now: i64) {
        let turn = self.turn.wrapping_add(1);
        *self = Self {
            is_streaming: true,
            turn,
            turn_started_at: Some(now),
            ..Self::default()
        };
    }

    /// True when `delta` belongs to a message the user sent.
    #[must_use]
    pub fn is_user_echo(&self, delta: &PartDelta) -> bool {
        delta
            .message_id
            .as_ref()
            .is_some_and(|message_id| self.user_message_ids.contains(message_id))
    }

    pub fn apply(&mut self, delta: &PartDelta, now: i64) -> bool {
        if self.is_user_echo(delta) {
            tracing::debug!(message_id = ?delta.message_id, "dropping echoed user part");
            return false;
        }
        self.turn_started_at.get_or_insert(now);
        assembler::apply_delta(&mut self.parts, &mut self.children, delta, now)
    }

    /// Records a message snapshot. User messages register for echo
    /// suppression; assistant messages feed turn accounting.
    pub fn observe_message(&mut self, info: &MessageInfo) {
        let message_id = info.message_id.as_deref().unwrap_or_default();
        match info.role {
            Role::User => {
                if !message_id.is_empty() {
                    self.user_message_ids.insert(message_id.to_string());
                }
            }
            Role::Assistant => {
                if self.committed_message_ids.contains(message_id) {
                    return;
                }
                if !message_id.is_empty() && self.assistant_message_id.is_none() {
                    self.assistant_message_id = Some(message_id.to_string());
                }
                self.accounting.record(message_id, info.tokens, info.cost);
            }
            Role::System => {}
        }
    }

    /// Drops the first `committed` parts after a successful commit and
    /// returns true when parts applied after the snapshot remain.
    ///
    /// The committed message id is retired so a follow-up commit never reuses
    /// it.
    pub fn clear_committed(&mut self, committed: usize) -> bool {
        let committed = committed.min(self.parts.len());
        self.parts.drain(..committed);
        self.children = assembler::index_children(&self.parts);
        self.accounting = TurnAccounting::default();
        if let Some(message_id) = self.assistant_message_id.take() {
            self.committed_message_ids.insert(message_id);
        }
        self.rehydrated_from = None;
        !self.parts.is_empty()
    }

    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    #[must_use]
    pub fn children(&self) -> &ChildIndex {
        &self.children
    }

    #[must_use]
    pub fn turn(&self) -> u64 {
        self.turn
    }

    #[must_use]
    pub fn turn_started_at(&self) -> Option<i64> {
        self.turn_started_at
    }

    #[must_use]
    pub fn accounting(&self) -> &TurnAccounting {
        &self.accounting
    }

    #[must_use]
    pub fn assistant_message_id(&self) -> Option<&str> {
        self.assistant_message_id.as_deref()
    }

    #[must_use]
    pub fn rehydrated_from(&self) -> Option<&str> {
        self.rehydrated_from.as_deref()
    }

    #[must_use]
    pub fn has_active_parts(&self) -> bool {
        self.parts.iter().any(Part::is_active)
    }
}

/// State a torn-down mount hands over so a later mount can pick it up.
#[derive(Debug, Clone, PartialEq)]
pub struct ParkedTurn {
    pub state: StreamingState,
    pub status: SessionStatus,
}

impl ParkedTurn {
    #[must_use]
    pub fn parts(&self) -> &[Part] {
        self.state.parts()
    }

    #[must_use]
    pub fn finalized(&self) -> bool {
        self.state.finalized
    }

    #[must_use]
    pub fn turn(&self) -> u64 {
        self.state.turn()
    }
}
