//! Parent-session lifecycle: idle, busy, retry.

use agent_events::SessionStatus;

/// What the mount must do after a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEffect {
    /// Output is being produced; keep or raise the streaming flag.
    Streaming,
    /// The turn ended; lower the streaming flag and attempt finalize.
    Finalize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusMachine {
    status: SessionStatus,
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
        }
    }
}

impl StatusMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_status(status: SessionStatus) -> Self {
        Self { status }
    }

    #[must_use]
    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    /// Applies an authoritative `session.status` for the owning session.
    ///
    /// Every transition is accepted. `retry` is kept as its own state and
    /// never ends the turn, whatever it eventually resolves to.
    pub fn apply(&mut self, next: SessionStatus) -> StatusEffect {
        let effect = match next {
            SessionStatus::Busy | SessionStatus::Retry { .. } => StatusEffect::Streaming,
            SessionStatus::Idle => StatusEffect::Finalize,
        };
        if self.status.as_str() != next.as_str() {
            tracing::debug!(from = self.status.as_str(), to = next.as_str(), "session status");
        }
        self.status = next;
        effect
    }

    /// Applies the coarse `session.idle` signal. It ends the turn the same way
    /// an authoritative idle does.
    pub fn apply_fallback_idle(&mut self) -> StatusEffect {
        self.apply(SessionStatus::Idle)
    }

    /// A new user turn was submitted before the runtime reported `busy`.
    pub fn begin_turn(&mut self) {
        self.status = SessionStatus::Busy;
    }
}
