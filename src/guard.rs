//! Generation tokens that reject events from superseded subscriptions.

use agent_events::SessionId;

/// Opaque token captured when a subscription is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Monotonic counter owned by the presentation controller.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    current: u64,
}

impl GenerationCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> Generation {
        Generation(self.current)
    }

    /// Moves to a fresh generation. Every token issued before this call stops
    /// being admitted.
    pub fn advance(&mut self) -> Generation {
        self.current = self.current.wrapping_add(1);
        Generation(self.current)
    }

    #[must_use]
    pub fn admits(&self, captured: Generation) -> bool {
        captured.0 == self.current
    }
}

/// What a mount captured when it started listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub generation: Generation,
    pub session_id: SessionId,
}
