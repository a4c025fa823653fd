//! Finalize-once commit of the in-progress response.
//!
//! The first completion signal of a turn latches `finalized` and hands a
//! [`PersistRequest`] to the host. Later signals for the same turn see the
//! latch and do nothing. The write outcome either clears the committed parts
//! or rolls the latch back so the next completion signal retries. Parts
//! applied while a write is in flight are not part of it and stay for the
//! next commit.

use agent_events::{Message, Role, SessionId};
use message_store::MessageStoreError;
use thiserror::Error;
use uuid::Uuid;

use crate::streaming::StreamingState;

/// Identifies which turn of which session a write belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PersistTicket {
    pub session_id: SessionId,
    pub turn: u64,
    /// Number of leading parts the message was built from.
    pub parts: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistRequest {
    pub ticket: PersistTicket,
    pub message: Message,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] MessageStoreError),
    #[error("persist task did not complete: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeDecision {
    /// This turn was already committed or a commit is in flight.
    AlreadyFinalized,
    /// Nothing was produced this turn; the latch stays open.
    NothingToCommit,
    Commit(PersistRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    RolledBack,
    /// The outcome belongs to a turn this state no longer tracks.
    Stale,
}

/// Attempts the single commit for the current turn.
pub fn finalize_once(state: &mut StreamingState, session_id: &str, now: i64) -> FinalizeDecision {
    if state.finalized {
        return FinalizeDecision::AlreadyFinalized;
    }
    if state.parts().is_empty() {
        return FinalizeDecision::NothingToCommit;
    }

    state.finalized = true;
    let message = build_message(state, now);
    tracing::info!(
        session_id,
        turn = state.turn(),
        message_id = %message.id,
        parts = message.parts.len(),
        "finalizing response"
    );

    FinalizeDecision::Commit(PersistRequest {
        ticket: PersistTicket {
            session_id: session_id.to_string(),
            turn: state.turn(),
            parts: message.parts.len(),
        },
        message,
    })
}

/// Applies the result of the write requested by [`finalize_once`].
pub fn complete(
    state: &mut StreamingState,
    ticket: &PersistTicket,
    result: &Result<(), PersistError>,
) -> CommitOutcome {
    if ticket.turn != state.turn() || !state.finalized {
        return CommitOutcome::Stale;
    }

    match result {
        Ok(()) => {
            if state.clear_committed(ticket.parts) {
                tracing::debug!(
                    session_id = %ticket.session_id,
                    turn = ticket.turn,
                    remaining = state.parts().len(),
                    "parts arrived during the write; reopening the latch"
                );
                state.finalized = false;
            }
            CommitOutcome::Committed
        }
        Err(error) => {
            tracing::warn!(
                session_id = %ticket.session_id,
                turn = ticket.turn,
                %error,
                "persisting response failed; keeping transcript for retry"
            );
            state.finalized = false;
            CommitOutcome::RolledBack
        }
    }
}

fn build_message(state: &StreamingState, now: i64) -> Message {
    let id = state
        .assistant_message_id()
        .filter(|id| Some(*id) != state.rehydrated_from())
        .map(str::to_string)
        .unwrap_or_else(|| format!("msg_{}", Uuid::new_v4().simple()));

    let mut message = Message::new(
        id,
        Role::Assistant,
        state.turn_started_at().unwrap_or(now),
        state.parts().to_vec(),
    );
    message.completed_at = Some(now);
    let accounting = state.accounting();
    if !accounting.is_empty() {
        message.tokens = Some(accounting.tokens());
        message.cost = Some(accounting.cost());
    }
    message
}
