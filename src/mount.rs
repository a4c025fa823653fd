//! One presentation mount: the subscriber that turns envelopes for its session
//! into streaming state, status, and finalize requests.

use agent_events::{
    now_millis, Envelope, Message, PartDelta, PartDeltaKind, Role, SessionEvent, SessionId,
    SessionStatus, SubtaskStatus,
};
use serde::Serialize;

use crate::finalize::{
    self, CommitOutcome, FinalizeDecision, PersistError, PersistRequest, PersistTicket,
};
use crate::guard::Subscription;
use crate::status::{StatusEffect, StatusMachine};
use crate::streaming::{ParkedTurn, StreamingState};

/// Non-blocking notifications surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    PersistFailed { session_id: SessionId, error: String },
    SessionError { session_id: SessionId, message: String },
}

/// Effects a mount asks its host to perform.
pub trait MountHost {
    /// Starts an asynchronous write. The outcome must come back through
    /// `PresentationController::persist_completed`.
    fn persist(&mut self, request: PersistRequest);
    fn notify(&mut self, notice: Notice);
    fn request_render(&mut self);
}

#[derive(Debug)]
pub struct Mount {
    subscription: Subscription,
    state: StreamingState,
    status: StatusMachine,
}

impl Mount {
    /// Builds a mount from whatever survived the previous one.
    #[must_use]
    pub fn rehydrate(
        subscription: Subscription,
        last_persisted: Option<&Message>,
        parked: Option<ParkedTurn>,
    ) -> Self {
        let (parked_state, parked_status) = match parked {
            Some(ParkedTurn { state, status }) => (Some(state), Some(status)),
            None => (None, None),
        };
        // Streaming follows the rehydrated parts only; a parked status never
        // raises it.
        let state = StreamingState::rehydrate(last_persisted, parked_state);
        let status = match parked_status {
            Some(status) if state.is_streaming && status.is_working() => status,
            _ if state.is_streaming => SessionStatus::Busy,
            _ => SessionStatus::Idle,
        };

        tracing::debug!(
            session_id = %subscription.session_id,
            generation = subscription.generation.value(),
            parts = state.parts().len(),
            streaming = state.is_streaming,
            "mount rehydrated"
        );

        Self {
            subscription,
            state,
            status: StatusMachine::with_status(status),
        }
    }

    #[must_use]
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.subscription.session_id
    }

    #[must_use]
    pub fn state(&self) -> &StreamingState {
        &self.state
    }

    #[must_use]
    pub fn status(&self) -> &SessionStatus {
        self.status.status()
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming
    }

    #[must_use]
    pub fn park(self) -> ParkedTurn {
        ParkedTurn {
            state: self.state,
            status: self.status.status().clone(),
        }
    }

    pub fn begin_turn(&mut self) {
        self.state.begin_turn(now_millis());
        self.status.begin_turn();
    }

    /// Applies one envelope that already passed the generation check.
    /// Returns `false` when the envelope was ignored.
    pub fn handle(&mut self, envelope: Envelope, host: &mut dyn MountHost) -> bool {
        if envelope.session_id != self.subscription.session_id {
            tracing::debug!(
                owner = %envelope.session_id,
                mounted = %self.subscription.session_id,
                "dropping envelope for another session"
            );
            return false;
        }

        let changed = match envelope.child_session_id {
            Some(child_session_id) => self.handle_child(&child_session_id, envelope.event),
            None => self.handle_parent(envelope.event, host),
        };
        if changed {
            host.request_render();
        }
        changed
    }

    pub fn persist_completed(
        &mut self,
        ticket: &PersistTicket,
        result: &Result<(), PersistError>,
        host: &mut dyn MountHost,
    ) -> CommitOutcome {
        let outcome = complete_and_notify(&mut self.state, ticket, result, host);
        if outcome != CommitOutcome::Stale {
            host.request_render();
        }
        outcome
    }

    fn handle_parent(&mut self, event: SessionEvent, host: &mut dyn MountHost) -> bool {
        match event {
            SessionEvent::Status(status) => {
                let effect = self.status.apply(status);
                self.apply_status_effect(effect, host)
            }
            SessionEvent::Idle => {
                let effect = self.status.apply_fallback_idle();
                self.apply_status_effect(effect, host)
            }
            SessionEvent::Error { message } => {
                host.notify(Notice::SessionError {
                    session_id: self.subscription.session_id.clone(),
                    message,
                });
                false
            }
            SessionEvent::MessageUpdated(info) => {
                self.state.observe_message(&info);
                false
            }
            SessionEvent::PartUpdated(delta) => self.state.apply(&delta, now_millis()),
        }
    }

    /// Child events only ever touch the child's subtask part.
    fn handle_child(&mut self, child_session_id: &str, event: SessionEvent) -> bool {
        let delta = match event {
            SessionEvent::Status(status) => {
                let status = if status.is_working() {
                    SubtaskStatus::Running
                } else {
                    SubtaskStatus::Completed
                };
                PartDelta::child_status(child_session_id, status, None)
            }
            SessionEvent::Idle => {
                PartDelta::child_status(child_session_id, SubtaskStatus::Completed, None)
            }
            SessionEvent::Error { message } => {
                PartDelta::child_status(child_session_id, SubtaskStatus::Error, Some(message))
            }
            SessionEvent::MessageUpdated(info) => {
                if info.role == Role::User {
                    self.state.observe_message(&info);
                }
                return false;
            }
            SessionEvent::PartUpdated(delta) => {
                if self.state.is_user_echo(&delta) {
                    return false;
                }
                wrap_child_delta(child_session_id, delta)
            }
        };

        self.state.apply(&delta, now_millis())
    }

    fn apply_status_effect(&mut self, effect: StatusEffect, host: &mut dyn MountHost) -> bool {
        match effect {
            StatusEffect::Streaming => {
                let changed = !self.state.is_streaming;
                self.state.is_streaming = true;
                changed
            }
            StatusEffect::Finalize => {
                let changed = self.state.is_streaming;
                self.state.is_streaming = false;
                match finalize::finalize_once(
                    &mut self.state,
                    &self.subscription.session_id,
                    now_millis(),
                ) {
                    FinalizeDecision::Commit(request) => {
                        host.persist(request);
                        true
                    }
                    FinalizeDecision::AlreadyFinalized | FinalizeDecision::NothingToCommit => {
                        changed
                    }
                }
            }
        }
    }
}

/// Applies a write outcome to state owned by a mount or parked by one.
pub(crate) fn complete_and_notify(
    state: &mut StreamingState,
    ticket: &PersistTicket,
    result: &Result<(), PersistError>,
    host: &mut dyn MountHost,
) -> CommitOutcome {
    let outcome = finalize::complete(state, ticket, result);
    match (&outcome, result) {
        (CommitOutcome::RolledBack, Err(error)) => host.notify(Notice::PersistFailed {
            session_id: ticket.session_id.clone(),
            error: error.to_string(),
        }),
        (CommitOutcome::Stale, _) => {
            tracing::debug!(
                session_id = %ticket.session_id,
                turn = ticket.turn,
                "ignoring persist outcome for an older turn"
            );
        }
        _ => {}
    }
    outcome
}

/// A delta the coordinator already attributed to this child keeps its shape;
/// anything else is wrapped so it lands in the child's subtask part.
fn wrap_child_delta(child_session_id: &str, delta: PartDelta) -> PartDelta {
    match &delta.kind {
        PartDeltaKind::Subtask {
            child_session_id: target,
            ..
        } if target == child_session_id => delta,
        _ => PartDelta::for_child(child_session_id, delta),
    }
}
