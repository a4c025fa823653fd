//! Owner of the generation counter, the single active mount, and the turns
//! parked by mounts that were torn down mid-stream.

use std::collections::HashMap;

use agent_events::{Envelope, Message, SessionId};

use crate::finalize::{CommitOutcome, PersistError, PersistTicket};
use crate::guard::{GenerationCounter, Subscription};
use crate::mount::{complete_and_notify, Mount, MountHost};
use crate::streaming::ParkedTurn;

#[derive(Debug, Default)]
pub struct PresentationController {
    generation: GenerationCounter,
    active: Option<Mount>,
    parked: HashMap<SessionId, ParkedTurn>,
}

impl PresentationController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tears down the current mount, if any, advances the generation, and
    /// mounts `session_id`. Events must be delivered with the returned
    /// subscription.
    pub fn mount(
        &mut self,
        session_id: impl Into<SessionId>,
        last_persisted: Option<&Message>,
    ) -> Subscription {
        self.unmount();

        let session_id = session_id.into();
        let subscription = Subscription {
            generation: self.generation.advance(),
            session_id: session_id.clone(),
        };
        let parked = self.parked.remove(&session_id);
        self.active = Some(Mount::rehydrate(
            subscription.clone(),
            last_persisted,
            parked,
        ));
        subscription
    }

    /// Parks the active mount's turn for a later mount of the same session.
    pub fn unmount(&mut self) {
        let Some(mount) = self.active.take() else {
            return;
        };
        let session_id = mount.session_id().to_string();
        let parked = mount.park();
        tracing::debug!(
            session_id = %session_id,
            parts = parked.parts().len(),
            finalized = parked.finalized(),
            "parking turn"
        );
        self.parked.insert(session_id, parked);
    }

    /// Marks a new user turn on the active mount.
    pub fn begin_turn(&mut self) -> bool {
        match self.active.as_mut() {
            Some(mount) => {
                mount.begin_turn();
                true
            }
            None => false,
        }
    }

    /// Delivers an envelope received under `subscription`. Envelopes captured
    /// under an older generation are dropped before any processing.
    pub fn deliver(
        &mut self,
        subscription: &Subscription,
        envelope: Envelope,
        host: &mut dyn MountHost,
    ) -> bool {
        if !self.generation.admits(subscription.generation) {
            tracing::debug!(
                captured = subscription.generation.value(),
                current = self.generation.current().value(),
                event_type = envelope.event.event_type(),
                "dropping stale envelope"
            );
            return false;
        }

        match self.active.as_mut() {
            Some(mount) if mount.subscription() == subscription => mount.handle(envelope, host),
            _ => {
                tracing::debug!(
                    session_id = %subscription.session_id,
                    "dropping envelope without an active mount"
                );
                false
            }
        }
    }

    /// Routes a write outcome to whichever state owns the ticket's turn: the
    /// active mount or a parked turn.
    pub fn persist_completed(
        &mut self,
        ticket: &PersistTicket,
        result: &Result<(), PersistError>,
        host: &mut dyn MountHost,
    ) -> CommitOutcome {
        if let Some(mount) = self.active.as_mut() {
            if mount.session_id() == ticket.session_id {
                return mount.persist_completed(ticket, result, host);
            }
        }

        match self.parked.get_mut(&ticket.session_id) {
            Some(parked) => complete_and_notify(&mut parked.state, ticket, result, host),
            None => {
                tracing::debug!(
                    session_id = %ticket.session_id,
                    "persist outcome for a session with no state"
                );
                CommitOutcome::Stale
            }
        }
    }

    #[must_use]
    pub fn active(&self) -> Option<&Mount> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn parked(&self, session_id: &str) -> Option<&ParkedTurn> {
        self.parked.get(session_id)
    }

    /// Forgets every turn held for an archived session. An active mount of it
    /// is torn down without parking and the generation advances, so envelopes
    /// still in flight for it are dropped.
    pub fn archive(&mut self, session_id: &str) -> bool {
        let mut dropped = self.parked.remove(session_id).is_some();
        if self
            .active
            .as_ref()
            .is_some_and(|mount| mount.session_id() == session_id)
        {
            self.active = None;
            self.generation.advance();
            dropped = true;
        }
        if dropped {
            tracing::info!(session_id, "dropped state of archived session");
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use agent_events::{Envelope, PartDelta, PartDeltaKind, SessionEvent, SessionStatus};
    use message_store::MessageStoreError;
    use pretty_assertions::assert_eq;

    use super::PresentationController;
    use crate::finalize::{CommitOutcome, PersistError};
    use crate::mount::test_support::RecordingHost;
    use crate::mount::Notice;

    fn text(session_id: &str, delta: &str) -> Envelope {
        Envelope::new(
            session_id,
            SessionEvent::PartUpdated(PartDelta::new(
                None,
                PartDeltaKind::Text {
                    part_id: None,
                    text: None,
                    delta: Some(delta.to_string()),
                },
            )),
        )
    }

    fn busy(session_id: &str) -> Envelope {
        Envelope::new(session_id, SessionEvent::Status(SessionStatus::Busy))
    }

    fn idle(session_id: &str) -> Envelope {
        Envelope::new(session_id, SessionEvent::Status(SessionStatus::Idle))
    }

    #[test]
    fn stale_subscription_events_are_ignored_after_remount() {
        let mut controller = PresentationController::new();
        let mut host = RecordingHost::default();
        let old = controller.mount("app-a", None);
        let new = controller.mount("app-b", None);

        assert!(!controller.deliver(&old, text("app-a", "late"), &mut host));
        assert!(controller.deliver(&new, text("app-b", "fresh"), &mut host));

        let mount = controller.active().expect("app-b is mounted");
        assert_eq!(mount.state().parts().len(), 1);
        assert_eq!(mount.session_id(), "app-b");
    }

    #[test]
    fn remounting_same_session_rejects_previous_subscription() {
        let mut controller = PresentationController::new();
        let mut host = RecordingHost::default();
        let first = controller.mount("app-a", None);
        let second = controller.mount("app-a", None);

        assert_ne!(first.generation, second.generation);
        assert!(!controller.deliver(&first, busy("app-a"), &mut host));
        assert!(!controller.active().expect("mounted").is_streaming());
    }

    #[test]
    fn unmounted_controller_drops_everything() {
        let mut controller = PresentationController::new();
        let mut host = RecordingHost::default();
        let subscription = controller.mount("app-a", None);
        controller.unmount();

        assert!(!controller.deliver(&subscription, busy("app-a"), &mut host));
        assert!(!controller.begin_turn());
    }

    #[test]
    fn tab_switch_mid_stream_rehydrates_parked_turn() {
        let mut controller = PresentationController::new();
        let mut host = RecordingHost::default();
        let sub = controller.mount("app-a", None);
        controller.deliver(&sub, busy("app-a"), &mut host);
        controller.deliver(&sub, text("app-a", "Hel"), &mut host);

        let other = controller.mount("app-b", None);
        controller.deliver(&other, busy("app-b"), &mut host);
        assert_eq!(
            controller.parked("app-a").map(|parked| parked.parts().len()),
            Some(1)
        );

        let back = controller.mount("app-a", None);
        let mount = controller.active().expect("app-a is mounted");
        assert!(!mount.is_streaming());
        assert_eq!(mount.state().parts().len(), 1);

        controller.deliver(&back, busy("app-a"), &mut host);
        assert!(controller.active().expect("mounted").is_streaming());
        controller.deliver(&back, text("app-a", "lo"), &mut host);
        controller.deliver(&back, idle("app-a"), &mut host);
        assert_eq!(host.persisted.len(), 1);
        assert_eq!(host.persisted[0].message.text(), "Hello");
    }

    #[test]
    fn idle_missed_while_parked_does_not_leave_remount_streaming() {
        let mut controller = PresentationController::new();
        let mut host = RecordingHost::default();
        let sub = controller.mount("app-a", None);
        controller.deliver(&sub, busy("app-a"), &mut host);
        controller.deliver(&sub, text("app-a", "Hello"), &mut host);

        controller.mount("app-b", None);
        assert!(!controller.deliver(&sub, idle("app-a"), &mut host));

        let back = controller.mount("app-a", None);
        let mount = controller.active().expect("app-a is mounted");
        assert!(!mount.is_streaming());
        assert_eq!(mount.status(), &SessionStatus::Idle);
        assert_eq!(mount.state().parts().len(), 1);
        assert!(host.persisted.is_empty());

        controller.deliver(&back, Envelope::new("app-a", SessionEvent::Idle), &mut host);
        assert_eq!(host.persisted.len(), 1);
        assert_eq!(host.persisted[0].message.text(), "Hello");
    }

    #[test]
    fn persist_outcome_reaches_a_parked_turn() {
        let mut controller = PresentationController::new();
        let mut host = RecordingHost::default();
        let sub = controller.mount("app-a", None);
        controller.deliver(&sub, text("app-a", "answer"), &mut host);
        controller.deliver(&sub, idle("app-a"), &mut host);
        let ticket = host.persisted[0].ticket.clone();

        controller.mount("app-b", None);
        let failure = Err(PersistError::Store(MessageStoreError::Unavailable(
            "offline".to_string(),
        )));
        assert_eq!(
            controller.persist_completed(&ticket, &failure, &mut host),
            CommitOutcome::RolledBack
        );

        let parked = controller.parked("app-a").expect("turn is parked");
        assert!(!parked.finalized());
        assert_eq!(parked.parts().len(), 1);
        assert!(matches!(
            host.notices.as_slice(),
            [Notice::PersistFailed { session_id, .. }] if session_id == "app-a"
        ));
    }

    #[test]
    fn finalized_flag_survives_remount() {
        let mut controller = PresentationController::new();
        let mut host = RecordingHost::default();
        let sub = controller.mount("app-a", None);
        controller.deliver(&sub, text("app-a", "answer"), &mut host);
        controller.deliver(&sub, idle("app-a"), &mut host);

        let again = controller.mount("app-a", None);
        controller.deliver(&again, Envelope::new("app-a", SessionEvent::Idle), &mut host);

        assert!(controller.active().expect("mounted").state().finalized);
        assert_eq!(host.persisted.len(), 1);
    }

    #[test]
    fn archive_drops_active_and_parked_state() {
        let mut controller = PresentationController::new();
        let mut host = RecordingHost::default();
        let a = controller.mount("app-a", None);
        controller.deliver(&a, busy("app-a"), &mut host);
        controller.deliver(&a, text("app-a", "parked"), &mut host);
        let b = controller.mount("app-b", None);
        controller.deliver(&b, busy("app-b"), &mut host);

        assert!(controller.archive("app-a"));
        assert!(controller.parked("app-a").is_none());
        assert_eq!(controller.active().expect("app-b stays").session_id(), "app-b");

        assert!(controller.archive("app-b"));
        assert!(controller.active().is_none());
        assert!(!controller.deliver(&b, text("app-b", "late"), &mut host));
        assert!(!controller.archive("app-b"));

        controller.mount("app-a", None);
        let mount = controller.active().expect("mounted");
        assert!(mount.state().parts().is_empty());
        assert!(!mount.is_streaming());
    }
}
