//! Tags normalized runtime events with their owning session and publishes
//! them on the [`EventBus`].

use agent_events::{Envelope, RuntimeSessionId, SessionId};
use serde_json::Value;
use session_sync::PresentationController;
use tokio::sync::broadcast;

use crate::bus::EventBus;
use crate::raw::{normalize, RuntimeEvent};
use crate::registry::SessionRegistry;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub forwarded: usize,
    pub unresolved: usize,
    pub ignored: usize,
}

#[derive(Debug)]
pub struct Coordinator {
    registry: SessionRegistry,
    bus: EventBus,
    stats: CoordinatorStats,
}

impl Coordinator {
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            registry: SessionRegistry::new(),
            bus,
            stats: CoordinatorStats::default(),
        }
    }

    pub fn bind(
        &mut self,
        session_id: impl Into<SessionId>,
        runtime_id: impl Into<RuntimeSessionId>,
    ) -> Option<RuntimeSessionId> {
        self.registry.bind(session_id, runtime_id)
    }

    pub fn unbind(&mut self, session_id: &str) -> Option<RuntimeSessionId> {
        self.registry.unbind(session_id)
    }

    /// Archives `session_id`: its runtime events stop resolving and the
    /// presentation state held for it is dropped.
    pub fn archive(
        &mut self,
        session_id: &str,
        controller: &mut PresentationController,
    ) -> Option<RuntimeSessionId> {
        let runtime_id = self.unbind(session_id);
        controller.archive(session_id);
        runtime_id
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.bus.subscribe()
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    /// Handles one raw runtime event. Returns the envelope that was published,
    /// if any.
    pub fn ingest(&mut self, raw: &Value) -> Option<Envelope> {
        let Some(event) = normalize(raw) else {
            self.stats.ignored += 1;
            return None;
        };

        let (raw_session_id, event) = match event {
            RuntimeEvent::Lineage {
                session_id,
                parent_id,
            } => {
                if let Some(parent_id) = parent_id {
                    self.registry.register_child(session_id, parent_id);
                }
                return None;
            }
            RuntimeEvent::Session { session_id, event } => (session_id, event),
        };

        let Some(resolution) = self.registry.resolve(&raw_session_id) else {
            tracing::debug!(
                raw_session_id = %raw_session_id,
                event_type = event.event_type(),
                "dropping event for unresolvable session"
            );
            self.stats.unresolved += 1;
            return None;
        };

        let envelope = if resolution.is_child {
            Envelope::from_child(resolution.owner, raw_session_id, event)
        } else {
            Envelope::new(resolution.owner, event)
        };
        self.bus.publish(envelope.clone());
        self.stats.forwarded += 1;
        Some(envelope)
    }
}

#[cfg(test)]
mod tests {
    use agent_events::{SessionEvent, SessionStatus};
    use agent_runtime_mock::events;
    use pretty_assertions::assert_eq;

    use super::{Coordinator, CoordinatorStats};
    use crate::bus::EventBus;

    #[test]
    fn child_events_are_tagged_with_owner_and_raw_id() {
        let mut coordinator = Coordinator::new(EventBus::new(8));
        coordinator.bind("app-1", "ses_a");
        assert_eq!(
            coordinator.ingest(&events::session_created("ses_c", Some("ses_a"))),
            None
        );

        let envelope = coordinator
            .ingest(&events::status("ses_c", "busy"))
            .expect("child resolves");
        assert_eq!(envelope.session_id, "app-1");
        assert_eq!(envelope.child_session_id.as_deref(), Some("ses_c"));
        assert_eq!(envelope.event, SessionEvent::Status(SessionStatus::Busy));
    }

    #[test]
    fn grandchild_keeps_its_own_raw_id() {
        let mut coordinator = Coordinator::new(EventBus::new(8));
        coordinator.bind("app-1", "ses_a");
        coordinator.ingest(&events::session_created("ses_c", Some("ses_a")));
        coordinator.ingest(&events::session_created("ses_g", Some("ses_c")));

        let envelope = coordinator
            .ingest(&events::idle("ses_g"))
            .expect("grandchild resolves");
        assert_eq!(envelope.session_id, "app-1");
        assert_eq!(envelope.child_session_id.as_deref(), Some("ses_g"));
    }

    #[test]
    fn unresolvable_and_unknown_events_are_counted_not_published() {
        let bus = EventBus::new(8);
        let mut receiver = bus.subscribe();
        let mut coordinator = Coordinator::new(bus);

        assert_eq!(coordinator.ingest(&events::idle("ses_unknown")), None);
        assert_eq!(
            coordinator.ingest(&events::raw("file.edited", serde_json::json!({}))),
            None
        );
        assert_eq!(
            coordinator.stats(),
            CoordinatorStats {
                forwarded: 0,
                unresolved: 1,
                ignored: 1,
            }
        );
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn unbound_session_stops_resolving() {
        let mut coordinator = Coordinator::new(EventBus::new(8));
        coordinator.bind("app-1", "ses_a");
        coordinator.ingest(&events::session_created("ses_c", Some("ses_a")));
        coordinator.unbind("app-1");

        assert_eq!(coordinator.ingest(&events::idle("ses_a")), None);
        assert_eq!(coordinator.ingest(&events::idle("ses_c")), None);
        assert!(coordinator.registry().resolve("ses_c").is_none());
    }
}
