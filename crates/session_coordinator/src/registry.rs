//! Session Resolver: maps raw runtime session ids to the application session
//! that owns them.

use std::collections::HashMap;

use agent_events::{RuntimeSessionId, SessionId};

/// Parent links followed before a chain is considered unresolvable.
pub const MAX_CHAIN_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub owner: SessionId,
    pub is_child: bool,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    owners: HashMap<RuntimeSessionId, SessionId>,
    bindings: HashMap<SessionId, RuntimeSessionId>,
    parents: HashMap<RuntimeSessionId, RuntimeSessionId>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `runtime_id` to `session_id`, returning the runtime id it replaced.
    /// A runtime id belongs to one session at a time; a session that held it
    /// before loses its binding.
    pub fn bind(
        &mut self,
        session_id: impl Into<SessionId>,
        runtime_id: impl Into<RuntimeSessionId>,
    ) -> Option<RuntimeSessionId> {
        let session_id = session_id.into();
        let runtime_id = runtime_id.into();

        let previous = self
            .bindings
            .insert(session_id.clone(), runtime_id.clone());
        if let Some(previous) = previous.as_ref() {
            self.owners.remove(previous);
        }
        if let Some(displaced) = self.owners.insert(runtime_id.clone(), session_id.clone()) {
            if displaced != session_id {
                self.bindings.remove(&displaced);
                tracing::info!(
                    session_id = %displaced,
                    runtime_id = %runtime_id,
                    "runtime session moved to another session"
                );
            }
        }
        tracing::info!(
            session_id = %session_id,
            runtime_id = %runtime_id,
            replaced = previous.as_deref().unwrap_or(""),
            "bound session"
        );
        previous
    }

    /// Archives `session_id`. Its runtime id and every child chain rooted at
    /// it stop resolving.
    pub fn unbind(&mut self, session_id: &str) -> Option<RuntimeSessionId> {
        let runtime_id = self.bindings.remove(session_id)?;
        self.owners.remove(&runtime_id);

        let rooted: Vec<RuntimeSessionId> = self
            .parents
            .keys()
            .filter(|child| self.chain_reaches(child, &runtime_id))
            .cloned()
            .collect();
        for child in &rooted {
            self.parents.remove(child);
        }
        tracing::info!(
            session_id,
            runtime_id = %runtime_id,
            children = rooted.len(),
            "unbound session"
        );
        Some(runtime_id)
    }

    /// Records that `child` was spawned by `parent`. Self-parenting is ignored.
    pub fn register_child(
        &mut self,
        child: impl Into<RuntimeSessionId>,
        parent: impl Into<RuntimeSessionId>,
    ) -> bool {
        let child = child.into();
        let parent = parent.into();
        if child == parent {
            return false;
        }
        tracing::debug!(child = %child, parent = %parent, "registered child session");
        self.parents.insert(child, parent);
        true
    }

    /// A direct binding wins; otherwise parent links are walked up to
    /// [`MAX_CHAIN_DEPTH`] hops. Cycles and overlong chains resolve to `None`.
    #[must_use]
    pub fn resolve(&self, raw_session_id: &str) -> Option<Resolution> {
        if let Some(owner) = self.owners.get(raw_session_id) {
            return Some(Resolution {
                owner: owner.clone(),
                is_child: false,
            });
        }

        let mut current = self.parents.get(raw_session_id)?;
        for _ in 0..MAX_CHAIN_DEPTH {
            if let Some(owner) = self.owners.get(current) {
                return Some(Resolution {
                    owner: owner.clone(),
                    is_child: true,
                });
            }
            current = self.parents.get(current)?;
        }
        None
    }

    #[must_use]
    pub fn runtime_id(&self, session_id: &str) -> Option<&str> {
        self.bindings.get(session_id).map(String::as_str)
    }

    fn chain_reaches(&self, child: &str, ancestor: &str) -> bool {
        let mut current = child;
        for _ in 0..MAX_CHAIN_DEPTH {
            match self.parents.get(current) {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Resolution, SessionRegistry, MAX_CHAIN_DEPTH};

    fn owned(owner: &str, is_child: bool) -> Option<Resolution> {
        Some(Resolution {
            owner: owner.to_string(),
            is_child,
        })
    }

    #[test]
    fn direct_binding_wins_over_parent_link() {
        let mut registry = SessionRegistry::new();
        registry.bind("app-1", "ses_a");
        registry.bind("app-2", "ses_b");
        registry.register_child("ses_b", "ses_a");

        assert_eq!(registry.resolve("ses_b"), owned("app-2", false));
    }

    #[test]
    fn rebinding_replaces_previous_runtime_id() {
        let mut registry = SessionRegistry::new();
        registry.bind("app-1", "ses_old");
        let replaced = registry.bind("app-1", "ses_new");

        assert_eq!(replaced.as_deref(), Some("ses_old"));
        assert_eq!(registry.resolve("ses_old"), None);
        assert_eq!(registry.resolve("ses_new"), owned("app-1", false));
        assert_eq!(registry.runtime_id("app-1"), Some("ses_new"));
    }

    #[test]
    fn chain_at_max_depth_resolves_and_one_more_does_not() {
        let mut registry = SessionRegistry::new();
        registry.bind("app-1", "ses_0");
        for depth in 1..=MAX_CHAIN_DEPTH + 1 {
            registry.register_child(format!("ses_{depth}"), format!("ses_{}", depth - 1));
        }

        assert_eq!(
            registry.resolve(&format!("ses_{MAX_CHAIN_DEPTH}")),
            owned("app-1", true)
        );
        assert_eq!(registry.resolve(&format!("ses_{}", MAX_CHAIN_DEPTH + 1)), None);
    }

    #[test]
    fn cycle_resolves_to_none() {
        let mut registry = SessionRegistry::new();
        registry.register_child("ses_x", "ses_y");
        registry.register_child("ses_y", "ses_x");

        assert_eq!(registry.resolve("ses_x"), None);
        assert!(!registry.register_child("ses_z", "ses_z"));
    }

    #[test]
    fn unbind_drops_children_rooted_at_the_session() {
        let mut registry = SessionRegistry::new();
        registry.bind("app-1", "ses_a");
        registry.bind("app-2", "ses_b");
        registry.register_child("ses_a1", "ses_a");
        registry.register_child("ses_a2", "ses_a1");
        registry.register_child("ses_b1", "ses_b");

        assert_eq!(registry.unbind("app-1").as_deref(), Some("ses_a"));
        assert_eq!(registry.resolve("ses_a"), None);
        assert_eq!(registry.resolve("ses_a2"), None);
        assert_eq!(registry.resolve("ses_b1"), owned("app-2", true));
        assert_eq!(registry.unbind("app-1"), None);
    }

    #[test]
    fn runtime_id_moved_to_another_session_survives_unbinding_the_old_one() {
        let mut registry = SessionRegistry::new();
        registry.bind("app-1", "ses_x");
        registry.register_child("ses_x1", "ses_x");
        registry.bind("app-2", "ses_x");

        assert_eq!(registry.runtime_id("app-1"), None);
        assert_eq!(registry.unbind("app-1"), None);
        assert_eq!(registry.resolve("ses_x"), owned("app-2", false));
        assert_eq!(registry.resolve("ses_x1"), owned("app-2", true));
        assert_eq!(registry.runtime_id("app-2"), Some("ses_x"));
    }
}
