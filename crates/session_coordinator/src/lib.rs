//! Coordinator side of session sync.
//!
//! Raw runtime events are normalized, attributed to the application session
//! that owns them, and published as [`agent_events::Envelope`]s on an
//! [`EventBus`]. Child (sub-agent) sessions are attributed through parent
//! links learned from `session.created` events.
//!
//! ## Binary
//!
//! `session-replay [SESSION_ID]` runs a scripted runtime turn end to end and
//! prints the persisted transcript. It honors the `SESSION_SYNC_*`
//! environment variables read by [`session_sync::config::EnvConfig`].

pub mod bus;
pub mod coordinator;
pub mod raw;
pub mod registry;
pub mod replay;

pub use crate::bus::EventBus;
pub use crate::coordinator::{Coordinator, CoordinatorStats};
pub use crate::registry::{Resolution, SessionRegistry};
