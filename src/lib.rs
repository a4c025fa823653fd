//! Presentation-side session event reconciliation.
//!
//! Envelopes from the coordinator pass a generation check, then drive a
//! per-mount status machine and transcript assembler. Each turn is committed
//! to the message store exactly once, no matter how many completion signals
//! race for it or how often the mount is torn down and rebuilt.
//!
//! # Public API Overview
//! - [`PresentationController`] owns the generation counter, the active
//!   [`Mount`], and turns parked across remounts.
//! - [`MountHost`] is the seam for persistence, notices, and render requests.
//! - [`driver::run_mount`] pumps a broadcast receiver into a controller.

pub mod assembler;
pub mod config;
pub mod controller;
pub mod driver;
pub mod finalize;
pub mod guard;
pub mod logging;
pub mod mount;
pub mod status;
pub mod streaming;

pub use crate::controller::PresentationController;
pub use crate::finalize::{
    CommitOutcome, FinalizeDecision, PersistError, PersistRequest, PersistTicket,
};
pub use crate::guard::{Generation, GenerationCounter, Subscription};
pub use crate::mount::{Mount, MountHost, Notice};
pub use crate::status::{StatusEffect, StatusMachine};
pub use crate::streaming::{ParkedTurn, StreamingState, TurnAccounting};
