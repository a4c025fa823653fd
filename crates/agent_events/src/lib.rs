//! Event vocabulary shared by the session coordinator and the presentation layer.
//!
//! This crate defines the transcript model (messages and their typed parts),
//! the session status union, and the normalized [`Envelope`] that crosses the
//! coordinator -> presentation boundary. Loosely shaped runtime payloads are
//! parsed defensively here so nothing downstream handles untyped JSON.

mod clock;
mod delta;
mod envelope;
mod model;
mod status;

pub use clock::now_millis;
pub use delta::{PartDelta, PartDeltaKind};
pub use envelope::{
    Envelope, EnvelopeDecodeError, MessageInfo, SessionEvent, WireEnvelope, MESSAGE_PART_UPDATED,
    MESSAGE_UPDATED, SESSION_ERROR, SESSION_IDLE, SESSION_STATUS,
};
pub use model::{
    CompactionPart, Message, Part, ReasoningPart, Role, StepFinishPart, StepStartPart,
    SubtaskPart, SubtaskStatus, TextPart, TokenUsage, ToolPart, ToolStatus,
};
pub use status::SessionStatus;

/// Application-assigned identifier of a user-visible session.
pub type SessionId = String;

/// Opaque identifier assigned by the agent runtime to a (parent or child) session.
pub type RuntimeSessionId = String;
