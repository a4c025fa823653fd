//! Persistence for committed transcript messages.
//!
//! Each application session owns one append-only JSONL file: a header line
//! followed by one record per finalized message.

mod error;
mod memory;
mod paths;
mod schema;
mod store;

use agent_events::Message;

pub use error::MessageStoreError;
pub use memory::InMemoryMessageStore;
pub use paths::{message_file_name, message_root};
pub use schema::{LogHeader, LogRecordType, MessageRecord, MessageRecordType};
pub use store::{JsonlMessageStore, SessionLog};

/// Storage seam used by the finalization path and by rehydration on mount.
pub trait MessageStore: Send + Sync {
    fn last_message(&self, session_id: &str) -> Result<Option<Message>, MessageStoreError>;

    fn append_message(&self, session_id: &str, message: &Message) -> Result<(), MessageStoreError>;
}
