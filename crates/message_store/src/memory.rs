use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use agent_events::Message;

use crate::error::MessageStoreError;
use crate::MessageStore;

/// Process-local store used by tests and the replay tool.
///
/// `fail_next_appends(n)` makes the next `n` appends return
/// [`MessageStoreError::Unavailable`] without recording anything.
#[derive(Default)]
pub struct InMemoryMessageStore {
    sessions: Mutex<HashMap<String, Vec<Message>>>,
    pending_failures: AtomicUsize,
    append_attempts: AtomicUsize,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_appends(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.lock().get(session_id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn append_attempts(&self) -> usize {
        self.append_attempts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Message>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageStore for InMemoryMessageStore {
    fn last_message(&self, session_id: &str) -> Result<Option<Message>, MessageStoreError> {
        Ok(self.lock().get(session_id).and_then(|messages| messages.last().cloned()))
    }

    fn append_message(&self, session_id: &str, message: &Message) -> Result<(), MessageStoreError> {
        self.append_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if failing {
            return Err(MessageStoreError::Unavailable(
                "injected append failure".to_string(),
            ));
        }

        let mut sessions = self.lock();
        let messages = sessions.entry(session_id.to_string()).or_default();
        if messages.iter().any(|stored| stored.id == message.id) {
            return Err(MessageStoreError::MessageAlreadyStored {
                session_id: session_id.to_string(),
                id: message.id.clone(),
            });
        }
        messages.push(message.clone());
        Ok(())
    }
}
