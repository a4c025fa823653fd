use agent_events::Envelope;
use tokio::sync::broadcast;

/// Fan-out of normalized envelopes to every subscribed presentation mount.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Envelope>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers received the envelope.
    pub fn publish(&self, envelope: Envelope) -> usize {
        match self.sender.send(envelope) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(envelope)) => {
                tracing::debug!(
                    session_id = %envelope.session_id,
                    event_type = envelope.event.event_type(),
                    "no subscribers for envelope"
                );
                0
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
