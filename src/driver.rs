//! Async pump from the envelope bus into a [`PresentationController`].
//!
//! Envelopes are delivered under the subscription captured at mount time.
//! Persist requests run on the blocking pool and report back through an mpsc
//! channel, so a slow write never holds up ingestion.

use std::sync::Arc;

use agent_events::Envelope;
use message_store::MessageStore;
use tokio::sync::{broadcast, mpsc};

use crate::controller::PresentationController;
use crate::finalize::{CommitOutcome, PersistError, PersistRequest, PersistTicket};
use crate::guard::Subscription;
use crate::mount::{MountHost, Notice};

#[derive(Debug)]
pub struct PersistOutcome {
    pub ticket: PersistTicket,
    pub result: Result<(), PersistError>,
}

/// Counters and notices collected while a mount was pumped.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DriverReport {
    pub received: usize,
    pub applied: usize,
    pub lagged: u64,
    pub committed: usize,
    pub rolled_back: usize,
    pub renders: usize,
    pub notices: Vec<Notice>,
}

struct StoreHost {
    store: Arc<dyn MessageStore>,
    outcomes: mpsc::UnboundedSender<PersistOutcome>,
    in_flight: usize,
    renders: usize,
    notices: Vec<Notice>,
}

impl MountHost for StoreHost {
    fn persist(&mut self, request: PersistRequest) {
        self.in_flight += 1;
        let store = Arc::clone(&self.store);
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            let PersistRequest { ticket, message } = request;
            let session_id = ticket.session_id.clone();
            let write = tokio::task::spawn_blocking(move || {
                store.append_message(&session_id, &message)
            })
            .await;
            let result = match write {
                Ok(result) => result.map_err(PersistError::from),
                Err(join_error) => Err(PersistError::Aborted(join_error.to_string())),
            };
            // The driver may already be gone; the outcome is then moot.
            let _ = outcomes.send(PersistOutcome { ticket, result });
        });
    }

    fn notify(&mut self, notice: Notice) {
        tracing::info!(?notice, "notice");
        self.notices.push(notice);
    }

    fn request_render(&mut self) {
        self.renders += 1;
    }
}

/// Pumps `events` into `controller` until the bus closes and every write
/// started along the way has reported back.
pub async fn run_mount(
    controller: &mut PresentationController,
    subscription: Subscription,
    mut events: broadcast::Receiver<Envelope>,
    store: Arc<dyn MessageStore>,
) -> DriverReport {
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
    let mut host = StoreHost {
        store,
        outcomes: outcome_tx,
        in_flight: 0,
        renders: 0,
        notices: Vec::new(),
    };
    let mut report = DriverReport::default();
    let mut bus_open = true;

    while bus_open || host.in_flight > 0 {
        tokio::select! {
            received = events.recv(), if bus_open => match received {
                Ok(envelope) => {
                    report.received += 1;
                    if controller.deliver(&subscription, envelope, &mut host) {
                        report.applied += 1;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        skipped,
                        session_id = %subscription.session_id,
                        "envelope bus lagged"
                    );
                    report.lagged += skipped;
                }
                Err(broadcast::error::RecvError::Closed) => bus_open = false,
            },
            Some(outcome) = outcome_rx.recv() => {
                host.in_flight = host.in_flight.saturating_sub(1);
                match controller.persist_completed(&outcome.ticket, &outcome.result, &mut host) {
                    CommitOutcome::Committed => report.committed += 1,
                    CommitOutcome::RolledBack => report.rolled_back += 1,
                    CommitOutcome::Stale => {}
                }
            }
            else => break,
        }
    }

    report.renders = host.renders;
    report.notices = std::mem::take(&mut host.notices);
    report
}
