//! Wires a scripted runtime through the coordinator, the event bus, and a
//! presentation controller backed by a message store.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use agent_runtime_mock::{MockRuntime, Script};
use anyhow::Context;
use message_store::MessageStore;
use serde_json::json;
use session_sync::driver::{run_mount, DriverReport};
use session_sync::PresentationController;

use crate::bus::EventBus;
use crate::coordinator::{Coordinator, CoordinatorStats};

#[derive(Debug)]
pub struct ReplayReport {
    pub emitted: usize,
    pub coordinator: CoordinatorStats,
    pub driver: DriverReport,
}

/// A turn that delegates to a sub-agent, then answers.
#[must_use]
pub fn demo_script(runtime_id: &str) -> MockRuntime {
    let child_id = format!("{runtime_id}-child");
    let usage = json!({ "input": 120, "output": 48, "reasoning": 0 });

    Script::new(runtime_id)
        .busy()
        .user_echo("msg_user_1", "Summarize the repository layout.")
        .assistant("msg_assistant_1")
        .step_start()
        .child_created(&child_id, runtime_id)
        .subtask(&child_id, "Survey the crates directory", "explore")
        .session(child_id.as_str())
        .busy()
        .assistant("msg_child_1")
        .tool("call_ls", "list", json!({ "status": "running", "input": { "path": "crates" } }))
        .tool(
            "call_ls",
            "list",
            json!({ "status": "completed", "output": "agent_events\nmessage_store" }),
        )
        .text("Two crates found.")
        .idle()
        .session(runtime_id)
        .assistant("msg_assistant_1")
        .text("The workspace has an event crate and a message store.")
        .step_finish(usage.clone(), 0.0021)
        .complete_message(1_700_000_000_000, usage, 0.0021)
        .status("idle")
        .idle()
        .build()
}

/// Replays `runtime` for `session_id` and returns once every persisted write
/// has reported back.
pub async fn replay(
    session_id: &str,
    runtime_id: &str,
    runtime: MockRuntime,
    bus_capacity: usize,
    store: Arc<dyn MessageStore>,
) -> anyhow::Result<ReplayReport> {
    let last_persisted = store
        .last_message(session_id)
        .with_context(|| format!("reading last message of session {session_id}"))?;

    let mut coordinator = Coordinator::new(EventBus::new(bus_capacity));
    coordinator.bind(session_id, runtime_id);
    let receiver = coordinator.subscribe();

    let mut controller = PresentationController::new();
    let subscription = controller.mount(session_id, last_persisted.as_ref());
    controller.begin_turn();

    // The coordinator owns the bus sender; dropping it at the end of the
    // replay closes the bus and lets the driver drain.
    let producer = tokio::task::spawn_blocking(move || {
        let cancel = AtomicBool::new(false);
        let emitted = runtime.run(&cancel, &mut |event| {
            coordinator.ingest(&event);
        });
        (emitted, coordinator.stats())
    });

    let (driver, produced) = tokio::join!(
        run_mount(&mut controller, subscription, receiver, store),
        producer
    );
    let (emitted, coordinator) = produced.context("runtime replay task failed")?;

    tracing::info!(
        session_id,
        emitted,
        forwarded = coordinator.forwarded,
        committed = driver.committed,
        "replay finished"
    );
    Ok(ReplayReport {
        emitted,
        coordinator,
        driver,
    })
}
