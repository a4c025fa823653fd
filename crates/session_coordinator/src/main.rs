use std::sync::Arc;

use anyhow::Context;
use message_store::JsonlMessageStore;
use serde_json::json;
use session_coordinator::replay::{demo_script, replay};
use session_sync::config::EnvConfig;
use session_sync::logging;

const DEFAULT_SESSION_ID: &str = "replay";
const RUNTIME_SESSION_ID: &str = "ses_replay";

fn main() -> anyhow::Result<()> {
    let config = EnvConfig::from_env();
    logging::init(&config);

    let session_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());
    let cwd = std::env::current_dir().context("resolving working directory")?;
    let store = Arc::new(JsonlMessageStore::new(config.store_root(&cwd)));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let report = runtime.block_on(replay(
        &session_id,
        RUNTIME_SESSION_ID,
        demo_script(RUNTIME_SESSION_ID),
        config.bus_capacity,
        store.clone(),
    ))?;

    let messages = store
        .messages(&session_id)
        .with_context(|| format!("reading transcript of session {session_id}"))?;
    let tokens = messages
        .iter()
        .filter_map(|message| message.tokens)
        .map(|tokens| tokens.total())
        .fold(0, u64::saturating_add);
    let output = json!({
        "session_id": session_id,
        "log": store.log_path(&session_id),
        "emitted": report.emitted,
        "forwarded": report.coordinator.forwarded,
        "committed": report.driver.committed,
        "tokens": tokens,
        "notices": report.driver.notices,
        "messages": messages,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
