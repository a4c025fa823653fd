//! Tracing bootstrap.

use tracing_subscriber::EnvFilter;

use crate::config::EnvConfig;

/// Installs the global fmt subscriber. Returns `false` when one is already set.
pub fn init(config: &EnvConfig) -> bool {
    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if config.log_json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}
