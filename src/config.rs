//! Environment configuration.

use std::env;
use std::path::PathBuf;

pub const LOG_FILTER_ENV_VAR: &str = "SESSION_SYNC_LOG";
pub const LOG_JSON_ENV_VAR: &str = "SESSION_SYNC_LOG_JSON";
pub const STORE_DIR_ENV_VAR: &str = "SESSION_SYNC_STORE_DIR";
pub const BUS_CAPACITY_ENV_VAR: &str = "SESSION_SYNC_BUS_CAPACITY";

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub log_filter: String,
    pub log_json: bool,
    /// `None` means `<cwd>/.agent/messages`.
    pub store_dir: Option<PathBuf>,
    pub bus_capacity: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_json: false,
            store_dir: None,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            log_filter: env_string_opt(LOG_FILTER_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            log_json: env_flag(LOG_JSON_ENV_VAR),
            store_dir: env_string_opt(STORE_DIR_ENV_VAR).map(PathBuf::from),
            bus_capacity: env_usize(BUS_CAPACITY_ENV_VAR)
                .filter(|capacity| *capacity > 0)
                .unwrap_or(DEFAULT_BUS_CAPACITY),
        }
    }

    /// Directory holding the JSONL message logs, resolved against `cwd`.
    #[must_use]
    pub fn store_root(&self, cwd: &std::path::Path) -> PathBuf {
        match &self.store_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => cwd.join(dir),
            None => message_store::message_root(cwd),
        }
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_usize(key: &str) -> Option<usize> {
    env_string_opt(key).and_then(|value| value.parse().ok())
}
