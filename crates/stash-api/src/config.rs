use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use stash_core::util::normalize_text_option;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// libSQL database file, or `:memory:` for a throwaway store.
    pub db_path: PathBuf,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "STASH_API_BIND_ADDR", "127.0.0.1:8787");
        let db_path = PathBuf::from(value_or_default(
            &lookup,
            "STASH_DB_PATH",
            "stash-server.db",
        ));

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [10, 3600]".to_string(),
                )
            })?;
        if !(10..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [10, 3600]".to_string(),
            ));
        }

        let sync_rate_limit_per_window =
            value_or_default(&lookup, "SYNC_RATE_LIMIT_PER_WINDOW", "240")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "SYNC_RATE_LIMIT_PER_WINDOW must be an integer in [1, 10000]".to_string(),
                    )
                })?;
        if !(1..=10_000).contains(&sync_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "SYNC_RATE_LIMIT_PER_WINDOW must be in [1, 10000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            db_path,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window,
        })
    }

    /// Configuration for tests: in-memory store, loopback on an ephemeral port.
    pub fn ephemeral() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            db_path: PathBuf::from(":memory:"),
            rate_limit_window: Duration::from_secs(60),
            sync_rate_limit_per_window: 10_000,
        }
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    normalize_text_option(lookup(name)).unwrap_or_else(|| default.to_string())
}
