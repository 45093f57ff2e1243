//! Client sync configuration.
//!
//! Settings are read from the environment by the binaries and from an
//! arbitrary lookup in tests. Absence of `STASH_API_URL` puts the client in
//! local-only mode; everything else has a default.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheBackend;
use crate::sync::is_reserved_key;
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HISTORY_DEPTH: usize = 10;
pub const DEFAULT_TRACKED_KEYS: &str = "notes,settings";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the client sync core needs to know at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Base URL of the sync server; `None` means local-only.
    pub api_base_url: Option<String>,
    /// Identity-provider user id; a device key is generated when absent.
    pub user_id: Option<String>,
    pub sync_interval: Duration,
    pub request_timeout: Duration,
    /// Logical keys synchronized by the scheduler.
    pub tracked_keys: Vec<String>,
    /// Snapshots retained per key; 0 disables history.
    pub history_depth: usize,
    /// Explicit cache backend; callers pick their own default when `None`.
    pub cache: Option<CacheBackend>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            user_id: None,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            tracked_keys: parse_tracked_keys(DEFAULT_TRACKED_KEYS).unwrap_or_default(),
            history_depth: DEFAULT_HISTORY_DEPTH,
            cache: None,
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = optional_trimmed(&lookup, "STASH_API_URL")
            .map(|url| url.trim_end_matches('/').to_string());
        if let Some(url) = api_base_url.as_deref() {
            if !is_http_url(url) {
                return Err(ConfigError::Invalid(
                    "STASH_API_URL must start with http:// or https://".to_string(),
                ));
            }
        }

        let user_id = optional_trimmed(&lookup, "STASH_USER_ID");

        let sync_interval_secs = bounded_u64(
            &lookup,
            "STASH_SYNC_INTERVAL_SECS",
            DEFAULT_SYNC_INTERVAL_SECS,
            5..=3_600,
        )?;
        let request_timeout_secs = bounded_u64(
            &lookup,
            "STASH_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            1..=120,
        )?;

        let history_depth = optional_trimmed(&lookup, "STASH_HISTORY_DEPTH")
            .map_or(Ok(DEFAULT_HISTORY_DEPTH), |raw| {
                raw.parse::<usize>().map_err(|_| {
                    ConfigError::Invalid(
                        "STASH_HISTORY_DEPTH must be an integer in [0, 100]".to_string(),
                    )
                })
            })?;
        if history_depth > 100 {
            return Err(ConfigError::Invalid(
                "STASH_HISTORY_DEPTH must be in [0, 100]".to_string(),
            ));
        }

        let tracked_keys = parse_tracked_keys(&value_or_default(
            &lookup,
            "STASH_TRACKED_KEYS",
            DEFAULT_TRACKED_KEYS,
        ))?;

        let cache = optional_trimmed(&lookup, "STASH_CACHE").and_then(|raw| CacheBackend::parse(&raw));

        Ok(Self {
            api_base_url,
            user_id,
            sync_interval: Duration::from_secs(sync_interval_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            tracked_keys,
            history_depth,
            cache,
        })
    }

    /// Whether a remote endpoint is configured.
    pub const fn is_sync_configured(&self) -> bool {
        self.api_base_url.is_some()
    }
}

/// Split a comma-separated key list, dropping blanks and duplicates.
pub fn parse_tracked_keys(raw: &str) -> Result<Vec<String>, ConfigError> {
    let mut keys: Vec<String> = Vec::new();
    for key in raw.split(',').map(str::trim).filter(|key| !key.is_empty()) {
        if is_reserved_key(key) {
            return Err(ConfigError::Invalid(format!(
                "tracked key '{key}' uses the reserved prefix"
            )));
        }
        if !keys.iter().any(|existing| existing == key) {
            keys.push(key.to_string());
        }
    }
    if keys.is_empty() {
        return Err(ConfigError::Invalid(
            "STASH_TRACKED_KEYS must name at least one key".to_string(),
        ));
    }
    Ok(keys)
}

fn bounded_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let message = || {
        format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        )
    };
    let value = match optional_trimmed(lookup, name) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::Invalid(message()))?,
        None => default,
    };
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(message()));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;
    use pretty_assertions::assert_eq;

    fn settings_from(map: &HashMap<&str, &str>) -> Result<SyncSettings, ConfigError> {
        SyncSettings::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn empty_environment_is_local_only_with_defaults() {
        let settings = settings_from(&HashMap::new()).unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert!(!settings.is_sync_configured());
        assert_eq!(settings.tracked_keys, vec!["notes", "settings"]);
        assert_eq!(settings.sync_interval, Duration::from_secs(60));
    }

    #[test]
    fn parses_full_configuration() {
        let mut map = HashMap::new();
        map.insert("STASH_API_URL", "https://sync.example.com/");
        map.insert("STASH_USER_ID", " user-1 ");
        map.insert("STASH_SYNC_INTERVAL_SECS", "30");
        map.insert("STASH_REQUEST_TIMEOUT_SECS", "5");
        map.insert("STASH_TRACKED_KEYS", "notes, todos,,notes");
        map.insert("STASH_HISTORY_DEPTH", "3");
        map.insert("STASH_CACHE", "/tmp/stash.db");

        let settings = settings_from(&map).unwrap();
        assert_eq!(
            settings.api_base_url.as_deref(),
            Some("https://sync.example.com")
        );
        assert_eq!(settings.user_id.as_deref(), Some("user-1"));
        assert_eq!(settings.sync_interval, Duration::from_secs(30));
        assert_eq!(settings.request_timeout, Duration::from_secs(5));
        assert_eq!(settings.tracked_keys, vec!["notes", "todos"]);
        assert_eq!(settings.history_depth, 3);
        assert_eq!(
            settings.cache,
            Some(CacheBackend::LibSql {
                path: PathBuf::from("/tmp/stash.db")
            })
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let mut map = HashMap::new();
        map.insert("STASH_API_URL", "sync.example.com");
        assert!(settings_from(&map)
            .unwrap_err()
            .to_string()
            .contains("STASH_API_URL"));

        let mut map = HashMap::new();
        map.insert("STASH_SYNC_INTERVAL_SECS", "1");
        assert!(settings_from(&map)
            .unwrap_err()
            .to_string()
            .contains("[5, 3600]"));

        let mut map = HashMap::new();
        map.insert("STASH_TRACKED_KEYS", "__stash.sync.pending");
        assert!(settings_from(&map).is_err());
    }
}
