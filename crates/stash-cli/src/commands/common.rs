use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use stash_core::cache::{open_cache, AnyCache, CacheBackend};
use stash_core::config::SyncSettings;
use stash_core::sync::{HttpTransport, SchedulerOptions, SyncScheduler};

use crate::error::CliError;

/// Scheduler over the session's cache and, when configured, the HTTP endpoint.
pub type Scheduler = SyncScheduler<AnyCache, HttpTransport>;

pub fn default_cache_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("stash").join("cache.db"))
        .ok_or(CliError::NoDataDir)
}

/// `--cache` wins over `STASH_CACHE`, which wins over the platform data dir.
pub fn resolve_backend(
    flag: Option<&str>,
    settings: &SyncSettings,
) -> Result<CacheBackend, CliError> {
    if let Some(backend) = flag.and_then(CacheBackend::parse) {
        return Ok(backend);
    }
    if let Some(backend) = settings.cache.clone() {
        return Ok(backend);
    }
    Ok(CacheBackend::LibSql {
        path: default_cache_path()?,
    })
}

pub async fn open_scheduler(
    settings: &SyncSettings,
    backend: &CacheBackend,
) -> Result<Scheduler, CliError> {
    let cache = Arc::new(open_cache(backend).await?);
    let transport = settings
        .api_base_url
        .as_deref()
        .map(|url| HttpTransport::new(url, settings.request_timeout))
        .transpose()?;
    if transport.is_none() {
        tracing::debug!("STASH_API_URL not set; running in local-only mode");
    }
    Ok(SyncScheduler::new(
        cache,
        transport,
        SchedulerOptions::from_settings(settings),
    ))
}

/// Join CLI words into a value, falling back to piped stdin.
pub fn resolve_value(parts: &[String]) -> Result<String, CliError> {
    if !parts.is_empty() {
        return normalize_value(&parts.join(" ")).ok_or(CliError::EmptyValue);
    }

    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Err(CliError::EmptyValue);
    }
    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    normalize_value(&buffer).ok_or(CliError::EmptyValue)
}

pub fn normalize_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Pretty JSON when the value parses, the raw text otherwise.
pub fn pretty_value(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| raw.to_string())
}

pub fn preview(raw: &str, max_chars: usize) -> String {
    let single_line = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let mut truncated: String = single_line.chars().take(max_chars.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}
