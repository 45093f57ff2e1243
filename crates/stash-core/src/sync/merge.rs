//! Collection merge engine for array-valued documents.
//!
//! A collection is a JSON array of records, each an object with an `id` and a
//! `createdAt` stamp. Remote snapshots are authoritative for every id they
//! contain; a local-only record survives only if it was created after the
//! device's last successful sync, otherwise its absence on the server means
//! another device deleted it.

use std::collections::HashSet;

use serde_json::Value;

use crate::cache::LocalCache;
use crate::error::Result;

/// Result of reconciling one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Remote records followed by surviving local-only records.
    pub merged: Vec<Value>,
    /// The merged array differs from what the cache held.
    pub local_changed: bool,
    /// Local state holds records the server has not seen.
    pub should_push: bool,
    /// Ids of local-only records kept as not-yet-pushed.
    pub retained: Vec<String>,
    /// Ids of local records dropped as deleted elsewhere.
    pub dropped: Vec<String>,
    /// Ids present on both sides with different content; the remote copy won.
    pub overridden: Vec<String>,
}

impl MergeOutcome {
    /// Serialized form of `merged`, as stored in the cache.
    pub fn merged_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.merged)?)
    }
}

/// Merge a cached collection with a freshly pulled remote one.
///
/// Returns `None` when `remote` is not a JSON array; such documents are not
/// collections and are reconciled as whole values by the caller. A missing or
/// unparsable local value counts as an empty collection.
pub fn merge_collection(
    local: Option<&str>,
    remote: &str,
    last_synced_at: i64,
) -> Option<MergeOutcome> {
    let Ok(Value::Array(remote_records)) = serde_json::from_str::<Value>(remote) else {
        return None;
    };
    let local_records = parse_records(local);

    let remote_ids: HashSet<String> = remote_records.iter().filter_map(record_id).collect();

    let mut merged = remote_records.clone();
    let mut retained = Vec::new();
    let mut dropped = Vec::new();
    let mut overridden = Vec::new();

    for record in &local_records {
        let id = record_id(record);
        match id {
            Some(id) if remote_ids.contains(&id) => {
                let differs = remote_records
                    .iter()
                    .find(|remote| record_id(remote).as_deref() == Some(id.as_str()))
                    .is_some_and(|remote| remote != record);
                if differs {
                    overridden.push(id);
                }
            }
            id => {
                let label = id.unwrap_or_default();
                if record_created_at(record) > last_synced_at {
                    retained.push(label);
                    merged.push(record.clone());
                } else {
                    dropped.push(label);
                }
            }
        }
    }

    if !overridden.is_empty() {
        tracing::debug!(
            count = overridden.len(),
            "Remote snapshot overrode locally modified records"
        );
    }

    Some(MergeOutcome {
        local_changed: merged != local_records,
        should_push: !retained.is_empty(),
        merged,
        retained,
        dropped,
        overridden,
    })
}

/// Reconcile the cached value of `key` against `remote` and persist the result.
///
/// The cache is only written when the merged collection differs from what it
/// held. Callers are responsible for holding the key's lock.
pub async fn reconcile_cached<C: LocalCache>(
    cache: &C,
    key: &str,
    remote: &str,
    last_synced_at: i64,
) -> Result<Option<MergeOutcome>> {
    let local = cache.get(key).await?;
    let Some(outcome) = merge_collection(local.as_deref(), remote, last_synced_at) else {
        return Ok(None);
    };

    if outcome.local_changed {
        cache.set(key, &outcome.merged_text()?).await?;
    }
    if !outcome.dropped.is_empty() {
        tracing::info!(
            key,
            dropped = outcome.dropped.len(),
            "Dropped records deleted on another device"
        );
    }
    Ok(Some(outcome))
}

fn parse_records(raw: Option<&str>) -> Vec<Value> {
    match raw.map(serde_json::from_str::<Value>) {
        Some(Ok(Value::Array(records))) => records,
        _ => Vec::new(),
    }
}

fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Creation stamp in ms; missing or unreadable stamps count as 0.
#[allow(clippy::cast_possible_truncation)] // JSON numbers may arrive as floats
fn record_created_at(record: &Value) -> i64 {
    match record.get("createdAt") {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64))
            .unwrap_or(0),
        Some(Value::String(text)) => text.trim().parse::<i64>().ok().unwrap_or_else(|| {
            chrono::DateTime::parse_from_rfc3339(text.trim())
                .map_or(0, |parsed| parsed.timestamp_millis())
        }),
        _ => 0,
    }
}
