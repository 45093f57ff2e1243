//! Bounded snapshot history of successfully synced values.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::LocalCache;
use crate::error::Result;
use crate::util::now_millis;

const HISTORY_PREFIX: &str = "__stash.history.";

/// One retained value of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub value: String,
    pub captured_at: i64,
}

/// Ring buffer of the last `depth` synced values per key, newest first.
pub struct SnapshotHistory<C> {
    cache: Arc<C>,
    depth: usize,
}

impl<C: LocalCache> SnapshotHistory<C> {
    pub const fn new(cache: Arc<C>, depth: usize) -> Self {
        Self { cache, depth }
    }

    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Retained snapshots for `key`, newest first.
    pub async fn list(&self, key: &str) -> Result<Vec<Snapshot>> {
        let raw = self.cache.get(&history_key(key)).await?;
        Ok(raw
            .and_then(|raw| serde_json::from_str::<Vec<Snapshot>>(&raw).ok())
            .unwrap_or_default())
    }

    /// Snapshot at `index` (0 = newest).
    pub async fn get(&self, key: &str, index: usize) -> Result<Option<Snapshot>> {
        Ok(self.list(key).await?.into_iter().nth(index))
    }

    /// Remember `value` as the newest snapshot of `key`.
    ///
    /// Consecutive identical values are stored once. Callers hold the key's
    /// lock so that concurrent records of the same key cannot interleave.
    pub async fn record(&self, key: &str, value: &str) -> Result<bool> {
        if self.depth == 0 {
            return Ok(false);
        }
        let mut snapshots = self.list(key).await?;
        if snapshots.first().is_some_and(|newest| newest.value == value) {
            return Ok(false);
        }
        snapshots.insert(
            0,
            Snapshot {
                value: value.to_string(),
                captured_at: now_millis(),
            },
        );
        snapshots.truncate(self.depth);
        self.cache
            .set(&history_key(key), &serde_json::to_string(&snapshots)?)
            .await?;
        Ok(true)
    }

    /// Drop every snapshot of `key`.
    pub async fn clear(&self, key: &str) -> Result<()> {
        self.cache.remove(&history_key(key)).await
    }
}

fn history_key(key: &str) -> String {
    format!("{HISTORY_PREFIX}{key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn keeps_newest_first_and_bounded() {
        let history = SnapshotHistory::new(Arc::new(MemoryCache::new()), 2);
        assert!(history.record("notes", "v1").await.unwrap());
        assert!(history.record("notes", "v2").await.unwrap());
        assert!(history.record("notes", "v3").await.unwrap());

        let values: Vec<String> = history
            .list("notes")
            .await
            .unwrap()
            .into_iter()
            .map(|snapshot| snapshot.value)
            .collect();
        assert_eq!(values, vec!["v3", "v2"]);
        assert_eq!(
            history.get("notes", 1).await.unwrap().map(|s| s.value),
            Some("v2".to_string())
        );
        assert_eq!(history.get("notes", 5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn skips_duplicate_consecutive_values() {
        let history = SnapshotHistory::new(Arc::new(MemoryCache::new()), 5);
        assert!(history.record("notes", "same").await.unwrap());
        assert!(!history.record("notes", "same").await.unwrap());
        assert_eq!(history.list("notes").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_depth_disables_history() {
        let cache = Arc::new(MemoryCache::new());
        let history = SnapshotHistory::new(cache.clone(), 0);
        assert!(!history.record("notes", "v1").await.unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_snapshots() {
        let history = SnapshotHistory::new(Arc::new(MemoryCache::new()), 3);
        history.record("notes", "v1").await.unwrap();
        history.clear("notes").await.unwrap();
        assert!(history.list("notes").await.unwrap().is_empty());
    }
}
