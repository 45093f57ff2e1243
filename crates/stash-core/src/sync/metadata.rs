//! Per-device sync metadata kept in the local cache under reserved keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cache::LocalCache;
use crate::error::Result;

/// Prefix reserved for sync bookkeeping; application keys may not use it.
pub const RESERVED_PREFIX: &str = "__stash.";

const LAST_SYNCED_AT_KEY: &str = "__stash.sync.lastSyncedAt";
const SYNC_KEY_KEY: &str = "__stash.sync.syncKey";
const PENDING_KEY: &str = "__stash.sync.pending";
const PUSHED_KEY: &str = "__stash.sync.pushed";
const DEVICE_KEY_PREFIX: &str = "device-";

/// How a requested owner relates to the one the cache was last bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityChange {
    /// Same owner, a first binding, or no user id to switch to.
    Unchanged,
    /// A generated device key gives way to a user id; local data carries over.
    Adopted,
    /// One user id replaces another; local data belongs to the previous owner.
    Switched,
}

/// Whether `key` belongs to the sync layer rather than the application.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Watermark, sync identity and pending-edit ledger for one device.
pub struct SyncMetadataStore<C> {
    cache: Arc<C>,
    // Serializes read-modify-write of the shared reserved entries.
    write_lock: Mutex<()>,
}

impl<C: LocalCache> SyncMetadataStore<C> {
    pub fn new(cache: Arc<C>) -> Self {
        Self {
            cache,
            write_lock: Mutex::new(()),
        }
    }

    /// Timestamp of the last fully successful cycle; 0 before the first one.
    pub async fn last_synced_at(&self) -> Result<i64> {
        Ok(self
            .cache
            .get(LAST_SYNCED_AT_KEY)
            .await?
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(0))
    }

    /// Move the watermark forward to `timestamp`.
    ///
    /// Never moves backwards; returns the watermark in effect afterwards.
    pub async fn advance(&self, timestamp: i64) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let current = self.last_synced_at().await?;
        if timestamp <= current {
            if timestamp < current {
                tracing::debug!(current, timestamp, "Ignoring backwards watermark");
            }
            return Ok(current);
        }
        self.cache
            .set(LAST_SYNCED_AT_KEY, &timestamp.to_string())
            .await?;
        Ok(timestamp)
    }

    /// The persisted owner identifier, if one was ever chosen.
    pub async fn sync_key(&self) -> Result<Option<String>> {
        Ok(self
            .cache
            .get(SYNC_KEY_KEY)
            .await?
            .filter(|key| !key.trim().is_empty()))
    }

    /// Classify `user_id` against the stored owner without changing anything.
    pub async fn identity_change(&self, user_id: Option<&str>) -> Result<IdentityChange> {
        let stored = self.sync_key().await?;
        Ok(classify(stored.as_deref(), normalize_user_id(user_id)))
    }

    /// Resolve the owner identifier for talking to the server.
    ///
    /// An identity-provider `user_id` always wins and is persisted. Without
    /// one, a previously persisted key is reused, or a fresh device key is
    /// generated. Any change of owner resets the watermark and the pushed
    /// ledger, since both describe the previous owner's document stream. A
    /// switch between two user ids also drops pending marks; discarding the
    /// previous owner's documents is up to the caller.
    pub async fn ensure_sync_key(&self, user_id: Option<&str>) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let stored = self.sync_key().await?;
        let user_id = normalize_user_id(user_id);

        let resolved = match (user_id, stored.as_deref()) {
            (Some(user_id), Some(stored)) if stored == user_id => return Ok(user_id.to_string()),
            (None, Some(stored)) => return Ok(stored.to_string()),
            (Some(user_id), _) => user_id.to_string(),
            (None, None) => format!("{DEVICE_KEY_PREFIX}{}", Uuid::now_v7()),
        };

        match classify(stored.as_deref(), user_id) {
            IdentityChange::Unchanged => {}
            IdentityChange::Adopted => {
                tracing::info!("Device key replaced by user id; resetting watermark");
                self.cache.remove(LAST_SYNCED_AT_KEY).await?;
                self.cache.remove(PUSHED_KEY).await?;
            }
            IdentityChange::Switched => {
                tracing::info!("Sync user switched; resetting watermark and ledgers");
                self.cache.remove(LAST_SYNCED_AT_KEY).await?;
                self.cache.remove(PUSHED_KEY).await?;
                self.cache.remove(PENDING_KEY).await?;
            }
        }

        self.cache.set(SYNC_KEY_KEY, &resolved).await?;
        Ok(resolved)
    }

    /// Keys with local edits not yet confirmed by a push, with their edit stamp.
    pub async fn pending(&self) -> Result<BTreeMap<String, i64>> {
        self.read_ledger(PENDING_KEY).await
    }

    /// Edit stamp of the pending change for `key`, if any.
    pub async fn pending_stamp(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.pending().await?.get(key).copied())
    }

    /// Record a local edit of `key` at `stamp`.
    pub async fn mark_pending(&self, key: &str, stamp: i64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut pending = self.pending().await?;
        pending.insert(key.to_string(), stamp);
        self.write_ledger(PENDING_KEY, &pending).await
    }

    /// Clear the pending mark for `key` only if it still carries `stamp`.
    ///
    /// An edit made after `stamp` keeps the key pending for the next cycle.
    pub async fn clear_pending_if(&self, key: &str, stamp: i64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut pending = self.pending().await?;
        if pending.get(key) != Some(&stamp) {
            return Ok(false);
        }
        pending.remove(key);
        self.write_ledger(PENDING_KEY, &pending).await?;
        Ok(true)
    }

    /// `updatedAt` this device last pushed for `key`.
    ///
    /// A pulled document carrying exactly this stamp is the device's own
    /// write coming back, not a change made elsewhere.
    pub async fn pushed_at(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.read_ledger(PUSHED_KEY).await?.get(key).copied())
    }

    /// Remember that `keys` were pushed with `updated_at`.
    pub async fn record_pushed<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a str>,
        updated_at: i64,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut pushed = self.read_ledger(PUSHED_KEY).await?;
        for key in keys {
            pushed.insert(key.to_string(), updated_at);
        }
        self.write_ledger(PUSHED_KEY, &pushed).await
    }

    /// Forget the watermark, the sync identity and both ledgers.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.cache.remove(LAST_SYNCED_AT_KEY).await?;
        self.cache.remove(SYNC_KEY_KEY).await?;
        self.cache.remove(PENDING_KEY).await?;
        self.cache.remove(PUSHED_KEY).await?;
        Ok(())
    }

    async fn read_ledger(&self, ledger: &str) -> Result<BTreeMap<String, i64>> {
        let raw = self.cache.get(ledger).await?;
        Ok(raw
            .and_then(|raw| serde_json::from_str::<BTreeMap<String, i64>>(&raw).ok())
            .unwrap_or_default())
    }

    async fn write_ledger(&self, ledger: &str, entries: &BTreeMap<String, i64>) -> Result<()> {
        if entries.is_empty() {
            self.cache.remove(ledger).await
        } else {
            self.cache
                .set(ledger, &serde_json::to_string(entries)?)
                .await
        }
    }
}

fn normalize_user_id(user_id: Option<&str>) -> Option<&str> {
    user_id.map(str::trim).filter(|id| !id.is_empty())
}

fn classify(stored: Option<&str>, user_id: Option<&str>) -> IdentityChange {
    match (stored, user_id) {
        (Some(stored), Some(user_id)) if stored != user_id => {
            if stored.starts_with(DEVICE_KEY_PREFIX) {
                IdentityChange::Adopted
            } else {
                IdentityChange::Switched
            }
        }
        _ => IdentityChange::Unchanged,
    }
}
