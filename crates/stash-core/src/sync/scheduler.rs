//! Sync scheduler: runs pull/merge/push cycles and mediates application writes.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::history::{Snapshot, SnapshotHistory};
use super::locks::KeyLocks;
use super::merge::reconcile_cached;
use super::metadata::{is_reserved_key, IdentityChange, SyncMetadataStore};
use super::notify::{ChangeEvent, ChangeNotifier, Subscription, SubscriptionId};
use super::transport::SyncTransport;
use super::{SyncError, SyncResult};
use crate::cache::LocalCache;
use crate::config::SyncSettings;
use crate::error::{Error, ErrorCode, Result};
use crate::protocol::{PullRequest, PushRequest, SyncDocument};
use crate::util::now_millis;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Knobs the scheduler needs from client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub user_id: Option<String>,
    pub tracked_keys: Vec<String>,
    pub request_timeout: Duration,
    pub history_depth: usize,
}

impl SchedulerOptions {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            user_id: settings.user_id.clone(),
            tracked_keys: settings.tracked_keys.clone(),
            request_timeout: settings.request_timeout,
            history_depth: settings.history_depth,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

/// Observable state of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// No sync endpoint configured; the cache is the only store.
    Local,
    Idle,
    Syncing,
    Synced,
    Error(String),
}

impl SyncStatus {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error(_) => "error",
        }
    }
}

/// Point-in-time view for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: SyncStatus,
    pub last_synced_at: i64,
    pub last_error: Option<String>,
    pub last_cycle_at: Option<i64>,
    /// Tracked keys with local edits the server has not confirmed.
    pub pending_keys: Vec<String>,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Documents returned by the pull, tracked or not.
    pub pulled: usize,
    pub updated_keys: Vec<String>,
    pub pushed_keys: Vec<String>,
    /// Local records dropped because another device deleted them.
    pub dropped_records: usize,
    pub last_synced_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Not configured, or another cycle was already running.
    Skipped,
    Failed { code: ErrorCode, message: String },
}

#[derive(Debug)]
struct StatusState {
    status: SyncStatus,
    last_error: Option<String>,
    last_cycle_at: Option<i64>,
}

#[derive(Debug, Default)]
struct RemoteApplied {
    updated: bool,
    should_push: bool,
    dropped: usize,
}

/// Drives sync cycles for one device and owns the application write path.
///
/// Every write goes through the same per-key locks as the merge step, so a
/// merge never interleaves with an edit of the same key.
pub struct SyncScheduler<C, T> {
    cache: Arc<C>,
    transport: Option<T>,
    metadata: SyncMetadataStore<C>,
    history: SnapshotHistory<C>,
    locks: KeyLocks,
    notifier: ChangeNotifier,
    options: SchedulerOptions,
    in_flight: AtomicBool,
    edit_clock: AtomicI64,
    state: Mutex<StatusState>,
}

impl<C: LocalCache, T: SyncTransport> SyncScheduler<C, T> {
    pub fn new(cache: Arc<C>, transport: Option<T>, options: SchedulerOptions) -> Self {
        let status = if transport.is_some() {
            SyncStatus::Idle
        } else {
            SyncStatus::Local
        };
        Self {
            metadata: SyncMetadataStore::new(Arc::clone(&cache)),
            history: SnapshotHistory::new(Arc::clone(&cache), options.history_depth),
            cache,
            transport,
            locks: KeyLocks::new(),
            notifier: ChangeNotifier::new(),
            options,
            in_flight: AtomicBool::new(false),
            edit_clock: AtomicI64::new(0),
            state: Mutex::new(StatusState {
                status,
                last_error: None,
                last_cycle_at: None,
            }),
        }
    }

    pub const fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    pub fn tracked_keys(&self) -> &[String] {
        &self.options.tracked_keys
    }

    pub const fn metadata(&self) -> &SyncMetadataStore<C> {
        &self.metadata
    }

    fn is_tracked(&self, key: &str) -> bool {
        self.options.tracked_keys.iter().any(|tracked| tracked == key)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        check_key(key)?;
        self.cache.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        self.claim_owner().await?;
        let _guard = self.locks.lock(key).await;
        self.cache.set(key, value).await?;
        self.mark_edited(key).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        check_key(key)?;
        self.claim_owner().await?;
        let _guard = self.locks.lock(key).await;
        self.cache.remove(key).await?;
        self.mark_edited(key).await
    }

    /// Read-modify-write of `key` under its lock; `None` from `f` removes it.
    pub async fn update<F>(&self, key: &str, f: F) -> Result<Option<String>>
    where
        F: FnOnce(Option<String>) -> Option<String> + Send,
    {
        check_key(key)?;
        self.claim_owner().await?;
        let _guard = self.locks.lock(key).await;
        let current = self.cache.get(key).await?;
        let next = f(current.clone());
        if next == current {
            return Ok(next);
        }
        match next.as_deref() {
            Some(value) => self.cache.set(key, value).await?,
            None => self.cache.remove(key).await?,
        }
        self.mark_edited(key).await?;
        Ok(next)
    }

    /// Synced snapshots of `key`, newest first.
    pub async fn history(&self, key: &str) -> Result<Vec<Snapshot>> {
        check_key(key)?;
        self.history.list(key).await
    }

    /// Write snapshot `index` of `key` back as a local edit.
    pub async fn restore(&self, key: &str, index: usize) -> Result<Snapshot> {
        let snapshot = self.history(key).await?.into_iter().nth(index).ok_or_else(|| {
            Error::InvalidInput(format!("no snapshot {index} for key '{key}'"))
        })?;
        self.set(key, &snapshot.value).await?;
        Ok(snapshot)
    }

    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    pub async fn last_synced_at(&self) -> Result<i64> {
        self.metadata.last_synced_at().await
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        let last_synced_at = self.metadata.last_synced_at().await?;
        let pending_keys = self
            .metadata
            .pending()
            .await?
            .into_keys()
            .filter(|key| self.is_tracked(key))
            .collect();
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(StatusSnapshot {
            status: state.status.clone(),
            last_synced_at,
            last_error: state.last_error.clone(),
            last_cycle_at: state.last_cycle_at,
            pending_keys,
        })
    }

    /// Forget sync identity, watermark and ledgers; with `purge`, also the
    /// tracked documents and their history.
    pub async fn reset(&self, purge: bool) -> Result<()> {
        self.metadata.reset().await?;
        if purge {
            self.purge_tracked().await?;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.status = if self.is_configured() {
            SyncStatus::Idle
        } else {
            SyncStatus::Local
        };
        state.last_error = None;
        state.last_cycle_at = None;
        drop(state);
        tracing::info!(purge, "Sync state reset");
        Ok(())
    }

    /// Run one cycle now.
    ///
    /// Never fails: errors end up in the outcome and the status.
    pub async fn sync_now(&self) -> CycleOutcome {
        let Some(transport) = self.transport.as_ref() else {
            return CycleOutcome::Skipped;
        };
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync cycle already running; skipping trigger");
            return CycleOutcome::Skipped;
        }
        let _guard = CycleGuard {
            in_flight: &self.in_flight,
            state: &self.state,
        };
        self.set_status(SyncStatus::Syncing, None);
        tracing::debug!("Sync cycle started");

        match self.run_cycle(transport).await {
            Ok(report) => {
                self.set_status(SyncStatus::Synced, Some(now_millis()));
                tracing::info!(
                    pulled = report.pulled,
                    updated = report.updated_keys.len(),
                    pushed = report.pushed_keys.len(),
                    dropped = report.dropped_records,
                    "Sync cycle completed"
                );
                self.notifier.publish(&ChangeEvent {
                    updated_keys: report.updated_keys.clone(),
                    pushed_keys: report.pushed_keys.clone(),
                    last_synced_at: report.last_synced_at,
                });
                CycleOutcome::Completed(report)
            }
            Err(error) => {
                let message = error.to_string();
                tracing::warn!(code = %error.code(), "Sync cycle failed: {message}");
                self.set_status(SyncStatus::Error(message.clone()), Some(now_millis()));
                CycleOutcome::Failed {
                    code: error.code(),
                    message,
                }
            }
        }
    }

    /// Spawn a task running a cycle immediately and then every `interval`.
    pub fn start(self: &Arc<Self>, interval: Duration) -> BackgroundSync
    where
        C: 'static,
        T: 'static,
    {
        if !self.is_configured() {
            tracing::debug!("Sync endpoint not configured; background sync disabled");
            return BackgroundSync { handle: None };
        }
        let scheduler = Arc::clone(self);
        let period = interval.max(MIN_INTERVAL);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                scheduler.sync_now().await;
            }
        });
        tracing::debug!(interval_ms = period.as_millis(), "Background sync started");
        BackgroundSync {
            handle: Some(handle),
        }
    }

    async fn run_cycle(&self, transport: &T) -> SyncResult<CycleReport> {
        let owner = self.claim_owner().await?;
        let since = self.metadata.last_synced_at().await?;

        let pulled = self
            .bounded(transport.pull(&PullRequest::new(owner.clone(), since)))
            .await?;

        let mut updated = BTreeSet::new();
        let mut dropped_records = 0;
        for document in &pulled.items {
            if !self.is_tracked(&document.key) {
                continue;
            }
            let _guard = self.locks.lock(&document.key).await;
            let applied = self.apply_remote(document, since).await?;
            if applied.updated {
                updated.insert(document.key.clone());
            }
            if applied.should_push {
                // Retry a failed push on the next cycle even without new edits.
                if self.metadata.pending_stamp(&document.key).await?.is_none() {
                    let stamp = self.next_stamp();
                    self.metadata.mark_pending(&document.key, stamp).await?;
                }
            }
            dropped_records += applied.dropped;
        }

        let pending = self.metadata.pending().await?;
        let mut batch = Vec::new();
        let mut confirmed = Vec::new();
        let push_stamp = self.next_stamp();
        for key in &self.options.tracked_keys {
            if !pending.contains_key(key) {
                continue;
            }
            let _guard = self.locks.lock(key).await;
            let stamp = self.metadata.pending_stamp(key).await?;
            batch.push(match self.cache.get(key).await? {
                Some(value) => SyncDocument::live(key.as_str(), value, push_stamp),
                None => SyncDocument::tombstone(key.as_str(), push_stamp),
            });
            confirmed.push((key.clone(), stamp));
        }

        if !batch.is_empty() {
            self.bounded(transport.push(&PushRequest::new(owner, batch)))
                .await?;
            self.metadata
                .record_pushed(confirmed.iter().map(|(key, _)| key.as_str()), push_stamp)
                .await?;
            for (key, stamp) in &confirmed {
                if let Some(stamp) = stamp {
                    self.metadata.clear_pending_if(key, *stamp).await?;
                }
            }
        }
        let pushed_keys: Vec<String> = confirmed.into_iter().map(|(key, _)| key).collect();

        for key in updated.iter().chain(pushed_keys.iter()) {
            let _guard = self.locks.lock(key).await;
            if let Some(value) = self.cache.get(key).await? {
                self.history.record(key, &value).await?;
            }
        }

        let last_synced_at = self.metadata.advance(pulled.timestamp).await?;
        Ok(CycleReport {
            pulled: pulled.items.len(),
            updated_keys: updated.into_iter().collect(),
            pushed_keys,
            dropped_records,
            last_synced_at,
        })
    }

    /// Fold one pulled document into the cache. Caller holds the key's lock.
    async fn apply_remote(&self, document: &SyncDocument, since: i64) -> Result<RemoteApplied> {
        let key = document.key.as_str();
        if self.metadata.pushed_at(key).await? == Some(document.updated_at) {
            tracing::trace!(key, "Skipping own pushed document");
            return Ok(RemoteApplied::default());
        }
        let pending = self.metadata.pending_stamp(key).await?;

        if let Some(deleted_at) = document.deleted_at {
            if pending.is_some_and(|stamp| stamp > deleted_at) {
                tracing::debug!(key, "Local edit is newer than remote deletion");
                return Ok(RemoteApplied::default());
            }
            let existed = self.cache.get(key).await?.is_some();
            self.cache.remove(key).await?;
            if let Some(stamp) = pending {
                self.metadata.clear_pending_if(key, stamp).await?;
            }
            return Ok(RemoteApplied {
                updated: existed,
                ..RemoteApplied::default()
            });
        }

        let Some(remote) = document.value.as_deref() else {
            tracing::warn!(key, "Pulled live document without a value; ignoring");
            return Ok(RemoteApplied::default());
        };

        if let Some(outcome) = reconcile_cached(self.cache.as_ref(), key, remote, since).await? {
            if let Some(stamp) = pending.filter(|_| !outcome.should_push) {
                self.metadata.clear_pending_if(key, stamp).await?;
            }
            return Ok(RemoteApplied {
                updated: outcome.local_changed,
                should_push: outcome.should_push,
                dropped: outcome.dropped.len(),
            });
        }

        // Whole-document last-write-wins.
        if pending.is_some_and(|stamp| stamp > document.updated_at) {
            return Ok(RemoteApplied::default());
        }
        let changed = self.cache.get(key).await?.as_deref() != Some(remote);
        if changed {
            self.cache.set(key, remote).await?;
        }
        if let Some(stamp) = pending {
            self.metadata.clear_pending_if(key, stamp).await?;
        }
        Ok(RemoteApplied {
            updated: changed,
            ..RemoteApplied::default()
        })
    }

    /// Bind the cache to the configured owner.
    ///
    /// Documents cached under a device key are queued for the new owner.
    /// Another user's documents are discarded together with their history
    /// before the new identity is persisted, so an interrupted purge is
    /// retried rather than pushed under the new owner.
    async fn claim_owner(&self) -> Result<String> {
        let user_id = self.options.user_id.as_deref();
        if self.transport.is_none() {
            return self.metadata.ensure_sync_key(user_id).await;
        }
        match self.metadata.identity_change(user_id).await? {
            IdentityChange::Unchanged => {}
            IdentityChange::Adopted => {
                // The new owner's stream has never seen these documents.
                for key in &self.options.tracked_keys {
                    let _guard = self.locks.lock(key).await;
                    if self.cache.get(key).await?.is_some() {
                        let stamp = self.next_stamp();
                        self.metadata.mark_pending(key, stamp).await?;
                    }
                }
            }
            IdentityChange::Switched => {
                tracing::info!("Cached documents belong to another user; discarding them");
                self.purge_tracked().await?;
            }
        }
        self.metadata.ensure_sync_key(user_id).await
    }

    async fn purge_tracked(&self) -> Result<()> {
        for key in &self.options.tracked_keys {
            let _guard = self.locks.lock(key).await;
            self.cache.remove(key).await?;
            self.history.clear(key).await?;
        }
        Ok(())
    }

    async fn mark_edited(&self, key: &str) -> Result<()> {
        if self.is_tracked(key) {
            let stamp = self.next_stamp();
            self.metadata.mark_pending(key, stamp).await?;
        }
        Ok(())
    }

    /// Wall-clock millis, strictly increasing within this scheduler.
    fn next_stamp(&self) -> i64 {
        let now = now_millis();
        let previous = self
            .edit_clock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |previous| {
                Some(now.max(previous + 1))
            })
            .unwrap_or_else(|previous| previous);
        now.max(previous + 1)
    }

    async fn bounded<F, R>(&self, request: F) -> SyncResult<R>
    where
        F: Future<Output = SyncResult<R>>,
    {
        let limit = self.options.request_timeout;
        tokio::time::timeout(limit, request)
            .await
            .map_err(|_| SyncError::Timeout(limit))?
    }

    fn set_status(&self, status: SyncStatus, cycle_at: Option<i64>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_error = match &status {
            SyncStatus::Error(message) => Some(message.clone()),
            SyncStatus::Synced => None,
            _ => state.last_error.take(),
        };
        state.status = status;
        if cycle_at.is_some() {
            state.last_cycle_at = cycle_at;
        }
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::InvalidInput("key must not be empty".to_string()));
    }
    if is_reserved_key(key) {
        return Err(Error::InvalidInput(format!(
            "key '{key}' uses the reserved sync prefix"
        )));
    }
    Ok(())
}

/// Releases the single-flight flag, including when a cycle future is dropped.
struct CycleGuard<'a> {
    in_flight: &'a AtomicBool,
    state: &'a Mutex<StatusState>,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.status == SyncStatus::Syncing {
            let message = "sync cycle cancelled".to_string();
            state.last_error = Some(message.clone());
            state.status = SyncStatus::Error(message);
        }
        drop(state);
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Handle to the periodic sync task; the task stops when this is dropped.
#[derive(Debug)]
pub struct BackgroundSync {
    handle: Option<JoinHandle<()>>,
}

impl BackgroundSync {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!("Background sync stopped");
        }
    }
}

impl Drop for BackgroundSync {
    fn drop(&mut self) {
        self.abort();
    }
}
