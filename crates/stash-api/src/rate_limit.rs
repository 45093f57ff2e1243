//! Per-owner request budgets for the sync endpoints.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use stash_core::util::owner_fingerprint;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEndpoint {
    Pull,
    Push,
}

impl SyncEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pull => "sync_pull",
            Self::Push => "sync_push",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitMetricsSnapshot {
    pub pull_allowed: u64,
    pub pull_limited: u64,
    pub push_allowed: u64,
    pub push_limited: u64,
    /// Owners with an open window across both endpoints.
    pub tracked_owners: usize,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

/// Open windows of one endpoint, keyed by owner.
#[derive(Debug, Default)]
struct EndpointBudget {
    windows: HashMap<String, RateWindow>,
    allowed: u64,
    limited: u64,
}

#[derive(Debug, Default)]
struct Budgets {
    pull: EndpointBudget,
    push: EndpointBudget,
    last_sweep: Option<Instant>,
}

impl Budgets {
    fn endpoint(&mut self, endpoint: SyncEndpoint) -> &mut EndpointBudget {
        match endpoint {
            SyncEndpoint::Pull => &mut self.pull,
            SyncEndpoint::Push => &mut self.push,
        }
    }
}

/// Fixed-window limiter shared by the pull and push handlers.
///
/// Owner ids are client supplied, so closed windows are swept at most once
/// per window length to keep the map bounded by recently active owners.
pub struct SyncRateLimiter {
    budgets: Mutex<Budgets>,
    window: Duration,
    limit: u32,
}

impl SyncRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.rate_limit_window, config.sync_rate_limit_per_window)
    }

    fn new(window: Duration, limit: u32) -> Self {
        Self {
            budgets: Mutex::new(Budgets::default()),
            window,
            limit,
        }
    }

    /// Count one request of `owner` against `endpoint`'s budget.
    pub async fn check(&self, endpoint: SyncEndpoint, owner: &str) -> Result<(), AppError> {
        let now = Instant::now();
        let mut budgets = self.budgets.lock().await;

        if budgets
            .last_sweep
            .map_or(true, |swept| now.duration_since(swept) >= self.window)
        {
            budgets.pull.evict_expired(now, self.window);
            budgets.push.evict_expired(now, self.window);
            budgets.last_sweep = Some(now);
        }

        let window = self.window;
        let budget = budgets.endpoint(endpoint);
        let entry = budget
            .windows
            .entry(owner.to_string())
            .or_insert(RateWindow {
                started_at: now,
                count: 0,
            });
        if now.duration_since(entry.started_at) >= window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            let retry_after_secs = window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs()
                .max(1);
            budget.limited += 1;
            tracing::warn!(
                endpoint = endpoint.label(),
                owner = owner_fingerprint(owner),
                retry_after_secs,
                "Sync request over budget"
            );
            return Err(AppError::too_many_requests(
                format!("Too many {} requests; retry later", endpoint.label()),
                retry_after_secs,
            ));
        }

        entry.count += 1;
        budget.allowed += 1;
        Ok(())
    }

    pub async fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        let budgets = self.budgets.lock().await;
        RateLimitMetricsSnapshot {
            pull_allowed: budgets.pull.allowed,
            pull_limited: budgets.pull.limited,
            push_allowed: budgets.push.allowed,
            push_limited: budgets.push.limited,
            tracked_owners: budgets.pull.windows.len() + budgets.push.windows.len(),
        }
    }
}
