use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use stash_core::sync::{CycleOutcome, StatusSnapshot};

use crate::commands::common::{format_relative_time, format_timestamp, Scheduler};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusItem {
    pub status: &'static str,
    pub error: Option<String>,
    pub last_synced_at: i64,
    pub pending_keys: Vec<String>,
    pub tracked_keys: Vec<String>,
    pub sync_key: Option<String>,
}

pub async fn run_sync(scheduler: &Scheduler) -> Result<(), CliError> {
    if !scheduler.is_configured() {
        return Err(CliError::SyncNotConfigured);
    }

    match scheduler.sync_now().await {
        CycleOutcome::Completed(report) => {
            println!(
                "Sync completed: {} pulled, {} updated, {} pushed",
                report.pulled,
                report.updated_keys.len(),
                report.pushed_keys.len()
            );
            if report.dropped_records > 0 {
                println!(
                    "{} record(s) removed because they were deleted on another device",
                    report.dropped_records
                );
            }
            Ok(())
        }
        CycleOutcome::Skipped => {
            println!("A sync cycle is already running");
            Ok(())
        }
        CycleOutcome::Failed { code, message } => Err(CliError::SyncFailed {
            code: code.to_string(),
            message,
        }),
    }
}

pub async fn run_status(scheduler: &Scheduler, as_json: bool) -> Result<(), CliError> {
    let snapshot = scheduler.status().await?;
    let sync_key = scheduler.metadata().sync_key().await?;

    if as_json {
        let item = StatusItem {
            status: snapshot.status.label(),
            error: snapshot.last_error.clone(),
            last_synced_at: snapshot.last_synced_at,
            pending_keys: snapshot.pending_keys.clone(),
            tracked_keys: scheduler.tracked_keys().to_vec(),
            sync_key,
        };
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    for line in format_status_lines(
        &snapshot,
        scheduler.tracked_keys(),
        sync_key.is_some(),
        chrono::Utc::now().timestamp_millis(),
    ) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_status_lines(
    snapshot: &StatusSnapshot,
    tracked_keys: &[String],
    has_identity: bool,
    now_ms: i64,
) -> Vec<String> {
    let mut lines = vec![format!("Status:       {}", snapshot.status.label())];
    if let Some(error) = &snapshot.last_error {
        lines.push(format!("Last error:   {error}"));
    }
    lines.push(if snapshot.last_synced_at > 0 {
        format!(
            "Last synced:  {} ({})",
            format_timestamp(snapshot.last_synced_at),
            format_relative_time(snapshot.last_synced_at, now_ms)
        )
    } else {
        "Last synced:  never".to_string()
    });
    lines.push(format!("Tracked keys: {}", tracked_keys.join(", ")));
    lines.push(if snapshot.pending_keys.is_empty() {
        "Pending:      none".to_string()
    } else {
        format!("Pending:      {}", snapshot.pending_keys.join(", "))
    });
    if !has_identity {
        lines.push("Identity:     not established yet".to_string());
    }
    lines
}

pub async fn run_watch(scheduler: Arc<Scheduler>, interval: Duration) -> Result<(), CliError> {
    if !scheduler.is_configured() {
        return Err(CliError::SyncNotConfigured);
    }

    let interval = interval.max(Duration::from_secs(1));
    let mut subscription = scheduler.subscribe();
    let background = scheduler.start(interval);
    let mut status_check = tokio::time::interval(interval);
    let mut reported_error: Option<String> = None;
    println!("Watching every {}s; press Ctrl-C to stop", interval.as_secs());

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                reported_error = None;
                if !event.updated_keys.is_empty() {
                    println!("Updated from remote: {}", event.updated_keys.join(", "));
                }
                if !event.pushed_keys.is_empty() {
                    println!("Pushed: {}", event.pushed_keys.join(", "));
                }
            }
            _ = status_check.tick() => {
                let error = scheduler.status().await?.last_error;
                if error.is_some() && error != reported_error {
                    println!("Sync error: {}", error.as_deref().unwrap_or_default());
                    reported_error = error;
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    background.stop();
    scheduler.unsubscribe(subscription.id());
    println!("Stopped");
    Ok(())
}

pub async fn run_reset(scheduler: &Scheduler, purge: bool) -> Result<(), CliError> {
    scheduler.reset(purge).await?;
    if purge {
        println!("Sync state and tracked documents removed");
    } else {
        println!("Sync state reset; the next sync starts from scratch");
    }
    Ok(())
}
