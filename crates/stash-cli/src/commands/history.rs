use serde::Serialize;
use stash_core::sync::Snapshot;

use crate::commands::common::{format_relative_time, preview, Scheduler};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct SnapshotItem {
    pub index: usize,
    pub captured_at: i64,
    pub value: String,
}

pub async fn run_history(scheduler: &Scheduler, key: &str, as_json: bool) -> Result<(), CliError> {
    let snapshots = scheduler.history(key).await?;

    if as_json {
        let items: Vec<SnapshotItem> = snapshots
            .iter()
            .enumerate()
            .map(|(index, snapshot)| SnapshotItem {
                index,
                captured_at: snapshot.captured_at,
                value: snapshot.value.clone(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if snapshots.is_empty() {
        println!("No synced snapshots of {key}.");
        return Ok(());
    }
    for line in format_history_lines(&snapshots, chrono::Utc::now().timestamp_millis()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_restore(scheduler: &Scheduler, key: &str, index: usize) -> Result<(), CliError> {
    let snapshot = scheduler.restore(key, index).await?;
    println!(
        "Restored {key} from snapshot {index} ({}); it will be pushed on the next sync",
        format_relative_time(snapshot.captured_at, chrono::Utc::now().timestamp_millis())
    );
    Ok(())
}

pub fn format_history_lines(snapshots: &[Snapshot], now_ms: i64) -> Vec<String> {
    snapshots
        .iter()
        .enumerate()
        .map(|(index, snapshot)| {
            let age = format_relative_time(snapshot.captured_at, now_ms);
            format!("{index:>3}  {age:<10}  {}", preview(&snapshot.value, 60))
        })
        .collect()
}
