//! stash CLI - read, write and sync documents from the terminal
//!
//! Documents live in a local cache first; `stash sync` and `stash watch`
//! reconcile them with the sync server named by `STASH_API_URL`.

mod cli;
mod commands;
mod error;


use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use stash_core::config::SyncSettings;

use crate::cli::{Cli, Commands};
use crate::commands::common::{open_scheduler, resolve_backend};
use crate::commands::document::{run_get, run_remove, run_set};
use crate::commands::history::{run_history, run_restore};
use crate::commands::sync::{run_reset, run_status, run_sync, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "stash=warn".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = SyncSettings::from_env()?;
    let backend = resolve_backend(cli.cache.as_deref(), &settings)?;
    let scheduler = open_scheduler(&settings, &backend).await?;

    match cli.command {
        Commands::Set { key, value } => run_set(&scheduler, &key, &value).await?,
        Commands::Get { key, pretty } => run_get(&scheduler, &key, pretty).await?,
        Commands::Rm { key } => run_remove(&scheduler, &key).await?,
        Commands::Sync => run_sync(&scheduler).await?,
        Commands::Status { json } => run_status(&scheduler, json).await?,
        Commands::History { key, json } => run_history(&scheduler, &key, json).await?,
        Commands::Restore { key, index } => run_restore(&scheduler, &key, index).await?,
        Commands::Watch { interval } => {
            let interval = interval.map_or(settings.sync_interval, Duration::from_secs);
            run_watch(Arc::new(scheduler), interval).await?;
        }
        Commands::Reset { purge } => run_reset(&scheduler, purge).await?,
    }

    Ok(())
}
