use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stash")]
#[command(about = "Offline-first document store with background sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Local cache: a database path, or `memory` (overrides STASH_CACHE)
    #[arg(long, global = true, value_name = "PATH")]
    pub cache: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store a document value (read from stdin when no value is given)
    Set {
        /// Document key
        key: String,
        /// Document value
        value: Vec<String>,
    },
    /// Print a document value
    Get {
        /// Document key
        key: String,
        /// Pretty-print JSON values
        #[arg(long)]
        pretty: bool,
    },
    /// Remove a document
    #[command(alias = "remove")]
    Rm {
        /// Document key
        key: String,
    },
    /// Run one sync cycle now
    Sync,
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List synced snapshots of a document, newest first
    History {
        /// Document key
        key: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a synced snapshot back as a local edit
    Restore {
        /// Document key
        key: String,
        /// Snapshot index as shown by `stash history` (0 = newest)
        index: usize,
    },
    /// Sync in the background and print changes until interrupted
    Watch {
        /// Seconds between cycles (defaults to STASH_SYNC_INTERVAL_SECS)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// Forget sync identity and watermark
    Reset {
        /// Also delete tracked documents and their history
        #[arg(long)]
        purge: bool,
    },
}
