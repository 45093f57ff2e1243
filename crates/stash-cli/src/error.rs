use std::io;

use stash_core::config::ConfigError;
use stash_core::sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] stash_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No value provided")]
    EmptyValue,
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Could not resolve a data directory; pass --cache or set STASH_CACHE")]
    NoDataDir,
    #[error("Sync is not configured. Set STASH_API_URL to the sync server base URL.")]
    SyncNotConfigured,
    #[error("Sync failed ({code}): {message}")]
    SyncFailed { code: String, message: String },
}
