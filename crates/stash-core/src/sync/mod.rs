//! Client-side sync core.
//!
//! A sync cycle pulls every document newer than the device watermark,
//! reconciles each tracked key against the local cache, pushes whatever the
//! server has not seen yet and only then advances the watermark.

mod history;
mod locks;
mod merge;
mod metadata;
mod notify;
mod scheduler;
mod transport;

use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorCode;

pub use history::{Snapshot, SnapshotHistory};
pub use locks::KeyLocks;
pub use merge::{merge_collection, reconcile_cached, MergeOutcome};
pub use metadata::{is_reserved_key, IdentityChange, SyncMetadataStore, RESERVED_PREFIX};
pub use notify::{ChangeEvent, ChangeNotifier, Subscription, SubscriptionId};
pub use scheduler::{
    BackgroundSync, CycleOutcome, CycleReport, SchedulerOptions, StatusSnapshot, SyncScheduler,
    SyncStatus,
};
pub use transport::{HttpTransport, SyncTransport};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid sync configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Network request failed: {0}")]
    Network(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Server rejected request ({code}): {message}")]
    Rejected { code: ErrorCode, message: String },
    #[error("Server error: {0}")]
    Server(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Local cache error: {0}")]
    Cache(#[from] crate::Error),
}

impl SyncError {
    /// Protocol-level classification of this failure.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Network(_) | Self::Timeout(_) => ErrorCode::NetworkFailure,
            Self::Rejected { code, .. } => *code,
            Self::Server(_) | Self::Cache(_) => ErrorCode::StorageFailure,
            Self::InvalidConfiguration(_) | Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidPayload(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
