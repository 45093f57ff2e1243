//! Error types for stash-core

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using stash-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stash-core storage operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable error codes shared by the sync server and its clients.
///
/// The wire representation (`INVALID_PAYLOAD`, ...) is part of the protocol and
/// must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Schema violation; client-fixable, nothing was mutated.
    InvalidPayload,
    /// Durability layer failure; the request was rolled back as a whole.
    StorageFailure,
    /// Client-observed transport failure (including timeouts).
    NetworkFailure,
    /// Unknown route.
    NotFound,
    /// Too many requests for one owner within the rate-limit window.
    RateLimited,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::StorageFailure => "STORAGE_FAILURE",
            Self::NetworkFailure => "NETWORK_FAILURE",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_wire_names_are_stable() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::InvalidPayload).unwrap(),
            "\"INVALID_PAYLOAD\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::StorageFailure).unwrap(),
            "\"STORAGE_FAILURE\""
        );
        assert_eq!(ErrorCode::NotFound.to_string(), "NOT_FOUND");
    }
}
