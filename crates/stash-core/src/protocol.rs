//! Wire protocol shared by the sync server and its clients.
//!
//! All payloads are JSON with camelCase field names. The shapes here are the
//! compatibility contract between devices running different releases, so
//! fields may be added but never renamed or removed.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Route for pulling documents newer than a watermark.
pub const PULL_PATH: &str = "/sync/pull";
/// Route for pushing a batch of whole-document replacements.
pub const PUSH_PATH: &str = "/sync/push";
/// Liveness route.
pub const HEALTH_PATH: &str = "/health";

/// One `(owner, key)` document as it travels over the wire.
///
/// `value` is opaque to the sync layer. It may be absent for tombstones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDocument {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    pub updated_at: i64,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl SyncDocument {
    /// A live document carrying `value`.
    pub fn live(key: impl Into<String>, value: impl Into<String>, updated_at: i64) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            updated_at,
            deleted_at: None,
        }
    }

    /// A tombstone for `key`, deleted at `deleted_at`.
    pub fn tombstone(key: impl Into<String>, deleted_at: i64) -> Self {
        Self {
            key: key.into(),
            value: None,
            updated_at: deleted_at,
            deleted_at: Some(deleted_at),
        }
    }

    /// Whether this document is logically absent.
    pub const fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn validate(&self, index: usize) -> Result<(), String> {
        if self.key.trim().is_empty() {
            return Err(format!("items[{index}].key must be a non-empty string"));
        }
        if self.updated_at < 0 {
            return Err(format!(
                "items[{index}].updatedAt must be a non-negative integer"
            ));
        }
        if let Some(deleted_at) = self.deleted_at {
            if deleted_at < 0 {
                return Err(format!(
                    "items[{index}].deletedAt must be a non-negative integer"
                ));
            }
        }
        Ok(())
    }
}

/// `POST /sync/pull` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub user_id: String,
    #[serde(default)]
    pub since: i64,
}

impl PullRequest {
    pub fn new(user_id: impl Into<String>, since: i64) -> Self {
        Self {
            user_id: user_id.into(),
            since,
        }
    }

    /// Check the request shape before it reaches the store.
    pub fn validate(&self) -> Result<(), String> {
        validate_user_id(&self.user_id)?;
        if self.since < 0 {
            return Err("since must be a non-negative integer".to_string());
        }
        Ok(())
    }
}

/// `POST /sync/pull` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub items: Vec<SyncDocument>,
    /// Server time (ms) at which the pull was served.
    pub timestamp: i64,
}

/// `POST /sync/push` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub user_id: String,
    pub items: Vec<SyncDocument>,
}

impl PushRequest {
    pub fn new(user_id: impl Into<String>, items: Vec<SyncDocument>) -> Self {
        Self {
            user_id: user_id.into(),
            items,
        }
    }

    /// Check every item; a single bad item rejects the whole batch.
    pub fn validate(&self) -> Result<(), String> {
        validate_user_id(&self.user_id)?;
        for (index, item) in self.items.iter().enumerate() {
            item.validate(index)?;
        }
        Ok(())
    }
}

/// `POST /sync/push` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub success: bool,
    pub timestamp: i64,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorCode,
    #[serde(default)]
    pub message: Option<String>,
}

fn validate_user_id(user_id: &str) -> Result<(), String> {
    if user_id.trim().is_empty() {
        return Err("userId must be a non-empty string".to_string());
    }
    Ok(())
}
