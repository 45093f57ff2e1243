//! Durable cache backend on a local libSQL file

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::LocalCache;
use crate::db::{Database, Migration};
use crate::error::Result;
use crate::util::now_millis;

/// Schema for the client-side cache database
const CACHE_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "cache entries",
    statements: &["CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )"],
}];

/// Thread-safe cache over a single libSQL connection.
#[derive(Clone)]
pub struct LibSqlCache {
    db: Arc<Mutex<Database>>,
}

impl LibSqlCache {
    /// Open (or create) the cache database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path, CACHE_MIGRATIONS).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open a private in-memory cache database (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory(CACHE_MIGRATIONS).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

impl LocalCache for LibSqlCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT value FROM cache_entries WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get::<String>(0)?))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO cache_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                libsql::params![key, value, now_millis()],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM cache_entries WHERE key = ?", [key])
            .await?;
        Ok(())
    }
}
