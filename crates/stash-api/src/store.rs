//! Persistent document store backing the sync endpoint.

use std::path::Path;

use libsql::Value;
use stash_core::db::{Database, Migration};
use stash_core::{Error, Result, SyncDocument};
use tokio::sync::Mutex;

const STORE_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "documents table",
    statements: &[
        "CREATE TABLE IF NOT EXISTS documents (
            owner TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            PRIMARY KEY (owner, key)
        )",
        "CREATE INDEX IF NOT EXISTS idx_documents_owner_updated
            ON documents (owner, updated_at)",
    ],
}];

const UPSERT_DOCUMENT: &str = "INSERT INTO documents (owner, key, value, updated_at, deleted_at)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT (owner, key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at,
        deleted_at = excluded.deleted_at";

const SELECT_SINCE: &str = "SELECT key, value, updated_at, deleted_at FROM documents
     WHERE owner = ?1 AND updated_at > ?2
     ORDER BY updated_at ASC, key ASC";

/// Owner-scoped document storage over a single libSQL connection.
///
/// Writes are serialized through the connection lock; each push batch is one
/// transaction.
pub struct DocumentStore {
    db: Mutex<Option<Database>>,
}

impl DocumentStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path, STORE_MIGRATIONS).await?;
        if db.path().is_none() {
            tracing::warn!(
                journal_mode = db.journal_mode(),
                "Document store is in memory; data will not survive a restart"
            );
        }
        Ok(Self {
            db: Mutex::new(Some(db)),
        })
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::open(":memory:").await
    }

    /// Insert or overwrite every document for `owner`, atomically.
    pub async fn upsert_documents(&self, owner: &str, documents: &[SyncDocument]) -> Result<()> {
        let guard = self.db.lock().await;
        let db = guard.as_ref().ok_or_else(closed)?;
        let conn = db.connection();

        conn.execute("BEGIN IMMEDIATE", ()).await?;

        for document in documents {
            let params = libsql::params![
                owner,
                document.key.as_str(),
                document.value.clone(),
                document.updated_at,
                document.deleted_at
            ];
            if let Err(e) = conn.execute(UPSERT_DOCUMENT, params).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(())
    }

    /// Documents of `owner` changed strictly after `since`, oldest first.
    pub async fn get_documents(&self, owner: &str, since: i64) -> Result<Vec<SyncDocument>> {
        let guard = self.db.lock().await;
        let db = guard.as_ref().ok_or_else(closed)?;

        let mut rows = db
            .connection()
            .query(SELECT_SINCE, libsql::params![owner, since])
            .await?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            documents.push(SyncDocument {
                key: row.get::<String>(0)?,
                value: optional_text(row.get_value(1)?)?,
                updated_at: row.get::<i64>(2)?,
                deleted_at: optional_integer(row.get_value(3)?)?,
            });
        }
        Ok(documents)
    }

    /// Checkpoint the WAL and release the connection.
    ///
    /// Later calls fail with a storage error; closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let Some(db) = self.db.lock().await.take() else {
            return Ok(());
        };
        db.checkpoint().await?;
        tracing::info!("Document store closed");
        Ok(())
    }
}

fn closed() -> Error {
    Error::Database("document store is closed".to_string())
}

fn optional_text(value: Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(Error::Database(format!("unexpected value column: {other:?}"))),
    }
}

fn optional_integer(value: Value) -> Result<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(number) => Ok(Some(number)),
        other => Err(Error::Database(format!(
            "unexpected deleted_at column: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_is_idempotent() {
        let store = DocumentStore::open_in_memory().await.unwrap();
        let document = SyncDocument::live("notes", "[]", 100);

        store.upsert_documents("u1", &[document.clone()]).await.unwrap();
        store.upsert_documents("u1", &[document.clone()]).await.unwrap();

        assert_eq!(store.get_documents("u1", 0).await.unwrap(), vec![document]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_boundary_is_strict_and_ordered() {
        let store = DocumentStore::open_in_memory().await.unwrap();
        store
            .upsert_documents(
                "u1",
                &[
                    SyncDocument::live("b", "2", 200),
                    SyncDocument::live("a", "1", 100),
                    SyncDocument::live("c", "3", 200),
                ],
            )
            .await
            .unwrap();

        let keys: Vec<String> = store
            .get_documents("u1", 100)
            .await
            .unwrap()
            .into_iter()
            .map(|document| document.key)
            .collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert!(store.get_documents("u1", 200).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn owners_are_isolated() {
        let store = DocumentStore::open_in_memory().await.unwrap();
        store
            .upsert_documents("u1", &[SyncDocument::live("notes", "[1]", 10)])
            .await
            .unwrap();
        store
            .upsert_documents("u2", &[SyncDocument::live("notes", "[2]", 10)])
            .await
            .unwrap();

        let u1 = store.get_documents("u1", 0).await.unwrap();
        assert_eq!(u1.len(), 1);
        assert_eq!(u1[0].value.as_deref(), Some("[1]"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tombstones_are_returned() {
        let store = DocumentStore::open_in_memory().await.unwrap();
        store
            .upsert_documents("u1", &[SyncDocument::live("notes", "[]", 10)])
            .await
            .unwrap();
        store
            .upsert_documents("u1", &[SyncDocument::tombstone("notes", 20)])
            .await
            .unwrap();

        let documents = store.get_documents("u1", 10).await.unwrap();
        assert_eq!(documents, vec![SyncDocument::tombstone("notes", 20)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_store_survives_reopen_and_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.db");

        let store = DocumentStore::open(&path).await.unwrap();
        store
            .upsert_documents("u1", &[SyncDocument::live("settings", "{}", 5)])
            .await
            .unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(store.get_documents("u1", 0).await.is_err());

        let reopened = DocumentStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_documents("u1", 0).await.unwrap().len(), 1);
    }
}
