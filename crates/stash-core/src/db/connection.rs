//! Database connection management

use crate::error::{Error, Result};
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::{Path, PathBuf};

use super::migrations::{self, Migration};

/// Path that selects a private in-memory database.
const IN_MEMORY: &str = ":memory:";

/// Database wrapper for a single libSQL connection
pub struct Database {
    // Keeps the underlying database alive for as long as the connection.
    _db: LibSqlDatabase,
    conn: Connection,
    path: Option<PathBuf>,
    journal_mode: String,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs the given migrations automatically.
    pub async fn open(path: impl AsRef<Path>, migrations: &[Migration]) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() == IN_MEMORY {
            return Self::open_in_memory(migrations).await;
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        Self::initialize(db, conn, Some(path.to_path_buf()), migrations).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory(migrations: &[Migration]) -> Result<Self> {
        let db = Builder::new_local(IN_MEMORY).build().await?;
        let conn = db.connect()?;

        Self::initialize(db, conn, None, migrations).await
    }

    async fn initialize(
        db: LibSqlDatabase,
        conn: Connection,
        path: Option<PathBuf>,
        migrations: &[Migration],
    ) -> Result<Self> {
        let journal_mode = configure(&conn).await?;
        if path.is_some() && !journal_mode.eq_ignore_ascii_case("wal") {
            return Err(Error::Database(format!(
                "write-ahead logging unavailable (journal_mode = {journal_mode})"
            )));
        }
        migrations::run(&conn, migrations).await?;

        Ok(Self {
            _db: db,
            conn,
            path,
            journal_mode,
        })
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Filesystem path, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Journal mode reported by the engine after configuration
    pub fn journal_mode(&self) -> &str {
        &self.journal_mode
    }

    /// Flush the write-ahead log into the main database file.
    pub async fn checkpoint(&self) -> Result<()> {
        if self.path.is_none() {
            return Ok(());
        }
        let mut rows = self
            .conn
            .query("PRAGMA wal_checkpoint(TRUNCATE)", ())
            .await?;
        while rows.next().await?.is_some() {}
        tracing::debug!("WAL checkpoint completed");
        Ok(())
    }
}

/// Configure `SQLite` for durable writes, returning the active journal mode.
async fn configure(conn: &Connection) -> Result<String> {
    // journal_mode answers with the mode actually in effect; in-memory
    // databases stay on "memory".
    let mut rows = conn.query("PRAGMA journal_mode = WAL", ()).await?;
    let journal_mode = match rows.next().await? {
        Some(row) => row.get::<String>(0)?,
        None => String::new(),
    };
    drop(rows);

    conn.execute("PRAGMA synchronous = FULL;", ()).await?;
    conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
    Ok(journal_mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MIGRATIONS: &[Migration] = &[Migration {
        version: 1,
        description: "kv table",
        statements: &["CREATE TABLE IF NOT EXISTS kv (k TEXT PRIMARY KEY, v TEXT NOT NULL)"],
    }];

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory(MIGRATIONS).await.unwrap();
        assert!(db.path().is_none());
        assert_eq!(db.journal_mode(), "memory");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_database_uses_wal() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("stash.db");

        let db = Database::open(&db_path, MIGRATIONS).await.unwrap();
        assert_eq!(db.journal_mode().to_ascii_lowercase(), "wal");
        assert_eq!(db.path(), Some(db_path.as_path()));

        db.connection()
            .execute("INSERT INTO kv (k, v) VALUES ('a', '1')", ())
            .await
            .unwrap();
        db.checkpoint().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn memory_path_opens_in_memory() {
        let db = Database::open(":memory:", MIGRATIONS).await.unwrap();
        assert!(db.path().is_none());
    }
}
