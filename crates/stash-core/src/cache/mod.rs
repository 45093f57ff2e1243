//! Local cache: the client's key-value view of the device's persistent storage.
//!
//! The merge engine and scheduler only ever see the [`LocalCache`] trait.
//! Exactly one backend is chosen at startup through [`CacheBackend`] and
//! [`open_cache`]; nothing downstream branches on which one it got.

mod durable;
mod memory;

use std::future::Future;
use std::path::PathBuf;

use crate::error::Result;

pub use durable::LibSqlCache;
pub use memory::MemoryCache;

/// Minimal key-value interface over device storage.
pub trait LocalCache: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Which concrete cache backend to open for this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// Volatile process memory.
    Memory,
    /// Durable libSQL file at the given path.
    LibSql { path: PathBuf },
}

impl CacheBackend {
    /// Parse a backend selector: `memory` or a filesystem path.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.eq_ignore_ascii_case("memory") {
            Some(Self::Memory)
        } else {
            Some(Self::LibSql {
                path: PathBuf::from(raw),
            })
        }
    }
}

/// The backend opened for this session.
pub enum AnyCache {
    Memory(MemoryCache),
    LibSql(LibSqlCache),
}

/// Open the selected backend once, at startup.
pub async fn open_cache(backend: &CacheBackend) -> Result<AnyCache> {
    match backend {
        CacheBackend::Memory => {
            tracing::info!("Using in-memory local cache");
            Ok(AnyCache::Memory(MemoryCache::new()))
        }
        CacheBackend::LibSql { path } => {
            tracing::info!("Using durable local cache at {}", path.display());
            Ok(AnyCache::LibSql(LibSqlCache::open(path).await?))
        }
    }
}

impl LocalCache for AnyCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            Self::Memory(cache) => cache.get(key).await,
            Self::LibSql(cache) => cache.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        match self {
            Self::Memory(cache) => cache.set(key, value).await,
            Self::LibSql(cache) => cache.set(key, value).await,
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match self {
            Self::Memory(cache) => cache.remove(key).await,
            Self::LibSql(cache) => cache.remove(key).await,
        }
    }
}
