//! Volatile in-process cache backend

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::LocalCache;
use crate::error::Result;

/// `HashMap`-backed cache; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, reserved keys included.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let cache = MemoryCache::new();
        assert!(cache.is_empty());

        cache.set("notes", "[1]").await.unwrap();
        cache.set("notes", "[2]").await.unwrap();
        assert_eq!(cache.get("notes").await.unwrap().as_deref(), Some("[2]"));
        assert_eq!(cache.len(), 1);

        cache.remove("notes").await.unwrap();
        cache.remove("notes").await.unwrap();
        assert_eq!(cache.get("notes").await.unwrap(), None);
    }
}
