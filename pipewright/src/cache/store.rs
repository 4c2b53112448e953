//! Cache storage backends.

use super::CacheSnapshot;
use crate::errors::CacheError;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// Keyed storage for cache entries.
///
/// Each run owns its own store instance.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads an entry. A key that was never stored yields an empty snapshot.
    async fn fetch(&self, key: &str) -> Result<CacheSnapshot, CacheError>;

    /// Writes an entry, replacing any previous one.
    async fn store(&self, key: &str, paths: &[String]) -> Result<CacheSnapshot, CacheError>;

    /// Removes an entry. Evicting a missing key succeeds.
    async fn evict(&self, key: &str) -> Result<(), CacheError>;
}

/// In-memory cache store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, CacheSnapshot>,
}

impl InMemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the key has an entry.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the stored keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn fetch(&self, key: &str) -> Result<CacheSnapshot, CacheError> {
        Ok(self
            .entries
            .get(key)
            .map_or_else(|| CacheSnapshot::empty(key), |e| e.value().clone()))
    }

    async fn store(&self, key: &str, paths: &[String]) -> Result<CacheSnapshot, CacheError> {
        let snapshot = CacheSnapshot::new(key, paths);
        if self.entries.insert(key.to_string(), snapshot.clone()).is_some() {
            debug!(key = %key, "Cache entry overwritten");
        }
        Ok(snapshot)
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_unstored_key_is_empty() {
        let store = InMemoryCacheStore::new();
        let snapshot = store.fetch("sha1").await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.key, "sha1");
    }

    #[tokio::test]
    async fn test_store_then_fetch() {
        let store = InMemoryCacheStore::new();
        let paths = vec!["build/".to_string()];
        store.store("sha1", &paths).await.unwrap();

        let snapshot = store.fetch("sha1").await.unwrap();
        assert!(snapshot.is_hit());
        assert_eq!(snapshot.paths, paths);
        assert!(store.contains("sha1"));
    }

    #[tokio::test]
    async fn test_store_last_write_wins() {
        let store = InMemoryCacheStore::new();
        store.store("k", &["first/".to_string()]).await.unwrap();
        store.store("k", &["second/".to_string()]).await.unwrap();

        let snapshot = store.fetch("k").await.unwrap();
        assert_eq!(snapshot.paths, vec!["second/"]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_evict_is_idempotent() {
        let store = InMemoryCacheStore::new();
        store.evict("missing").await.unwrap();

        store.store("k", &["p".to_string()]).await.unwrap();
        store.evict("k").await.unwrap();
        store.evict("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_keys_sorted() {
        let store = InMemoryCacheStore::new();
        tokio_test::block_on(async {
            store.store("b", &["p".to_string()]).await.unwrap();
            store.store("a", &["p".to_string()]).await.unwrap();
        });
        assert_eq!(store.keys(), vec!["a", "b"]);
    }
}
