//! Policy-aware access to a run's cache store.

use super::{CacheSnapshot, CacheStore};
use crate::core::CachePolicy;
use crate::errors::CacheError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies job cache policies on top of a [`CacheStore`].
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
}

impl CacheManager {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Fetches the key if the policy pulls.
    ///
    /// Returns `None` for push-only policies. Fetch errors are logged and
    /// degrade to an empty snapshot.
    pub async fn pull(&self, job: &str, key: &str, policy: CachePolicy) -> Option<CacheSnapshot> {
        if !policy.pulls() {
            return None;
        }
        match self.store.fetch(key).await {
            Ok(snapshot) => {
                debug!(job = %job, key = %key, hit = snapshot.is_hit(), "Cache fetched");
                Some(snapshot)
            }
            Err(e) => {
                warn!(job = %job, key = %key, error = %e, "Cache fetch failed, using empty cache");
                Some(CacheSnapshot::empty(key))
            }
        }
    }

    /// Stores the paths if the policy pushes.
    ///
    /// # Errors
    ///
    /// Returns the store's error; the caller decides whether it is fatal.
    pub async fn push(
        &self,
        job: &str,
        key: &str,
        paths: &[String],
        policy: CachePolicy,
    ) -> Result<Option<CacheSnapshot>, CacheError> {
        if !policy.pushes() {
            return Ok(None);
        }
        let snapshot = self.store.store(key, paths).await?;
        debug!(job = %job, key = %key, paths = paths.len(), "Cache stored");
        Ok(Some(snapshot))
    }

    /// Evicts every key, returning how many evictions succeeded.
    pub async fn sweep<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> usize {
        let mut evicted = 0;
        for key in keys {
            match self.store.evict(key).await {
                Ok(()) => evicted += 1,
                Err(e) => warn!(key = %key, error = %e, "Cache eviction failed"),
            }
        }
        evicted
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn fetch(&self, key: &str) -> Result<CacheSnapshot, CacheError> {
            Err(CacheError::io(key, "disk on fire"))
        }

        async fn store(&self, key: &str, _paths: &[String]) -> Result<CacheSnapshot, CacheError> {
            Err(CacheError::io(key, "disk on fire"))
        }

        async fn evict(&self, key: &str) -> Result<(), CacheError> {
            Err(CacheError::io(key, "disk on fire"))
        }
    }

    fn paths() -> Vec<String> {
        vec!["build/".to_string()]
    }

    #[tokio::test]
    async fn test_pull_respects_policy() {
        let manager = CacheManager::new(Arc::new(InMemoryCacheStore::new()));
        assert!(manager.pull("j", "k", CachePolicy::Push).await.is_none());

        let snapshot = manager.pull("j", "k", CachePolicy::Pull).await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_push_respects_policy() {
        let manager = CacheManager::new(Arc::new(InMemoryCacheStore::new()));
        assert!(manager
            .push("j", "k", &paths(), CachePolicy::Pull)
            .await
            .unwrap()
            .is_none());

        manager
            .push("j", "k", &paths(), CachePolicy::PullPush)
            .await
            .unwrap();
        let snapshot = manager.pull("j", "k", CachePolicy::PullPush).await.unwrap();
        assert_eq!(snapshot.paths, paths());
    }

    #[tokio::test]
    async fn test_fetch_error_degrades_to_empty() {
        let manager = CacheManager::new(Arc::new(BrokenStore));
        let snapshot = manager.pull("j", "k", CachePolicy::Pull).await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_store_error_is_returned() {
        let manager = CacheManager::new(Arc::new(BrokenStore));
        let err = manager
            .push("j", "k", &paths(), CachePolicy::Push)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
    }

    #[tokio::test]
    async fn test_sweep() {
        let store = Arc::new(InMemoryCacheStore::new());
        let manager = CacheManager::new(store.clone());
        manager.push("j", "a", &paths(), CachePolicy::Push).await.unwrap();

        assert_eq!(manager.sweep(["a", "never-stored"]).await, 2);
        assert!(store.is_empty());

        let broken = CacheManager::new(Arc::new(BrokenStore));
        assert_eq!(broken.sweep(["a"]).await, 0);
    }
}
