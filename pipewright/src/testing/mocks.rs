//! Scripted collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::cache::{CacheSnapshot, CacheStore, InMemoryCacheStore};
use crate::errors::{CacheError, ExecutorError};
use crate::executor::{ExecutionReport, ExecutionRequest, JobExecutor};

/// One call recorded by [`ScriptedExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    /// The job name.
    pub job: String,
    /// The worker the job ran on.
    pub worker: String,
    /// The cache snapshot handed to the job.
    pub cache: Option<CacheSnapshot>,
    /// Variables handed to the job.
    pub variables: BTreeMap<String, String>,
    /// When the call started.
    pub started: Instant,
    /// When the call returned.
    pub finished: Instant,
}

/// An executor whose results are scripted per job.
///
/// Jobs succeed by default. Calls are recorded along with the highest number
/// of jobs observed running at once.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    exit_codes: HashMap<String, i32>,
    errors: HashMap<String, String>,
    timeouts: HashSet<String>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    calls: Mutex<Vec<ExecutionRecord>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedExecutor {
    /// Creates an executor where every job succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a job exit with the given code.
    #[must_use]
    pub fn with_exit_code(mut self, job: impl Into<String>, exit_code: i32) -> Self {
        self.exit_codes.insert(job.into(), exit_code);
        self
    }

    /// Makes a job fail with an executor error.
    #[must_use]
    pub fn with_error(mut self, job: impl Into<String>, message: impl Into<String>) -> Self {
        self.errors.insert(job.into(), message.into());
        self
    }

    /// Makes a job time out after printing its usual output.
    #[must_use]
    pub fn with_timeout(mut self, job: impl Into<String>) -> Self {
        self.timeouts.insert(job.into());
        self
    }

    /// Delays one job.
    #[must_use]
    pub fn with_delay(mut self, job: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(job.into(), delay);
        self
    }

    /// Delays every job without its own delay.
    #[must_use]
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Returns every recorded call in completion order.
    #[must_use]
    pub fn calls(&self) -> Vec<ExecutionRecord> {
        self.calls.lock().clone()
    }

    /// Returns the names of executed jobs in start order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        let mut calls = self.calls();
        calls.sort_by_key(|c| c.started);
        calls.into_iter().map(|c| c.job).collect()
    }

    /// Returns the call for a job.
    #[must_use]
    pub fn call(&self, job: &str) -> Option<ExecutionRecord> {
        self.calls.lock().iter().find(|c| c.job == job).cloned()
    }

    /// Returns true if the job was executed.
    #[must_use]
    pub fn was_executed(&self, job: &str) -> bool {
        self.calls.lock().iter().any(|c| c.job == job)
    }

    /// Returns the highest number of concurrently running jobs.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport, ExecutorError> {
        let job = request.job.name.clone();
        let started = Instant::now();
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let delay = self.delays.get(&job).copied().unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().push(ExecutionRecord {
            job: job.clone(),
            worker: request.worker.id.clone(),
            cache: request.cache.clone(),
            variables: request.variables.clone(),
            started,
            finished: Instant::now(),
        });

        if self.timeouts.contains(&job) {
            return Err(ExecutorError::Timeout {
                timeout_ms: request
                    .timeout
                    .map_or(0, |limit| u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)),
                logs: format!("ran {job}\njob timed out\n"),
            });
        }
        if let Some(message) = self.errors.get(&job) {
            return Err(ExecutorError::Other(message.clone()));
        }
        let exit_code = self.exit_codes.get(&job).copied().unwrap_or(0);
        Ok(ExecutionReport::new(exit_code, format!("ran {job}\n")))
    }
}

/// A cache store that can be told to fail.
#[derive(Debug, Default)]
pub struct FailingCacheStore {
    inner: InMemoryCacheStore,
    fail_fetch: bool,
    fail_store: bool,
}

impl FailingCacheStore {
    /// Creates a store that works normally.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every fetch fail.
    #[must_use]
    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    /// Makes every store fail.
    #[must_use]
    pub fn failing_store(mut self) -> Self {
        self.fail_store = true;
        self
    }
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn fetch(&self, key: &str) -> Result<CacheSnapshot, CacheError> {
        if self.fail_fetch {
            return Err(CacheError::Unavailable("fetch disabled".to_string()));
        }
        self.inner.fetch(key).await
    }

    async fn store(&self, key: &str, paths: &[String]) -> Result<CacheSnapshot, CacheError> {
        if self.fail_store {
            return Err(CacheError::io(key, "store disabled"));
        }
        self.inner.store(key, paths).await
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        self.inner.evict(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Trigger;
    use crate::pipeline::JobSpec;
    use crate::workers::WorkerHandle;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn request(job: &str) -> ExecutionRequest {
        ExecutionRequest {
            job: Arc::new(JobSpec::new(job, "build", ["true"])),
            worker: WorkerHandle {
                id: "w1".to_string(),
                tags: BTreeSet::new(),
            },
            trigger: Trigger::branch("main", "abc"),
            variables: BTreeMap::new(),
            cache: None,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_results() {
        let executor = ScriptedExecutor::new()
            .with_exit_code("lint", 2)
            .with_error("deploy", "no credentials");

        assert!(executor.execute(&request("build")).await.unwrap().succeeded());
        assert_eq!(executor.execute(&request("lint")).await.unwrap().exit_code, 2);
        assert!(executor.execute(&request("deploy")).await.is_err());

        assert_eq!(executor.calls().len(), 3);
        assert!(executor.was_executed("lint"));
        assert_eq!(executor.call("build").unwrap().worker, "w1");
    }

    #[tokio::test]
    async fn test_tracks_concurrency() {
        let executor = Arc::new(ScriptedExecutor::new().with_default_delay(Duration::from_millis(30)));
        let a = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(&request("a")).await })
        };
        let b = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(&request("b")).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(executor.max_concurrency(), 2);
        assert_eq!(executor.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_cache_store() {
        let store = FailingCacheStore::new().failing_store();
        assert!(store.store("k", &["p".to_string()]).await.is_err());
        assert!(store.fetch("k").await.unwrap().is_empty());
        assert!(store.evict("k").await.is_ok());

        let store = FailingCacheStore::new().failing_fetch();
        assert!(store.fetch("k").await.is_err());
    }
}
