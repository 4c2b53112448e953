//! Worker selection.

use crate::errors::WorkerUnavailable;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

/// A worker reserved for one job.
///
/// The handle is owned by the job until it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerHandle {
    /// The worker id.
    pub id: String,
    /// Tags the worker carries.
    pub tags: BTreeSet<String>,
}

/// Hands out workers whose tags cover a job's required tags.
#[cfg_attr(test, mockall::automock)]
pub trait WorkerPool: Send + Sync {
    /// Reserves a free worker carrying every required tag.
    ///
    /// # Errors
    ///
    /// Returns `WorkerUnavailable` if no matching worker is free.
    fn acquire(&self, required_tags: &BTreeSet<String>) -> Result<WorkerHandle, WorkerUnavailable>;

    /// Returns a worker to the pool.
    fn release(&self, handle: WorkerHandle);
}

/// Declaration of one worker in a [`StaticWorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Unique worker id.
    pub id: String,
    /// Tags the worker carries.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl WorkerSpec {
    /// Creates a worker declaration.
    #[must_use]
    pub fn new(id: impl Into<String>, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: id.into(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    fn covers(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.tags)
    }
}

/// A fixed set of workers.
#[derive(Debug, Default)]
pub struct StaticWorkerPool {
    workers: Vec<WorkerSpec>,
    busy: Mutex<HashSet<String>>,
}

impl StaticWorkerPool {
    /// Creates a pool from worker declarations.
    #[must_use]
    pub fn new(workers: Vec<WorkerSpec>) -> Self {
        Self {
            workers,
            busy: Mutex::new(HashSet::new()),
        }
    }

    /// Creates `count` workers named `worker-1..` sharing the same tags.
    #[must_use]
    pub fn uniform(count: usize, tags: &[&str]) -> Self {
        Self::new(
            (1..=count)
                .map(|i| WorkerSpec::new(format!("worker-{i}"), tags.iter().copied()))
                .collect(),
        )
    }

    /// Returns the number of workers.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.workers.len()
    }

    /// Returns the number of free workers.
    #[must_use]
    pub fn available(&self) -> usize {
        self.workers.len() - self.busy.lock().len()
    }
}

impl WorkerPool for StaticWorkerPool {
    fn acquire(&self, required_tags: &BTreeSet<String>) -> Result<WorkerHandle, WorkerUnavailable> {
        let mut busy = self.busy.lock();
        let mut matched = false;

        for worker in self.workers.iter().filter(|w| w.covers(required_tags)) {
            matched = true;
            if busy.insert(worker.id.clone()) {
                debug!(worker = %worker.id, "Worker acquired");
                return Ok(WorkerHandle {
                    id: worker.id.clone(),
                    tags: worker.tags.clone(),
                });
            }
        }

        Err(WorkerUnavailable {
            required_tags: required_tags.clone(),
            no_match: !matched,
        })
    }

    fn release(&self, handle: WorkerHandle) {
        if self.busy.lock().remove(&handle.id) {
            debug!(worker = %handle.id, "Worker released");
        } else {
            warn!(worker = %handle.id, "Released a worker that was not reserved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(raw: &[&str]) -> BTreeSet<String> {
        raw.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn test_acquire_matching_worker() {
        let pool = StaticWorkerPool::new(vec![
            WorkerSpec::new("mac", ["macos"]),
            WorkerSpec::new("linux", ["linux", "docker"]),
        ]);

        let handle = pool.acquire(&tags(&["docker"])).unwrap();
        assert_eq!(handle.id, "linux");
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_untagged_job_takes_any_worker() {
        let pool = StaticWorkerPool::uniform(1, &["linux"]);
        assert!(pool.acquire(&BTreeSet::new()).is_ok());
    }

    #[test]
    fn test_busy_worker_is_unavailable() {
        let pool = StaticWorkerPool::uniform(1, &["linux"]);
        let handle = pool.acquire(&tags(&["linux"])).unwrap();

        let err = pool.acquire(&tags(&["linux"])).unwrap_err();
        assert!(!err.no_match);

        pool.release(handle);
        assert!(pool.acquire(&tags(&["linux"])).is_ok());
    }

    #[test]
    fn test_no_matching_worker() {
        let pool = StaticWorkerPool::uniform(2, &["linux"]);
        let err = pool.acquire(&tags(&["gpu"])).unwrap_err();

        assert!(err.no_match);
        assert_eq!(err.to_string(), "No worker available for tags [gpu]");
    }

    #[test]
    fn test_release_unknown_worker_is_harmless() {
        let pool = StaticWorkerPool::uniform(1, &[]);
        pool.release(WorkerHandle {
            id: "ghost".to_string(),
            tags: BTreeSet::new(),
        });
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_mock_pool() {
        let mut pool = MockWorkerPool::new();
        pool.expect_acquire().returning(|required| {
            Err(WorkerUnavailable {
                required_tags: required.clone(),
                no_match: true,
            })
        });
        pool.expect_release().never();

        assert!(pool.acquire(&tags(&["x"])).is_err());
    }
}
