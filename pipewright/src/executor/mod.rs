//! Job execution.
//!
//! The scheduler hands each dispatched job to a [`JobExecutor`] together with
//! its worker, variables and cache snapshot. Scripts are opaque to the
//! engine; only the exit code and logs come back.

mod shell;

pub use shell::ShellExecutor;

use crate::cache::CacheSnapshot;
use crate::core::Trigger;
use crate::errors::ExecutorError;
use crate::pipeline::JobSpec;
use crate::workers::WorkerHandle;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything an executor needs to run one job.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// The job definition.
    pub job: Arc<JobSpec>,
    /// The worker reserved for the job.
    pub worker: WorkerHandle,
    /// The triggering ref.
    pub trigger: Trigger,
    /// Pipeline, job and predefined variables.
    pub variables: BTreeMap<String, String>,
    /// The fetched cache, if the job pulls one.
    pub cache: Option<CacheSnapshot>,
    /// Maximum run time of the job's scripts.
    pub timeout: Option<Duration>,
}

/// Outcome of running a job's scripts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionReport {
    /// Exit code of the last script step that ran.
    pub exit_code: i32,
    /// Combined output.
    pub logs: String,
}

impl ExecutionReport {
    /// Creates a report with the given exit code.
    #[must_use]
    pub fn new(exit_code: i32, logs: impl Into<String>) -> Self {
        Self {
            exit_code,
            logs: logs.into(),
        }
    }

    /// Returns true if the scripts exited with zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a job's scripts on a worker.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Executes the job and reports its exit code and logs.
    ///
    /// A nonzero exit code is a job failure, not an executor error. Errors
    /// are reserved for jobs that could not run to completion.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport, ExecutorError>;
}
