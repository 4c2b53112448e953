//! Per-job and per-run results.

use super::{JobStatus, RunOutcome, Trigger, WhenPolicy};
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why a job ended in [`JobStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// A script step exited with a nonzero status.
    ScriptFailed {
        /// The exit code reported by the executor.
        exit_code: i32,
    },
    /// The executor could not run the job.
    Executor {
        /// The executor error message.
        message: String,
    },
    /// No matching worker became available before the timeout.
    WorkerTimeout {
        /// How long the job waited, in milliseconds.
        waited_ms: u64,
    },
    /// The job's cache output could not be stored and a later job needs it.
    CacheStoreFailed {
        /// The cache error message.
        message: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScriptFailed { exit_code } => write!(f, "script exited with code {exit_code}"),
            Self::Executor { message } => write!(f, "executor error: {message}"),
            Self::WorkerTimeout { waited_ms } => {
                write!(f, "no matching worker available after {waited_ms}ms")
            }
            Self::CacheStoreFailed { message } => write!(f, "cache store failed: {message}"),
        }
    }
}

/// Cache interaction performed by a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheActivity {
    /// The expanded cache key.
    pub key: String,
    /// Whether a fetch was attempted.
    pub fetched: bool,
    /// Whether the fetch returned a non-empty snapshot.
    pub hit: bool,
    /// Whether the job's paths were stored.
    pub stored: bool,
}

/// The terminal record of one job in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Job name.
    pub name: String,
    /// Stage the job belongs to.
    pub stage: String,
    /// Final status.
    pub status: JobStatus,
    /// The job's `when` policy.
    pub when: WhenPolicy,
    /// Whether a failure of this job is tolerated.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_failure: bool,
    /// Exit code reported by the executor, if the job ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured output.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub logs: String,
    /// The worker the job ran on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// Failure reason for failed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Skip or cancel reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Cache interaction, if the job declares a cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheActivity>,
    /// When the job started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the job reached its terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Running time in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}

impl JobResult {
    /// Creates a result in the given status with no execution details.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        stage: impl Into<String>,
        status: JobStatus,
        when: WhenPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            status,
            when,
            allow_failure: false,
            exit_code: None,
            logs: String::new(),
            worker: None,
            failure: None,
            reason: None,
            cache: None,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
        }
    }

    /// Returns true if this job failed and the failure is not tolerated.
    #[must_use]
    pub fn is_blocking_failure(&self) -> bool {
        self.status == JobStatus::Failed && !self.allow_failure
    }
}

/// The aggregate result of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Run identifier.
    pub run_id: Uuid,
    /// Name of the pipeline definition.
    pub pipeline: String,
    /// The trigger the run was planned for.
    pub trigger: Trigger,
    /// Aggregate outcome.
    pub outcome: RunOutcome,
    /// Per-job results in plan order.
    pub jobs: Vec<JobResult>,
    /// Non-fatal findings from planning and execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished.
    pub finished_at: Timestamp,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl RunResult {
    /// Returns the result for a job by name.
    #[must_use]
    pub fn job(&self, name: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Returns the status of a job by name.
    #[must_use]
    pub fn status_of(&self, name: &str) -> Option<JobStatus> {
        self.job(name).map(|j| j.status)
    }

    /// Number of jobs that ended in `status`.
    #[must_use]
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Returns true if the run succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_utc;

    fn job(name: &str, status: JobStatus) -> JobResult {
        JobResult::new(name, "build", status, WhenPolicy::OnSuccess)
    }

    #[test]
    fn test_blocking_failure() {
        let mut failed = job("lint", JobStatus::Failed);
        assert!(failed.is_blocking_failure());

        failed.allow_failure = true;
        assert!(!failed.is_blocking_failure());
        assert!(!job("ok", JobStatus::Succeeded).is_blocking_failure());
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(
            FailureReason::ScriptFailed { exit_code: 2 }.to_string(),
            "script exited with code 2"
        );
        assert_eq!(
            FailureReason::WorkerTimeout { waited_ms: 10 }.to_string(),
            "no matching worker available after 10ms"
        );
    }

    #[test]
    fn test_run_result_lookup() {
        let now = now_utc();
        let result = RunResult {
            run_id: Uuid::new_v4(),
            pipeline: "ci".to_string(),
            trigger: Trigger::branch("main", "abc"),
            outcome: RunOutcome::Failed,
            jobs: vec![
                job("compile", JobStatus::Failed),
                job("unit_test", JobStatus::Canceled),
                job("sweep", JobStatus::Succeeded),
            ],
            warnings: Vec::new(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        };

        assert_eq!(result.status_of("unit_test"), Some(JobStatus::Canceled));
        assert_eq!(result.count(JobStatus::Failed), 1);
        assert!(result.job("missing").is_none());
        assert!(!result.succeeded());
    }

    #[test]
    fn test_failure_reason_serialization() {
        let reason = FailureReason::ScriptFailed { exit_code: 1 };
        let json = serde_json::to_string(&reason).unwrap();
        assert_eq!(json, r#"{"kind":"script_failed","exit_code":1}"#);
    }
}
