//! Per-job state machine.

use crate::core::{JobResult, JobStatus};
use crate::errors::TransitionError;
use crate::pipeline::JobSpec;
use crate::plan::PlannedJob;
use crate::utils::{elapsed_ms, now_utc};
use crate::workers::WorkerHandle;
use std::sync::Arc;
use std::time::Instant;

/// Returns true if a job may move from `from` to `to`.
///
/// ```text
/// Pending -> Running -> {Succeeded, Failed, Skipped}
/// Pending -> {Skipped, Canceled, Failed}
/// ```
///
/// Terminal states have no outgoing transitions.
#[must_use]
pub fn is_legal_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::{Canceled, Failed, Pending, Running, Skipped, Succeeded};
    matches!(
        (from, to),
        (Pending, Running | Skipped | Canceled | Failed) | (Running, Succeeded | Failed | Skipped)
    )
}

/// Scheduler-side state of one job in a run.
#[derive(Debug)]
pub(crate) struct JobRecord {
    pub spec: Arc<JobSpec>,
    pub cache_key: Option<String>,
    pub has_downstream_consumer: bool,
    pub worker: Option<WorkerHandle>,
    pub waiting_since: Option<Instant>,
    started: Option<Instant>,
    pub result: JobResult,
}

impl JobRecord {
    pub fn planned(job: &PlannedJob) -> Self {
        let mut record = Self::excluded(&job.spec);
        record.cache_key.clone_from(&job.cache_key);
        record.has_downstream_consumer = job.has_downstream_consumer;
        record
    }

    pub fn excluded(spec: &Arc<JobSpec>) -> Self {
        let mut result = JobResult::new(&spec.name, &spec.stage, JobStatus::Pending, spec.when);
        result.allow_failure = spec.allow_failure;
        Self {
            spec: Arc::clone(spec),
            cache_key: None,
            has_downstream_consumer: false,
            worker: None,
            waiting_since: None,
            started: None,
            result,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn status(&self) -> JobStatus {
        self.result.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        let from = self.status();
        if !is_legal_transition(from, to) {
            return Err(TransitionError {
                job: self.spec.name.clone(),
                from,
                to,
            });
        }

        self.result.status = to;
        if to == JobStatus::Running {
            self.started = Some(Instant::now());
            self.result.started_at = Some(now_utc());
        }
        if to.is_terminal() {
            self.result.finished_at = Some(now_utc());
            self.result.duration_ms = self.started.map_or(0, elapsed_ms);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::{Canceled, Failed, Pending, Running, Skipped, Succeeded};

    fn record() -> JobRecord {
        JobRecord::excluded(&Arc::new(JobSpec::new("compile", "build", ["make"])))
    }

    #[test]
    fn test_legal_transitions() {
        for to in [Running, Skipped, Canceled, Failed] {
            assert!(is_legal_transition(Pending, to), "pending -> {to}");
        }
        for to in [Succeeded, Failed, Skipped] {
            assert!(is_legal_transition(Running, to), "running -> {to}");
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!is_legal_transition(Pending, Succeeded));
        assert!(!is_legal_transition(Running, Canceled));
        assert!(!is_legal_transition(Running, Pending));
        for from in [Succeeded, Failed, Skipped, Canceled] {
            for to in [Pending, Running, Succeeded, Failed, Skipped, Canceled] {
                assert!(!is_legal_transition(from, to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_record_lifecycle() {
        let mut job = record();
        assert_eq!(job.status(), Pending);

        job.transition(Running).unwrap();
        assert!(job.result.started_at.is_some());
        assert!(!job.is_terminal());

        job.transition(Succeeded).unwrap();
        assert!(job.is_terminal());
        assert!(job.result.finished_at.is_some());
    }

    #[test]
    fn test_transition_out_of_terminal_is_rejected() {
        let mut job = record();
        job.transition(Canceled).unwrap();

        let err = job.transition(Running).unwrap_err();
        assert_eq!(err.from, Canceled);
        assert_eq!(err.to, Running);
        assert_eq!(
            err.to_string(),
            "Illegal transition for job 'compile': canceled -> running"
        );
        assert_eq!(job.status(), Canceled);
    }

    #[test]
    fn test_pending_terminal_has_no_duration() {
        let mut job = record();
        job.transition(Skipped).unwrap();
        assert_eq!(job.result.duration_ms, 0);
        assert!(job.result.started_at.is_none());
    }
}
