//! Failure propagation and run outcome.

use crate::core::{JobResult, JobStatus, RunOutcome};
use serde::{Deserialize, Serialize};

/// A failure that counts against the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The failed job.
    pub job: String,
    /// The job's stage.
    pub stage: String,
    /// Why it failed.
    pub reason: String,
}

/// What the scheduler must do after a job finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureAction {
    /// Nothing to cancel.
    Continue,
    /// Cancel pending non-exempt jobs after `stage_index`, and those that
    /// need `job`.
    CancelDownstream {
        /// The failed job.
        job: String,
        /// Stage of the failed job.
        stage_index: usize,
    },
}

/// Observes terminal job states and decides the run outcome.
///
/// A blocking failure of an `on_success` job fails the run and cancels
/// downstream work. A failing `always` or `on_failure` job fails the run but
/// cancels nothing. Failures with `allow_failure` are tolerated.
#[derive(Debug, Default)]
pub struct FailureController {
    failures: Vec<FailureRecord>,
    tolerated: Vec<String>,
    canceled: Option<String>,
}

impl FailureController {
    /// Creates a controller with no failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a job's terminal result.
    pub fn observe(&mut self, result: &JobResult, stage_index: usize) -> FailureAction {
        if result.status != JobStatus::Failed {
            return FailureAction::Continue;
        }
        if result.allow_failure {
            self.tolerated.push(result.name.clone());
            return FailureAction::Continue;
        }

        self.failures.push(FailureRecord {
            job: result.name.clone(),
            stage: result.stage.clone(),
            reason: result
                .failure
                .as_ref()
                .map_or_else(|| "failed".to_string(), ToString::to_string),
        });

        if result.when.is_exempt() {
            FailureAction::Continue
        } else {
            FailureAction::CancelDownstream {
                job: result.name.clone(),
                stage_index,
            }
        }
    }

    /// Records external cancellation. Only the first reason is kept.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        if self.canceled.is_none() {
            self.canceled = Some(reason.into());
        }
    }

    /// Returns true if a blocking failure has occurred.
    #[must_use]
    pub fn run_failed(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Returns true if the run was canceled externally.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.is_some()
    }

    /// Returns the cancellation reason.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<&str> {
        self.canceled.as_deref()
    }

    /// Returns the blocking failures in the order they occurred.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Returns jobs whose failures were tolerated.
    #[must_use]
    pub fn tolerated(&self) -> &[String] {
        &self.tolerated
    }

    /// Returns the run outcome: canceled, then failed, then succeeded.
    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        if self.is_canceled() {
            RunOutcome::Canceled
        } else if self.run_failed() {
            RunOutcome::Failed
        } else {
            RunOutcome::Succeeded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FailureReason, WhenPolicy};

    fn failed(name: &str, when: WhenPolicy) -> JobResult {
        let mut result = JobResult::new(name, "build", JobStatus::Failed, when);
        result.failure = Some(FailureReason::ScriptFailed { exit_code: 2 });
        result
    }

    #[test]
    fn test_success_does_nothing() {
        let mut controller = FailureController::new();
        let ok = JobResult::new("a", "build", JobStatus::Succeeded, WhenPolicy::OnSuccess);

        assert_eq!(controller.observe(&ok, 0), FailureAction::Continue);
        assert_eq!(controller.outcome(), RunOutcome::Succeeded);
    }

    #[test]
    fn test_blocking_failure_cancels_downstream() {
        let mut controller = FailureController::new();
        let action = controller.observe(&failed("compile", WhenPolicy::OnSuccess), 0);

        assert_eq!(
            action,
            FailureAction::CancelDownstream {
                job: "compile".to_string(),
                stage_index: 0
            }
        );
        assert!(controller.run_failed());
        assert_eq!(controller.failures()[0].reason, "script exited with code 2");
        assert_eq!(controller.outcome(), RunOutcome::Failed);
    }

    #[test]
    fn test_allowed_failure_is_tolerated() {
        let mut controller = FailureController::new();
        let mut result = failed("lint", WhenPolicy::OnSuccess);
        result.allow_failure = true;

        assert_eq!(controller.observe(&result, 0), FailureAction::Continue);
        assert_eq!(controller.tolerated(), ["lint".to_string()]);
        assert_eq!(controller.outcome(), RunOutcome::Succeeded);
    }

    #[test]
    fn test_exempt_failure_fails_without_cancel() {
        let mut controller = FailureController::new();
        let action = controller.observe(&failed("sweep", WhenPolicy::Always), 2);

        assert_eq!(action, FailureAction::Continue);
        assert_eq!(controller.outcome(), RunOutcome::Failed);
    }

    #[test]
    fn test_cancel_takes_precedence() {
        let mut controller = FailureController::new();
        controller.observe(&failed("compile", WhenPolicy::OnSuccess), 0);
        controller.cancel("user abort");
        controller.cancel("second");

        assert_eq!(controller.cancel_reason(), Some("user abort"));
        assert_eq!(controller.outcome(), RunOutcome::Canceled);
    }
}
