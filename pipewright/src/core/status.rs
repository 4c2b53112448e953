//! Job status, run outcome and job policy enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a job within one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for its stage barrier or a worker.
    #[default]
    Pending,
    /// Job is running on a worker.
    Running,
    /// Every script step exited with status zero.
    Succeeded,
    /// A script step failed, or the job could not be run.
    Failed,
    /// Job was excluded and did no work.
    Skipped,
    /// Job was canceled before it started.
    Canceled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl JobStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Canceled
        )
    }

    /// Returns true if the job is waiting or running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// Aggregate outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every job succeeded, was skipped, or failed with `allow_failure`.
    Succeeded,
    /// At least one job failed without `allow_failure`.
    Failed,
    /// The run was canceled from outside.
    Canceled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl RunOutcome {
    /// Returns true for [`RunOutcome::Succeeded`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// When a job should run relative to the outcome of earlier stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenPolicy {
    /// Run only while the pipeline has not failed.
    #[default]
    OnSuccess,
    /// Run only if the pipeline has failed.
    OnFailure,
    /// Run regardless of the pipeline outcome.
    Always,
}

impl WhenPolicy {
    /// Returns true if the policy exempts a job from failure cancellation.
    #[must_use]
    pub fn is_exempt(&self) -> bool {
        matches!(self, Self::OnFailure | Self::Always)
    }
}

impl fmt::Display for WhenPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnSuccess => write!(f, "on_success"),
            Self::OnFailure => write!(f, "on_failure"),
            Self::Always => write!(f, "always"),
        }
    }
}

/// How a job interacts with its cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Fetch before the script and store after success.
    #[default]
    PullPush,
    /// Fetch only.
    Pull,
    /// Store only.
    Push,
}

impl CachePolicy {
    /// Returns true if the job fetches the cache before running.
    #[must_use]
    pub fn pulls(&self) -> bool {
        matches!(self, Self::PullPush | Self::Pull)
    }

    /// Returns true if the job writes the cache after success.
    #[must_use]
    pub fn pushes(&self) -> bool {
        matches!(self, Self::PullPush | Self::Push)
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PullPush => write!(f, "pull-push"),
            Self::Pull => write!(f, "pull"),
            Self::Push => write!(f, "push"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(JobStatus::Canceled.to_string(), "canceled");
    }

    #[test]
    fn test_job_status_is_terminal() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Skipped.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_when_policy_exemption() {
        assert!(!WhenPolicy::OnSuccess.is_exempt());
        assert!(WhenPolicy::OnFailure.is_exempt());
        assert!(WhenPolicy::Always.is_exempt());
    }

    #[test]
    fn test_cache_policy_directions() {
        assert!(CachePolicy::PullPush.pulls() && CachePolicy::PullPush.pushes());
        assert!(CachePolicy::Pull.pulls() && !CachePolicy::Pull.pushes());
        assert!(!CachePolicy::Push.pulls() && CachePolicy::Push.pushes());
    }

    #[test]
    fn test_policy_serialization() {
        let json = serde_json::to_string(&CachePolicy::PullPush).unwrap();
        assert_eq!(json, r#""pull-push""#);
        let when: WhenPolicy = serde_json::from_str(r#""always""#).unwrap();
        assert_eq!(when, WhenPolicy::Always);
        let status: JobStatus = serde_json::from_str(r#""skipped""#).unwrap();
        assert_eq!(status, JobStatus::Skipped);
    }
}
