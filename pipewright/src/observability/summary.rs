//! Wide summary payload of a finished run.

use crate::core::{JobStatus, RunResult};
use serde_json::{json, Value};

/// Builds one flat payload describing a whole run.
///
/// Used for the final log line and by the CLI.
#[must_use]
pub fn run_summary(result: &RunResult) -> Value {
    let failures: Vec<Value> = result
        .jobs
        .iter()
        .filter(|j| j.status == JobStatus::Failed)
        .map(|j| {
            json!({
                "job": j.name,
                "stage": j.stage,
                "allow_failure": j.allow_failure,
                "failure": j.failure.as_ref().map(ToString::to_string),
            })
        })
        .collect();

    let mut payload = json!({
        "run_id": result.run_id.to_string(),
        "pipeline": result.pipeline,
        "ref": result.trigger.ref_name,
        "commit_sha": result.trigger.commit_sha,
        "outcome": result.outcome.to_string(),
        "duration_ms": result.duration_ms,
        "jobs": result.jobs.len(),
        "succeeded": result.count(JobStatus::Succeeded),
        "failed": result.count(JobStatus::Failed),
        "skipped": result.count(JobStatus::Skipped),
        "canceled": result.count(JobStatus::Canceled),
    });

    if !failures.is_empty() {
        payload["failures"] = Value::Array(failures);
    }
    if !result.warnings.is_empty() {
        payload["warnings"] = json!(result.warnings);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FailureReason, JobResult, RunOutcome, Trigger, WhenPolicy};
    use crate::utils::{generate_run_id, now_utc};

    fn result(jobs: Vec<JobResult>) -> RunResult {
        RunResult {
            run_id: generate_run_id(),
            pipeline: "ci".to_string(),
            trigger: Trigger::branch("main", "abc"),
            outcome: RunOutcome::Failed,
            jobs,
            warnings: Vec::new(),
            started_at: now_utc(),
            finished_at: now_utc(),
            duration_ms: 12,
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut failed = JobResult::new("compile", "build", JobStatus::Failed, WhenPolicy::OnSuccess);
        failed.failure = Some(FailureReason::ScriptFailed { exit_code: 1 });
        let canceled = JobResult::new("test", "test", JobStatus::Canceled, WhenPolicy::OnSuccess);
        let sweep = JobResult::new("sweep", "cleanup", JobStatus::Succeeded, WhenPolicy::Always);

        let payload = run_summary(&result(vec![failed, canceled, sweep]));

        assert_eq!(payload["outcome"], "failed");
        assert_eq!(payload["jobs"], 3);
        assert_eq!(payload["failed"], 1);
        assert_eq!(payload["canceled"], 1);
        assert_eq!(payload["failures"][0]["job"], "compile");
        assert_eq!(payload["failures"][0]["failure"], "script exited with code 1");
        assert!(payload.get("warnings").is_none());
    }

    #[test]
    fn test_summary_without_failures() {
        let ok = JobResult::new("a", "build", JobStatus::Succeeded, WhenPolicy::OnSuccess);
        let mut run = result(vec![ok]);
        run.warnings.push("cold cache".to_string());

        let payload = run_summary(&run);
        assert!(payload.get("failures").is_none());
        assert_eq!(payload["warnings"][0], "cold cache");
    }
}
