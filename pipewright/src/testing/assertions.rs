//! Assertions over run results.

use crate::core::{JobStatus, RunOutcome, RunResult};

/// Asserts that a job ended in the expected status.
///
/// # Panics
///
/// Panics if the job is missing or in another status.
pub fn assert_job_status(result: &RunResult, job: &str, expected: JobStatus) {
    match result.job(job) {
        Some(j) => assert_eq!(
            j.status, expected,
            "job '{job}' ended {} (reason: {:?}), expected {expected}",
            j.status, j.reason
        ),
        None => panic!("job '{job}' is not in the run result"),
    }
}

/// Asserts the run outcome.
///
/// # Panics
///
/// Panics if the outcome differs.
pub fn assert_outcome(result: &RunResult, expected: RunOutcome) {
    assert_eq!(
        result.outcome, expected,
        "run ended {}, expected {expected}",
        result.outcome
    );
}

/// Asserts that every job reached a terminal state.
///
/// # Panics
///
/// Panics if any job is still pending or running.
pub fn assert_all_terminal(result: &RunResult) {
    for job in &result.jobs {
        assert!(
            job.status.is_terminal(),
            "job '{}' ended non-terminal: {}",
            job.name,
            job.status
        );
    }
}
