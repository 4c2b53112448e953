//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Job status, run outcome and job policy enums
//! - The trigger a run is planned for
//! - Per-job and per-run results
//! - Lifecycle events

mod event;
mod result;
mod status;
mod trigger;

pub use event::{
    PipelineEvent, CACHE_FETCHED, CACHE_STORED, JOB_CANCELED, JOB_FAILED, JOB_SKIPPED,
    JOB_STARTED, JOB_SUCCEEDED, RUN_COMPLETED, RUN_STARTED,
};
pub use result::{CacheActivity, FailureReason, JobResult, RunResult};
pub use status::{CachePolicy, JobStatus, RunOutcome, WhenPolicy};
pub use trigger::{
    RefKind, Trigger, CI_COMMIT_REF_NAME, CI_COMMIT_REF_SLUG, CI_COMMIT_SHA,
    CI_COMMIT_SHORT_SHA, PREDEFINED_VARIABLES,
};
