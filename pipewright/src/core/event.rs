//! Lifecycle events emitted while a pipeline run executes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Event type emitted when a run starts.
pub const RUN_STARTED: &str = "run.started";
/// Event type emitted when a run reaches its final outcome.
pub const RUN_COMPLETED: &str = "run.completed";
/// Event type emitted when a job is dispatched to a worker.
pub const JOB_STARTED: &str = "job.started";
/// Event type emitted when a job succeeds.
pub const JOB_SUCCEEDED: &str = "job.succeeded";
/// Event type emitted when a job fails.
pub const JOB_FAILED: &str = "job.failed";
/// Event type emitted when a job is skipped.
pub const JOB_SKIPPED: &str = "job.skipped";
/// Event type emitted when a job is canceled.
pub const JOB_CANCELED: &str = "job.canceled";
/// Event type emitted after a cache fetch.
pub const CACHE_FETCHED: &str = "cache.fetched";
/// Event type emitted after a cache store.
pub const CACHE_STORED: &str = "cache.stored";

/// An event describing a run or job lifecycle change.
///
/// Events are consumed by [`EventSink`](crate::events::EventSink)
/// implementations for logging, monitoring, or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// The event type (e.g., "job.started").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The event payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl PipelineEvent {
    /// Creates a new event with an empty payload.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: crate::utils::iso_timestamp(),
            data: Map::new(),
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns a string payload field.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Creates a "run.started" event.
    #[must_use]
    pub fn run_started(run_id: &str, ref_name: &str, commit_sha: &str) -> Self {
        Self::new(RUN_STARTED)
            .add_data("run_id", json!(run_id))
            .add_data("ref", json!(ref_name))
            .add_data("commit_sha", json!(commit_sha))
    }

    /// Creates a "run.completed" event.
    #[must_use]
    pub fn run_completed(run_id: &str, outcome: &str, duration_ms: u64) -> Self {
        Self::new(RUN_COMPLETED)
            .add_data("run_id", json!(run_id))
            .add_data("outcome", json!(outcome))
            .add_data("duration_ms", json!(duration_ms))
    }

    /// Creates a "job.started" event.
    #[must_use]
    pub fn job_started(job: &str, stage: &str, worker: &str) -> Self {
        Self::new(JOB_STARTED)
            .add_data("job", json!(job))
            .add_data("stage", json!(stage))
            .add_data("worker", json!(worker))
    }

    /// Creates a "job.succeeded" event.
    #[must_use]
    pub fn job_succeeded(job: &str, duration_ms: u64) -> Self {
        Self::new(JOB_SUCCEEDED)
            .add_data("job", json!(job))
            .add_data("duration_ms", json!(duration_ms))
    }

    /// Creates a "job.failed" event.
    #[must_use]
    pub fn job_failed(job: &str, reason: &str, allow_failure: bool) -> Self {
        Self::new(JOB_FAILED)
            .add_data("job", json!(job))
            .add_data("reason", json!(reason))
            .add_data("allow_failure", json!(allow_failure))
    }

    /// Creates a "job.skipped" event.
    #[must_use]
    pub fn job_skipped(job: &str, reason: &str) -> Self {
        Self::new(JOB_SKIPPED)
            .add_data("job", json!(job))
            .add_data("reason", json!(reason))
    }

    /// Creates a "job.canceled" event.
    #[must_use]
    pub fn job_canceled(job: &str, reason: &str) -> Self {
        Self::new(JOB_CANCELED)
            .add_data("job", json!(job))
            .add_data("reason", json!(reason))
    }

    /// Creates a "cache.fetched" event.
    #[must_use]
    pub fn cache_fetched(job: &str, key: &str, hit: bool) -> Self {
        Self::new(CACHE_FETCHED)
            .add_data("job", json!(job))
            .add_data("key", json!(key))
            .add_data("hit", json!(hit))
    }

    /// Creates a "cache.stored" event.
    #[must_use]
    pub fn cache_stored(job: &str, key: &str, paths: usize) -> Self {
        Self::new(CACHE_STORED)
            .add_data("job", json!(job))
            .add_data("key", json!(key))
            .add_data("paths", json!(paths))
    }
}
