//! Error types for the pipewright engine.
//!
//! The taxonomy follows the lifecycle of a run: descriptor errors are fatal
//! and raised before scheduling starts, everything else is job-local and is
//! recorded in the run's result set instead of aborting the scheduler.

use crate::core::JobStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// The main error type for pipewright operations.
#[derive(Debug, Error)]
pub enum PipewrightError {
    /// The pipeline definition is malformed.
    #[error("{0}")]
    Descriptor(#[from] DescriptorError),

    /// A cache backend failed.
    #[error("{0}")]
    Cache(#[from] CacheError),

    /// A job executor failed.
    #[error("{0}")]
    Executor(#[from] ExecutorError),

    /// An illegal job state transition was attempted.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// The engine configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Machine-readable diagnostics for a descriptor error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "DESC-003-UNKNOWN_STAGE").
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Hint for fixing the error.
    pub fix_hint: String,
}

/// Error raised when a pipeline definition fails to parse or validate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// The document could not be parsed.
    #[error("Failed to parse {format} pipeline definition: {message}")]
    Parse {
        /// The source format ("yaml" or "json").
        format: String,
        /// The parser message.
        message: String,
    },

    /// The definition declares no stages.
    #[error("Pipeline declares no stages")]
    NoStages,

    /// A stage name is declared twice.
    #[error("Stage '{0}' is declared more than once")]
    DuplicateStage(String),

    /// The definition declares no jobs.
    #[error("Pipeline declares no jobs")]
    NoJobs,

    /// A job has an empty name.
    #[error("Job at position {0} has an empty name")]
    EmptyJobName(usize),

    /// A job name is declared twice.
    #[error("Job '{0}' is declared more than once")]
    DuplicateJob(String),

    /// A job references a stage that is not declared.
    #[error("Job '{job}' references unknown stage '{stage}'")]
    UnknownStage {
        /// The job name.
        job: String,
        /// The referenced stage.
        stage: String,
    },

    /// A job has no script steps.
    #[error("Job '{0}' has an empty script")]
    EmptyScript(String),

    /// A branch filter pattern is not valid.
    #[error("Job '{job}' has invalid ref pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The job name.
        job: String,
        /// The offending pattern.
        pattern: String,
        /// Why the pattern is invalid.
        reason: String,
    },

    /// The same pattern appears in both `only` and `except`.
    #[error("Job '{job}' lists pattern '{pattern}' in both only and except")]
    ConflictingFilters {
        /// The job name.
        job: String,
        /// The pattern present in both lists.
        pattern: String,
    },

    /// A cache key is malformed.
    #[error("Job '{job}' has invalid cache key '{key}': {reason}")]
    InvalidCacheKey {
        /// The job name.
        job: String,
        /// The offending key.
        key: String,
        /// Why the key is invalid.
        reason: String,
    },

    /// A cache declares no paths.
    #[error("Job '{0}' declares a cache without paths")]
    EmptyCachePaths(String),

    /// A job needs a job that does not exist.
    #[error("Job '{job}' needs unknown job '{need}'")]
    UnknownNeed {
        /// The job name.
        job: String,
        /// The unknown dependency.
        need: String,
    },

    /// A job needs itself or a job in a later stage.
    #[error("Job '{job}' cannot need '{need}': it must be in the same or an earlier stage")]
    InvalidNeed {
        /// The job name.
        job: String,
        /// The offending dependency.
        need: String,
    },

    /// The `needs` relation between jobs of one stage forms a cycle.
    #[error("Cycle detected in job needs: {}", path.join(" -> "))]
    NeedsCycle {
        /// The jobs forming the cycle.
        path: Vec<String>,
    },

    /// A pull-only job and a writer share a cache key in the same stage
    /// without an ordering between them.
    #[error(
        "Ordering ambiguity in stage '{stage}': job '{reader}' pulls cache key '{key}' \
         written by '{writer}' with no declared ordering"
    )]
    OrderingAmbiguity {
        /// The stage containing both jobs.
        stage: String,
        /// The shared cache key template.
        key: String,
        /// The job with write policy.
        writer: String,
        /// The pull-only job.
        reader: String,
    },
}

impl DescriptorError {
    /// Creates a parse error.
    #[must_use]
    pub fn parse(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            format: format.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid pattern error.
    #[must_use]
    pub fn invalid_pattern(
        job: impl Into<String>,
        pattern: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidPattern {
            job: job.into(),
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid cache key error.
    #[must_use]
    pub fn invalid_cache_key(
        job: impl Into<String>,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidCacheKey {
            job: job.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns the stable diagnostic code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "DESC-001-PARSE",
            Self::NoStages => "DESC-002-NO_STAGES",
            Self::DuplicateStage(_) => "DESC-002-DUPLICATE_STAGE",
            Self::NoJobs => "DESC-003-NO_JOBS",
            Self::EmptyJobName(_) => "DESC-003-EMPTY_NAME",
            Self::DuplicateJob(_) => "DESC-003-DUPLICATE_JOB",
            Self::UnknownStage { .. } => "DESC-003-UNKNOWN_STAGE",
            Self::EmptyScript(_) => "DESC-003-EMPTY_SCRIPT",
            Self::InvalidPattern { .. } => "DESC-004-INVALID_PATTERN",
            Self::ConflictingFilters { .. } => "DESC-004-CONFLICTING_FILTERS",
            Self::InvalidCacheKey { .. } => "DESC-005-INVALID_CACHE_KEY",
            Self::EmptyCachePaths(_) => "DESC-005-EMPTY_CACHE_PATHS",
            Self::UnknownNeed { .. } => "DESC-006-UNKNOWN_NEED",
            Self::InvalidNeed { .. } => "DESC-006-INVALID_NEED",
            Self::NeedsCycle { .. } => "DESC-006-CYCLE",
            Self::OrderingAmbiguity { .. } => "DESC-007-ORDERING_AMBIGUITY",
        }
    }

    /// Returns a hint for fixing the error.
    #[must_use]
    pub fn fix_hint(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "Check the document syntax against the pipeline format.",
            Self::NoStages => "Declare the ordered stage list under `stages`.",
            Self::DuplicateStage(_) => "Remove the repeated entry from `stages`.",
            Self::NoJobs => "Declare at least one job under `jobs`.",
            Self::EmptyJobName(_) => "Give every job a non-empty `name`.",
            Self::DuplicateJob(_) => "Rename one of the jobs; job names must be unique.",
            Self::UnknownStage { .. } => "Add the stage to `stages` or fix the job's `stage`.",
            Self::EmptyScript(_) => "Add at least one command to the job's `script`.",
            Self::InvalidPattern { .. } => {
                "Use an exact ref name, `branches`, `tags`, or a `/regex/` that compiles."
            }
            Self::ConflictingFilters { .. } => {
                "Remove the pattern from either `only` or `except`."
            }
            Self::InvalidCacheKey { .. } => {
                "Use a non-empty key without `/`, and only reference defined variables."
            }
            Self::EmptyCachePaths(_) => "List at least one path under `cache.paths`.",
            Self::UnknownNeed { .. } => "Reference an existing job in `needs`.",
            Self::InvalidNeed { .. } => {
                "Only need jobs from the same or an earlier stage, and never the job itself."
            }
            Self::NeedsCycle { .. } => "Remove one of the `needs` entries in the cycle.",
            Self::OrderingAmbiguity { .. } => {
                "Add the writer to the reader's `needs`, move one job to another stage, or use distinct cache keys."
            }
        }
    }

    /// Returns the diagnostics for this error.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code().to_string(),
            message: self.to_string(),
            fix_hint: self.fix_hint().to_string(),
        }
    }
}

/// Error raised by a cache backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Reading or writing an entry failed.
    #[error("Cache I/O error for key '{key}': {message}")]
    Io {
        /// The cache key.
        key: String,
        /// The backend message.
        message: String,
    },

    /// The backend cannot be reached.
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    /// Creates an I/O error for a key.
    #[must_use]
    pub fn io(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Error raised by a job executor.
///
/// `Spawn` and `Timeout` carry the output captured before the failure,
/// including any `after_script` output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// A script step could not be started.
    #[error("Failed to spawn step '{step}': {message}")]
    Spawn {
        /// The command string.
        step: String,
        /// The OS error message.
        message: String,
        /// Output captured before the failure.
        logs: String,
    },

    /// The job exceeded its timeout.
    #[error("Job timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout in milliseconds.
        timeout_ms: u64,
        /// Output captured before the job was stopped.
        logs: String,
    },

    /// Any other executor failure.
    #[error("Executor error: {0}")]
    Other(String),
}

impl ExecutorError {
    /// Returns the output captured before the failure.
    #[must_use]
    pub fn logs(&self) -> &str {
        match self {
            Self::Spawn { logs, .. } | Self::Timeout { logs, .. } => logs,
            Self::Other(_) => "",
        }
    }

    /// Replaces the captured output.
    #[must_use]
    pub fn with_logs(mut self, captured: String) -> Self {
        if let Self::Spawn { logs, .. } | Self::Timeout { logs, .. } = &mut self {
            *logs = captured;
        }
        self
    }
}

/// Returned by a worker pool when no matching worker is free.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No worker available for tags {}", format_tags(required_tags))]
pub struct WorkerUnavailable {
    /// The tags the job requires.
    pub required_tags: BTreeSet<String>,
    /// True if no worker in the pool could ever satisfy the tags.
    pub no_match: bool,
}

fn format_tags(tags: &BTreeSet<String>) -> String {
    if tags.is_empty() {
        "[]".to_string()
    } else {
        format!("[{}]", tags.iter().cloned().collect::<Vec<_>>().join(", "))
    }
}

/// Error raised when a job state transition is not allowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal transition for job '{job}': {from} -> {to}")]
pub struct TransitionError {
    /// The job name.
    pub job: String,
    /// The current status.
    pub from: JobStatus,
    /// The requested status.
    pub to: JobStatus,
}

/// Error raised when the engine configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid configuration for '{field}': {message}")]
pub struct ConfigError {
    /// The configuration field.
    pub field: String,
    /// Why the value is invalid.
    pub message: String,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}
