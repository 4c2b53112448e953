//! Engine configuration.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix of environment variables read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "PIPEWRIGHT_";

/// Runtime settings of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of jobs running at once.
    pub max_parallel_jobs: usize,
    /// How long a job waits for a matching worker before failing.
    pub worker_timeout_ms: u64,
    /// Scheduler poll interval while jobs wait for workers.
    pub poll_interval_ms: u64,
    /// Evict every cache key used by the run once it completes.
    pub evict_caches_on_completion: bool,
    /// Timeout for jobs that do not set one. Zero disables it.
    pub default_job_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: 4,
            worker_timeout_ms: 30_000,
            poll_interval_ms: 50,
            evict_caches_on_completion: false,
            default_job_timeout_secs: 3600,
        }
    }
}

impl EngineConfig {
    /// Sets the parallelism limit.
    #[must_use]
    pub fn with_max_parallel_jobs(mut self, max_parallel_jobs: usize) -> Self {
        self.max_parallel_jobs = max_parallel_jobs;
        self
    }

    /// Sets the worker wait timeout.
    #[must_use]
    pub fn with_worker_timeout_ms(mut self, worker_timeout_ms: u64) -> Self {
        self.worker_timeout_ms = worker_timeout_ms;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Enables or disables cache eviction at run completion.
    #[must_use]
    pub fn with_evict_caches_on_completion(mut self, evict: bool) -> Self {
        self.evict_caches_on_completion = evict;
        self
    }

    /// Sets the default job timeout.
    #[must_use]
    pub fn with_default_job_timeout_secs(mut self, secs: u64) -> Self {
        self.default_job_timeout_secs = secs;
        self
    }

    /// Parses a YAML or JSON config document. Missing fields keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the document does not parse.
    pub fn from_document(source: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(source).map_err(|e| ConfigError::new("document", e.to_string()))
    }

    /// Overlays `PIPEWRIGHT_*` environment variables on the defaults.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a variable is set but does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Overlays values from a lookup keyed by upper-case field name.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a value does not parse.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("MAX_PARALLEL_JOBS") {
            self.max_parallel_jobs = parse_field("max_parallel_jobs", &v)?;
        }
        if let Some(v) = lookup("WORKER_TIMEOUT_MS") {
            self.worker_timeout_ms = parse_field("worker_timeout_ms", &v)?;
        }
        if let Some(v) = lookup("POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_field("poll_interval_ms", &v)?;
        }
        if let Some(v) = lookup("EVICT_CACHES_ON_COMPLETION") {
            self.evict_caches_on_completion = parse_field("evict_caches_on_completion", &v)?;
        }
        if let Some(v) = lookup("DEFAULT_JOB_TIMEOUT_SECS") {
            self.default_job_timeout_secs = parse_field("default_job_timeout_secs", &v)?;
        }
        Ok(self)
    }

    /// Checks the values.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for zero parallelism or a zero poll interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_jobs == 0 {
            return Err(ConfigError::new("max_parallel_jobs", "must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::new("poll_interval_ms", "must be at least 1"));
        }
        Ok(())
    }

    /// Returns the worker wait timeout.
    #[must_use]
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    /// Returns the poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the timeout for a job, preferring its own setting.
    #[must_use]
    pub fn job_timeout(&self, job_timeout_secs: Option<u64>) -> Option<Duration> {
        match job_timeout_secs.unwrap_or(self.default_job_timeout_secs) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::new(field, format!("cannot parse '{value}': {e}")))
}
