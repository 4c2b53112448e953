//! # Pipewright
//!
//! A staged CI pipeline orchestration engine.
//!
//! Pipewright reads a pipeline definition (YAML or JSON), decides which jobs
//! a trigger admits, and runs them on a pool of workers:
//!
//! - **Stage barriers**: a stage starts only after every earlier stage settles
//! - **Ref filters**: `only` / `except` patterns select jobs per branch or tag
//! - **Keyed caches**: jobs pull and push cache entries keyed by templates
//! - **Failure handling**: failures cancel downstream work, `when: always` and
//!   `when: on_failure` jobs still run
//! - **Event-driven observability**: lifecycle events and tracing spans per run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipewright::prelude::*;
//!
//! let engine = Engine::new(
//!     EngineConfig::from_env()?,
//!     Arc::new(ShellExecutor::new()),
//!     Arc::new(StaticWorkerPool::uniform(4, &["linux"])),
//! )?;
//! let definition = engine.load_file(".pipeline.yml")?;
//! let result = engine
//!     .run(&definition, &Trigger::branch("main", sha), &CancellationToken::new())
//!     .await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod plan;
pub mod scheduler;
pub mod testing;
pub mod utils;
pub mod workers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheManager, CacheSnapshot, CacheStore, InMemoryCacheStore};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::EngineConfig;
    pub use crate::core::{
        CachePolicy, JobResult, JobStatus, PipelineEvent, RefKind, RunOutcome, RunResult,
        Trigger, WhenPolicy,
    };
    pub use crate::engine::Engine;
    pub use crate::errors::{
        CacheError, ConfigError, DescriptorError, ExecutorError, PipewrightError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{ExecutionReport, ExecutionRequest, JobExecutor, ShellExecutor};
    pub use crate::pipeline::{DescriptorStore, JobSpec, PipelineDefinition};
    pub use crate::plan::ExecutionPlan;
    pub use crate::workers::{StaticWorkerPool, WorkerHandle, WorkerPool, WorkerSpec};
}
