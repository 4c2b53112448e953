//! Engine facade wiring the descriptor store, resolver and scheduler.

use crate::cache::{CacheManager, CacheStore, InMemoryCacheStore};
use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::core::{RunResult, Trigger};
use crate::errors::{ConfigError, DescriptorError, PipewrightError};
use crate::events::{EventSink, NoOpEventSink};
use crate::executor::JobExecutor;
use crate::pipeline::{DescriptorStore, PipelineDefinition};
use crate::plan::{resolve, ExecutionPlan};
use crate::scheduler::Scheduler;
use crate::workers::WorkerPool;
use std::path::Path;
use std::sync::Arc;

/// Validates, plans and runs pipelines.
///
/// ```rust,ignore
/// let engine = Engine::new(EngineConfig::default(), executor, workers)?;
/// let definition = engine.load_file(".pipeline.yml")?;
/// let result = engine
///     .run(&definition, &Trigger::branch("main", sha), &CancellationToken::new())
///     .await;
/// ```
pub struct Engine {
    config: EngineConfig,
    store: DescriptorStore,
    executor: Arc<dyn JobExecutor>,
    workers: Arc<dyn WorkerPool>,
    events: Arc<dyn EventSink>,
}

impl Engine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the configuration is invalid.
    pub fn new(
        config: EngineConfig,
        executor: Arc<dyn JobExecutor>,
        workers: Arc<dyn WorkerPool>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            store: DescriptorStore::new(),
            executor,
            workers,
            events: Arc::new(NoOpEventSink),
        })
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the descriptor store.
    #[must_use]
    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    /// Parses and validates a definition.
    ///
    /// # Errors
    ///
    /// Returns the first `DescriptorError` found.
    pub fn validate(&self, source: &str) -> Result<Arc<PipelineDefinition>, DescriptorError> {
        self.store.load_str(source)
    }

    /// Reads, parses and validates a definition file.
    ///
    /// # Errors
    ///
    /// Returns an IO or descriptor error.
    pub fn load_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Arc<PipelineDefinition>, PipewrightError> {
        self.store.load_file(path)
    }

    /// Builds the execution plan for a trigger.
    #[must_use]
    pub fn plan(&self, definition: &Arc<PipelineDefinition>, trigger: &Trigger) -> ExecutionPlan {
        resolve(definition, trigger)
    }

    /// Runs a definition with a fresh in-memory cache owned by the run.
    pub async fn run(
        &self,
        definition: &Arc<PipelineDefinition>,
        trigger: &Trigger,
        cancel: &CancellationToken,
    ) -> RunResult {
        self.run_with_cache(definition, trigger, Arc::new(InMemoryCacheStore::new()), cancel)
            .await
    }

    /// Runs a definition against the given cache store.
    pub async fn run_with_cache(
        &self,
        definition: &Arc<PipelineDefinition>,
        trigger: &Trigger,
        cache: Arc<dyn CacheStore>,
        cancel: &CancellationToken,
    ) -> RunResult {
        let plan = self.plan(definition, trigger);
        let scheduler = Scheduler::new(
            self.config.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.workers),
            Arc::clone(&self.events),
        );
        scheduler.run(&plan, CacheManager::new(cache), cancel).await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("definitions", &self.store.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JobStatus, RunOutcome};
    use crate::testing::{ScriptedExecutor, CI_PIPELINE};
    use crate::workers::StaticWorkerPool;

    fn engine() -> Engine {
        Engine::new(
            EngineConfig::default(),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(StaticWorkerPool::uniform(2, &[])),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let err = Engine::new(
            EngineConfig::default().with_max_parallel_jobs(0),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(StaticWorkerPool::uniform(1, &[])),
        )
        .unwrap_err();
        assert_eq!(err.field, "max_parallel_jobs");
    }

    #[test]
    fn test_validate_and_plan() {
        let engine = engine();
        let definition = engine.validate(CI_PIPELINE).unwrap();
        let plan = engine.plan(&definition, &Trigger::branch("main", "abc"));

        assert_eq!(plan.planned_count(), 3);
        assert_eq!(engine.store().len(), 1);
    }

    #[tokio::test]
    async fn test_run_uses_fresh_cache() {
        let engine = engine();
        let definition = engine.validate(CI_PIPELINE).unwrap();
        let cancel = CancellationToken::new();

        let first = engine.run(&definition, &Trigger::branch("main", "abc"), &cancel).await;
        assert_eq!(first.outcome, RunOutcome::Succeeded);
        assert_eq!(first.status_of("unit_test"), Some(JobStatus::Succeeded));
        assert!(first.job("unit_test").unwrap().cache.as_ref().unwrap().hit);

        let second = engine.run(&definition, &Trigger::branch("main", "abc"), &cancel).await;
        assert_ne!(first.run_id, second.run_id);
        assert!(second.succeeded());
    }
}
