//! Pipeline definitions and harness for tests.

use crate::cache::{CacheStore, InMemoryCacheStore};
use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::core::{RunResult, Trigger};
use crate::engine::Engine;
use crate::events::CollectingEventSink;
use crate::pipeline::{DescriptorStore, PipelineDefinition};
use crate::workers::StaticWorkerPool;
use std::sync::Arc;

use super::ScriptedExecutor;

/// Build, test and cleanup stages sharing a commit-keyed cache.
pub const CI_PIPELINE: &str = r#"
name: ci
stages: [build, test, cleanup]
jobs:
  - name: compile
    stage: build
    script: make
    cache: { key: "$CI_COMMIT_SHA", paths: [build/], policy: pull-push }
  - name: unit_test
    stage: test
    script: make test
    cache: { key: "$CI_COMMIT_SHA", paths: [build/], policy: pull }
  - name: sweep
    stage: cleanup
    script: rm -rf build
    when: always
"#;

/// Parses a definition, panicking on error.
///
/// # Panics
///
/// Panics if the document is invalid.
#[must_use]
pub fn definition(source: &str) -> Arc<PipelineDefinition> {
    match DescriptorStore::new().load_str(source) {
        Ok(definition) => definition,
        Err(e) => panic!("invalid test pipeline: {e}"),
    }
}

/// Returns a `main` branch trigger at commit `sha1`.
#[must_use]
pub fn main_trigger() -> Trigger {
    Trigger::branch("main", "sha1")
}

/// An engine wired with a scripted executor, a collecting sink and a cache
/// the test can inspect.
pub struct TestHarness {
    /// The engine under test.
    pub engine: Engine,
    /// The scripted executor.
    pub executor: Arc<ScriptedExecutor>,
    /// Events emitted by runs.
    pub events: Arc<CollectingEventSink>,
    /// The cache store handed to runs.
    pub cache: Arc<InMemoryCacheStore>,
}

impl TestHarness {
    /// Creates a harness with `workers` untagged workers.
    #[must_use]
    pub fn new(executor: ScriptedExecutor, workers: usize) -> Self {
        Self::with_config(executor, workers, EngineConfig::default())
    }

    /// Creates a harness with a custom configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    #[must_use]
    pub fn with_config(executor: ScriptedExecutor, workers: usize, config: EngineConfig) -> Self {
        Self::with_pool(executor, StaticWorkerPool::uniform(workers, &[]), config)
    }

    /// Creates a harness with a custom worker pool.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    #[must_use]
    pub fn with_pool(
        executor: ScriptedExecutor,
        pool: StaticWorkerPool,
        config: EngineConfig,
    ) -> Self {
        let executor = Arc::new(executor);
        let events = Arc::new(CollectingEventSink::new());
        let engine = match Engine::new(config, executor.clone(), Arc::new(pool)) {
            Ok(engine) => engine.with_event_sink(events.clone()),
            Err(e) => panic!("invalid test config: {e}"),
        };
        Self {
            engine,
            executor,
            events,
            cache: Arc::new(InMemoryCacheStore::new()),
        }
    }

    /// Runs a definition against the harness cache.
    ///
    /// # Panics
    ///
    /// Panics if the document is invalid.
    pub async fn run(&self, source: &str, trigger: &Trigger) -> RunResult {
        self.run_with_token(source, trigger, &CancellationToken::new())
            .await
    }

    /// Runs a definition with a caller-owned cancellation token.
    ///
    /// # Panics
    ///
    /// Panics if the document is invalid.
    pub async fn run_with_token(
        &self,
        source: &str,
        trigger: &Trigger,
        cancel: &CancellationToken,
    ) -> RunResult {
        let definition = definition(source);
        let cache: Arc<dyn CacheStore> = self.cache.clone();
        self.engine
            .run_with_cache(&definition, trigger, cache, cancel)
            .await
    }
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness").finish_non_exhaustive()
    }
}
