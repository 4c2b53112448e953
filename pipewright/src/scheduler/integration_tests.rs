//! End-to-end runs through the engine with scripted jobs.

#[cfg(test)]
mod tests {
    use crate::cache::CacheStore;
    use crate::cancellation::CancellationToken;
    use crate::config::EngineConfig;
    use crate::core::{
        FailureReason, JobStatus, RunOutcome, CACHE_FETCHED, CACHE_STORED, JOB_CANCELED,
        JOB_STARTED, JOB_SUCCEEDED, RUN_COMPLETED, RUN_STARTED,
    };
    use crate::engine::Engine;
    use crate::errors::DescriptorError;
    use crate::testing::{
        assert_all_terminal, assert_job_status, assert_outcome, definition, main_trigger,
        FailingCacheStore, ScriptedExecutor, TestHarness, CI_PIPELINE,
    };
    use crate::workers::{StaticWorkerPool, WorkerSpec};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const NOTIFY_PIPELINE: &str = r#"
stages: [build, notify]
jobs:
  - name: compile
    stage: build
    script: make
  - name: page_oncall
    stage: notify
    script: ./page.sh
    when: on_failure
"#;

    fn fast_config() -> EngineConfig {
        EngineConfig::default().with_poll_interval_ms(5)
    }

    #[tokio::test]
    async fn test_happy_path() {
        let harness = TestHarness::new(ScriptedExecutor::new(), 2);
        let result = harness.run(CI_PIPELINE, &main_trigger()).await;

        assert_outcome(&result, RunOutcome::Succeeded);
        assert_all_terminal(&result);
        assert_eq!(
            harness.executor.executed(),
            vec!["compile", "unit_test", "sweep"]
        );
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_failure_cancels_later_stages_but_runs_always_jobs() {
        let harness = TestHarness::new(ScriptedExecutor::new().with_exit_code("compile", 2), 2);
        let result = harness.run(CI_PIPELINE, &main_trigger()).await;

        assert_outcome(&result, RunOutcome::Failed);
        assert_job_status(&result, "compile", JobStatus::Failed);
        assert_job_status(&result, "unit_test", JobStatus::Canceled);
        assert_job_status(&result, "sweep", JobStatus::Succeeded);

        let compile = result.job("compile").unwrap();
        assert_eq!(compile.exit_code, Some(2));
        assert_eq!(
            compile.failure,
            Some(FailureReason::ScriptFailed { exit_code: 2 })
        );
        assert_eq!(
            result.job("unit_test").unwrap().reason.as_deref(),
            Some("upstream job 'compile' failed")
        );
        assert!(!harness.executor.was_executed("unit_test"));
    }

    #[tokio::test]
    async fn test_executor_error_fails_job() {
        let harness =
            TestHarness::new(ScriptedExecutor::new().with_error("compile", "runner lost"), 1);
        let result = harness.run(CI_PIPELINE, &main_trigger()).await;

        assert_outcome(&result, RunOutcome::Failed);
        assert!(matches!(
            result.job("compile").unwrap().failure,
            Some(FailureReason::Executor { .. })
        ));
        assert_job_status(&result, "unit_test", JobStatus::Canceled);
    }

    #[tokio::test]
    async fn test_timed_out_job_keeps_logs() {
        let harness = TestHarness::new(ScriptedExecutor::new().with_timeout("compile"), 1);
        let result = harness.run(CI_PIPELINE, &main_trigger()).await;

        assert_outcome(&result, RunOutcome::Failed);
        let compile = result.job("compile").unwrap();
        assert!(matches!(compile.failure, Some(FailureReason::Executor { .. })));
        assert_eq!(compile.logs, "ran compile\njob timed out\n");
        assert_job_status(&result, "unit_test", JobStatus::Canceled);
    }

    #[tokio::test]
    async fn test_same_stage_ambiguity_is_rejected() {
        let harness = TestHarness::new(ScriptedExecutor::new(), 1);
        let err = harness
            .engine
            .validate(
                r#"
stages: [build]
jobs:
  - name: reader
    stage: build
    script: make check
    cache: { key: deps, paths: [vendor/], policy: pull }
  - name: writer
    stage: build
    script: make
    cache: { key: deps, paths: [vendor/] }
"#,
            )
            .unwrap_err();

        assert!(matches!(err, DescriptorError::OrderingAmbiguity { .. }));
    }

    #[tokio::test]
    async fn test_declaration_order_runs_reader_after_writer() {
        let harness = TestHarness::new(
            ScriptedExecutor::new().with_delay("writer", Duration::from_millis(30)),
            4,
        );
        let result = harness
            .run(
                r#"
stages: [build]
jobs:
  - name: writer
    stage: build
    script: make
    cache: { key: deps, paths: [vendor/] }
  - name: reader
    stage: build
    script: make check
    cache: { key: deps, paths: [vendor/], policy: pull }
"#,
                &main_trigger(),
            )
            .await;

        assert_outcome(&result, RunOutcome::Succeeded);
        assert!(result.warnings.is_empty());
        let writer = harness.executor.call("writer").unwrap();
        let reader = harness.executor.call("reader").unwrap();
        assert!(reader.started >= writer.finished);
        assert!(reader.cache.unwrap().is_hit());
    }

    #[tokio::test]
    async fn test_needs_resolve_same_stage_ordering() {
        let harness = TestHarness::new(
            ScriptedExecutor::new().with_delay("writer", Duration::from_millis(30)),
            4,
        );
        let result = harness
            .run(
                r#"
stages: [build]
jobs:
  - name: reader
    stage: build
    script: make check
    needs: [writer]
    cache: { key: deps, paths: [vendor/], policy: pull }
  - name: writer
    stage: build
    script: make
    cache: { key: deps, paths: [vendor/] }
"#,
                &main_trigger(),
            )
            .await;

        assert_outcome(&result, RunOutcome::Succeeded);
        let writer = harness.executor.call("writer").unwrap();
        let reader = harness.executor.call("reader").unwrap();
        assert!(reader.started >= writer.finished);
        assert!(reader.cache.unwrap().is_hit());
    }

    #[tokio::test]
    async fn test_excluded_jobs_are_skipped_without_blocking() {
        let harness = TestHarness::new(ScriptedExecutor::new(), 2);
        let result = harness
            .run(
                r#"
stages: [build, deploy]
jobs:
  - name: compile
    stage: build
    script: make
  - name: release
    stage: build
    script: make release
    only: [tags]
  - name: publish
    stage: deploy
    script: ./publish.sh
"#,
                &main_trigger(),
            )
            .await;

        assert_outcome(&result, RunOutcome::Succeeded);
        assert_job_status(&result, "release", JobStatus::Skipped);
        assert_job_status(&result, "publish", JobStatus::Succeeded);
        assert!(!harness.executor.was_executed("release"));
        assert!(result.job("release").unwrap().reason.is_some());
    }

    #[tokio::test]
    async fn test_stage_barrier() {
        let harness = TestHarness::new(
            ScriptedExecutor::new()
                .with_delay("slow", Duration::from_millis(40))
                .with_delay("fast", Duration::from_millis(5)),
            4,
        );
        let result = harness
            .run(
                r#"
stages: [build, test]
jobs:
  - name: slow
    stage: build
    script: make slow
  - name: fast
    stage: build
    script: make fast
  - name: check
    stage: test
    script: make check
"#,
                &main_trigger(),
            )
            .await;

        assert_outcome(&result, RunOutcome::Succeeded);
        let slow = harness.executor.call("slow").unwrap();
        let fast = harness.executor.call("fast").unwrap();
        let check = harness.executor.call("check").unwrap();
        assert!(check.started >= slow.finished);
        assert!(check.started >= fast.finished);
        assert_eq!(harness.executor.max_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_cache_round_trip_between_stages() {
        let harness = TestHarness::new(ScriptedExecutor::new(), 2);
        let result = harness.run(CI_PIPELINE, &main_trigger()).await;

        let compile = result.job("compile").unwrap().cache.clone().unwrap();
        assert_eq!(compile.key, "sha1");
        assert!(compile.fetched);
        assert!(!compile.hit);
        assert!(compile.stored);

        let unit_test = result.job("unit_test").unwrap().cache.clone().unwrap();
        assert!(unit_test.hit);
        assert!(!unit_test.stored);

        let snapshot = harness.executor.call("unit_test").unwrap().cache.unwrap();
        assert_eq!(snapshot.paths, vec!["build/".to_string()]);
        assert!(harness.cache.contains("sha1"));
    }

    #[tokio::test]
    async fn test_evict_caches_on_completion() {
        let harness = TestHarness::with_config(
            ScriptedExecutor::new(),
            2,
            EngineConfig::default().with_evict_caches_on_completion(true),
        );
        let result = harness.run(CI_PIPELINE, &main_trigger()).await;

        assert_outcome(&result, RunOutcome::Succeeded);
        assert!(result.job("unit_test").unwrap().cache.as_ref().unwrap().hit);
        assert!(harness.cache.is_empty());
    }

    #[tokio::test]
    async fn test_allow_failure_does_not_block() {
        let harness = TestHarness::new(ScriptedExecutor::new().with_exit_code("lint", 1), 2);
        let result = harness
            .run(
                r#"
stages: [build, test]
jobs:
  - name: lint
    stage: build
    script: make lint
    allow_failure: true
  - name: check
    stage: test
    script: make check
"#,
                &main_trigger(),
            )
            .await;

        assert_outcome(&result, RunOutcome::Succeeded);
        assert_job_status(&result, "lint", JobStatus::Failed);
        assert_job_status(&result, "check", JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_worker_timeout_fails_job() {
        let harness = TestHarness::with_config(
            ScriptedExecutor::new(),
            1,
            fast_config().with_worker_timeout_ms(50),
        );
        let result = harness
            .run(
                r#"
stages: [train, report]
jobs:
  - name: train
    stage: train
    script: python train.py
    tags: [gpu]
  - name: summarize
    stage: report
    script: ./summarize.sh
"#,
                &main_trigger(),
            )
            .await;

        assert_outcome(&result, RunOutcome::Failed);
        assert_job_status(&result, "train", JobStatus::Failed);
        assert!(matches!(
            result.job("train").unwrap().failure,
            Some(FailureReason::WorkerTimeout { waited_ms }) if waited_ms >= 50
        ));
        assert_job_status(&result, "summarize", JobStatus::Canceled);
        assert!(harness.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_tagged_jobs_use_matching_workers() {
        let pool = StaticWorkerPool::new(vec![
            WorkerSpec::new("cpu-1", ["linux"]),
            WorkerSpec::new("gpu-1", ["linux", "gpu"]),
        ]);
        let harness = TestHarness::with_pool(ScriptedExecutor::new(), pool, fast_config());
        let result = harness
            .run(
                r#"
stages: [train]
jobs:
  - name: train
    stage: train
    script: python train.py
    tags: [gpu]
"#,
                &main_trigger(),
            )
            .await;

        assert_outcome(&result, RunOutcome::Succeeded);
        assert_eq!(result.job("train").unwrap().worker.as_deref(), Some("gpu-1"));
    }

    #[tokio::test]
    async fn test_jobs_wait_for_busy_workers() {
        let harness = TestHarness::with_config(
            ScriptedExecutor::new().with_default_delay(Duration::from_millis(10)),
            1,
            fast_config(),
        );
        let result = harness
            .run(
                r#"
stages: [test]
jobs:
  - { name: a, stage: test, script: "true" }
  - { name: b, stage: test, script: "true" }
  - { name: c, stage: test, script: "true" }
"#,
                &main_trigger(),
            )
            .await;

        assert_outcome(&result, RunOutcome::Succeeded);
        assert_eq!(harness.executor.max_concurrency(), 1);
        assert_eq!(harness.executor.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_external_cancel() {
        let harness = TestHarness::with_config(
            ScriptedExecutor::new().with_delay("compile", Duration::from_millis(60)),
            2,
            fast_config(),
        );
        let cancel = CancellationToken::new();
        let trigger = main_trigger();

        let (result, ()) = tokio::join!(
            harness.run_with_token(CI_PIPELINE, &trigger, &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(15)).await;
                cancel.cancel("user requested");
            }
        );

        assert_outcome(&result, RunOutcome::Canceled);
        assert_job_status(&result, "compile", JobStatus::Succeeded);
        assert_job_status(&result, "unit_test", JobStatus::Canceled);
        assert_job_status(&result, "sweep", JobStatus::Succeeded);
        assert_eq!(
            result.job("unit_test").unwrap().reason.as_deref(),
            Some("run canceled: user requested")
        );
    }

    #[tokio::test]
    async fn test_on_failure_job_runs_after_failure() {
        let harness = TestHarness::new(ScriptedExecutor::new().with_exit_code("compile", 1), 1);
        let result = harness.run(NOTIFY_PIPELINE, &main_trigger()).await;

        assert_outcome(&result, RunOutcome::Failed);
        assert_job_status(&result, "page_oncall", JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_on_failure_job_skipped_on_success() {
        let harness = TestHarness::new(ScriptedExecutor::new(), 1);
        let result = harness.run(NOTIFY_PIPELINE, &main_trigger()).await;

        assert_outcome(&result, RunOutcome::Succeeded);
        assert_job_status(&result, "page_oncall", JobStatus::Skipped);
        assert_eq!(
            result.job("page_oncall").unwrap().reason.as_deref(),
            Some("run has not failed")
        );
    }

    #[tokio::test]
    async fn test_always_job_failure_fails_run() {
        let harness = TestHarness::new(ScriptedExecutor::new().with_exit_code("sweep", 1), 2);
        let result = harness.run(CI_PIPELINE, &main_trigger()).await;

        assert_outcome(&result, RunOutcome::Failed);
        assert_job_status(&result, "compile", JobStatus::Succeeded);
        assert_job_status(&result, "unit_test", JobStatus::Succeeded);
        assert_job_status(&result, "sweep", JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_store_failure_fails_job_with_consumer() {
        let engine = Engine::new(
            EngineConfig::default(),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(StaticWorkerPool::uniform(2, &[])),
        )
        .unwrap();
        let cache: Arc<dyn CacheStore> = Arc::new(FailingCacheStore::new().failing_store());
        let result = engine
            .run_with_cache(
                &definition(CI_PIPELINE),
                &main_trigger(),
                cache,
                &CancellationToken::new(),
            )
            .await;

        assert_outcome(&result, RunOutcome::Failed);
        assert!(matches!(
            result.job("compile").unwrap().failure,
            Some(FailureReason::CacheStoreFailed { .. })
        ));
        assert_job_status(&result, "unit_test", JobStatus::Canceled);
        assert_job_status(&result, "sweep", JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_store_failure_without_consumer_is_a_warning() {
        let engine = Engine::new(
            EngineConfig::default(),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(StaticWorkerPool::uniform(1, &[])),
        )
        .unwrap();
        let cache: Arc<dyn CacheStore> = Arc::new(FailingCacheStore::new().failing_store());
        let source = r#"
stages: [build]
jobs:
  - name: compile
    stage: build
    script: make
    cache: { key: deps, paths: [target/] }
"#;
        let result = engine
            .run_with_cache(&definition(source), &main_trigger(), cache, &CancellationToken::new())
            .await;

        assert_outcome(&result, RunOutcome::Succeeded);
        assert!(!result.job("compile").unwrap().cache.as_ref().unwrap().stored);
    }

    #[tokio::test]
    async fn test_fetch_failure_runs_cold() {
        let engine = Engine::new(
            EngineConfig::default(),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(StaticWorkerPool::uniform(2, &[])),
        )
        .unwrap();
        let cache: Arc<dyn CacheStore> = Arc::new(FailingCacheStore::new().failing_fetch());
        let result = engine
            .run_with_cache(
                &definition(CI_PIPELINE),
                &main_trigger(),
                cache,
                &CancellationToken::new(),
            )
            .await;

        assert_outcome(&result, RunOutcome::Succeeded);
        assert!(!result.job("unit_test").unwrap().cache.as_ref().unwrap().hit);
    }

    #[tokio::test]
    async fn test_max_parallel_jobs() {
        let harness = TestHarness::with_config(
            ScriptedExecutor::new().with_default_delay(Duration::from_millis(15)),
            4,
            fast_config().with_max_parallel_jobs(2),
        );
        let result = harness
            .run(
                r#"
stages: [test]
jobs:
  - { name: a, stage: test, script: "true" }
  - { name: b, stage: test, script: "true" }
  - { name: c, stage: test, script: "true" }
  - { name: d, stage: test, script: "true" }
  - { name: e, stage: test, script: "true" }
"#,
                &main_trigger(),
            )
            .await;

        assert_outcome(&result, RunOutcome::Succeeded);
        assert_eq!(harness.executor.calls().len(), 5);
        assert!(harness.executor.max_concurrency() <= 2);
    }

    #[tokio::test]
    async fn test_event_order() {
        let harness = TestHarness::new(ScriptedExecutor::new(), 1);
        harness.run(CI_PIPELINE, &main_trigger()).await;

        let types = harness.events.event_types();
        assert_eq!(types.first().map(String::as_str), Some(RUN_STARTED));
        assert_eq!(types.last().map(String::as_str), Some(RUN_COMPLETED));

        let position = |event_type: &str, job: &str| {
            harness
                .events
                .events()
                .iter()
                .position(|e| e.event_type == event_type && e.str_field("job") == Some(job))
                .unwrap()
        };
        assert!(position(JOB_STARTED, "compile") < position(CACHE_FETCHED, "compile"));
        assert!(position(CACHE_FETCHED, "compile") < position(CACHE_STORED, "compile"));
        assert!(position(CACHE_STORED, "compile") < position(JOB_SUCCEEDED, "compile"));
        assert!(position(JOB_SUCCEEDED, "compile") < position(JOB_STARTED, "unit_test"));
        assert!(harness.events.events_of_type(JOB_CANCELED).is_empty());
    }

    #[tokio::test]
    async fn test_predefined_variables_reach_executor() {
        let harness = TestHarness::new(ScriptedExecutor::new(), 1);
        harness
            .run(CI_PIPELINE, &crate::core::Trigger::branch("feature/x", "abcdef123456"))
            .await;

        let call = harness.executor.call("compile").unwrap();
        assert_eq!(call.variables["CI_COMMIT_SHA"], "abcdef123456");
        assert_eq!(call.variables["CI_COMMIT_SHORT_SHA"], "abcdef12");
        assert_eq!(call.variables["CI_COMMIT_REF_SLUG"], "feature-x");
    }
}
