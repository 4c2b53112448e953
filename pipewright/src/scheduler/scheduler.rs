//! Central scheduling loop.
//!
//! One loop per run owns every job record. Dispatched jobs run as spawned
//! tasks collected in a `FuturesUnordered`; the loop wakes on a job
//! completion, a poll tick while jobs wait for workers, or cancellation.

use super::failure::{FailureAction, FailureController};
use super::state::JobRecord;
use crate::cache::CacheManager;
use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::core::{
    CacheActivity, FailureReason, JobResult, JobStatus, PipelineEvent, RunResult, Trigger,
    WhenPolicy,
};
use crate::events::EventSink;
use crate::executor::{ExecutionRequest, JobExecutor};
use crate::pipeline::{depends_on, JobSpec};
use crate::plan::{run_variables, ExecutionPlan};
use crate::utils::{elapsed_ms, generate_run_id, now_utc};
use crate::workers::{WorkerHandle, WorkerPool};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

type JobFuture = BoxFuture<'static, (usize, Result<JobOutcome, JoinError>)>;

/// What a job task reports back to the loop.
#[derive(Debug, Default)]
struct JobOutcome {
    status: JobStatus,
    exit_code: Option<i32>,
    logs: String,
    failure: Option<FailureReason>,
    reason: Option<String>,
    cache: Option<CacheActivity>,
}

impl JobOutcome {
    fn failed(failure: FailureReason) -> Self {
        Self {
            status: JobStatus::Failed,
            failure: Some(failure),
            ..Self::default()
        }
    }
}

/// Everything a spawned job task owns.
struct JobContext {
    spec: Arc<JobSpec>,
    worker: WorkerHandle,
    trigger: Trigger,
    cache_key: Option<String>,
    has_downstream_consumer: bool,
    timeout: Option<Duration>,
    executor: Arc<dyn JobExecutor>,
    cache: CacheManager,
    events: Arc<dyn EventSink>,
}

struct RunState {
    records: Vec<JobRecord>,
    positions: HashMap<String, usize>,
    controller: FailureController,
}

impl RunState {
    fn new(plan: &ExecutionPlan) -> Self {
        let mut records = Vec::with_capacity(plan.definition.job_count());
        for bucket in &plan.buckets {
            records.extend(bucket.jobs.iter().map(JobRecord::planned));
            records.extend(bucket.excluded.iter().map(JobRecord::excluded));
        }
        let positions = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.spec.name.clone(), i))
            .collect();
        Self {
            records,
            positions,
            controller: FailureController::new(),
        }
    }

    fn pending_where(&self, pred: impl Fn(&JobRecord) -> bool) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status() == JobStatus::Pending && pred(r))
            .map(|(i, _)| i)
            .collect()
    }

    fn all_terminal(&self) -> bool {
        self.records.iter().all(JobRecord::is_terminal)
    }

    /// Non-exempt jobs wait for the non-exempt jobs of earlier stages;
    /// exempt jobs wait for every job of earlier stages.
    fn barrier_open(&self, idx: usize) -> bool {
        let job = &self.records[idx].spec;
        let exempt = job.is_exempt();
        self.records
            .iter()
            .filter(|r| r.spec.stage_index < job.stage_index)
            .filter(|r| exempt || !r.spec.is_exempt())
            .all(JobRecord::is_terminal)
    }

    fn needs_settled(&self, idx: usize) -> bool {
        self.records[idx].spec.needs.iter().all(|need| {
            self.positions
                .get(need)
                .map_or(true, |&i| self.records[i].is_terminal())
        })
    }
}

/// Dispatches planned jobs to workers and drives them to terminal states.
pub struct Scheduler {
    config: EngineConfig,
    executor: Arc<dyn JobExecutor>,
    workers: Arc<dyn WorkerPool>,
    events: Arc<dyn EventSink>,
}

impl Scheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        executor: Arc<dyn JobExecutor>,
        workers: Arc<dyn WorkerPool>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            executor,
            workers,
            events,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs every job of the plan to a terminal state.
    ///
    /// Job-level errors never abort the loop; each one ends up as a terminal
    /// job status in the returned result.
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        cache: CacheManager,
        cancel: &CancellationToken,
    ) -> RunResult {
        let run_id = generate_run_id();
        let span = info_span!(
            "pipeline.run",
            run_id = %run_id,
            pipeline = %plan.definition.name,
            ref_name = %plan.trigger.ref_name
        );
        self.run_inner(run_id, plan, cache, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        plan: &ExecutionPlan,
        cache: CacheManager,
        cancel: &CancellationToken,
    ) -> RunResult {
        let started_at = now_utc();
        let started = Instant::now();
        self.events
            .emit(&PipelineEvent::run_started(
                &run_id.to_string(),
                &plan.trigger.ref_name,
                &plan.trigger.commit_sha,
            ))
            .await;
        info!(
            jobs = plan.planned_count(),
            commit_sha = %plan.trigger.commit_sha,
            "Pipeline run started"
        );

        let mut state = RunState::new(plan);
        for idx in 0..state.records.len() {
            if plan.is_excluded(state.records[idx].name()) {
                let reason = state.records[idx]
                    .spec
                    .filter
                    .rejection_reason(&plan.trigger);
                self.settle_pending(&mut state, idx, JobStatus::Skipped, reason, None)
                    .await;
            }
        }

        let mut running: FuturesUnordered<JobFuture> = FuturesUnordered::new();
        loop {
            if cancel.is_cancelled() && !state.controller.is_canceled() {
                self.cancel_run(&mut state, cancel).await;
            }

            let waiting = self.dispatch(&mut state, plan, &cache, &mut running).await;

            if state.all_terminal() {
                break;
            }

            if running.is_empty() && !waiting {
                error!("Scheduler stalled with unfinished jobs, canceling the rest");
                for idx in state.pending_where(|_| true) {
                    self.cancel_pending(&mut state, idx, "scheduler stalled".to_string())
                        .await;
                }
                break;
            }

            tokio::select! {
                Some((idx, joined)) = running.next(), if !running.is_empty() => {
                    let outcome = joined.unwrap_or_else(|e| {
                        JobOutcome::failed(FailureReason::Executor {
                            message: format!("job task aborted: {e}"),
                        })
                    });
                    self.finish(&mut state, idx, outcome).await;
                }
                () = tokio::time::sleep(self.config.poll_interval()), if waiting => {}
                () = cancel.cancelled(), if !state.controller.is_canceled() => {}
                else => {}
            }
        }

        if self.config.evict_caches_on_completion {
            let keys = plan.cache_keys();
            let evicted = cache.sweep(keys.iter().map(String::as_str)).await;
            debug!(evicted, "Run caches evicted");
        }

        let outcome = state.controller.outcome();
        let duration_ms = elapsed_ms(started);
        let jobs: Vec<JobResult> = state.records.into_iter().map(|r| r.result).collect();

        self.events
            .emit(&PipelineEvent::run_completed(
                &run_id.to_string(),
                &outcome.to_string(),
                duration_ms,
            ))
            .await;
        info!(
            outcome = %outcome,
            duration_ms,
            succeeded = jobs.iter().filter(|j| j.status == JobStatus::Succeeded).count(),
            failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count(),
            "Pipeline run completed"
        );

        RunResult {
            run_id,
            pipeline: plan.definition.name.clone(),
            trigger: plan.trigger.clone(),
            outcome,
            jobs,
            warnings: plan.warnings.clone(),
            started_at,
            finished_at: now_utc(),
            duration_ms,
        }
    }

    /// Starts every job that can start. Returns true if some job is
    /// waiting for a worker.
    async fn dispatch(
        &self,
        state: &mut RunState,
        plan: &ExecutionPlan,
        cache: &CacheManager,
        running: &mut FuturesUnordered<JobFuture>,
    ) -> bool {
        let mut waiting = false;

        for idx in 0..state.records.len() {
            if state.records[idx].status() != JobStatus::Pending
                || !state.barrier_open(idx)
                || !state.needs_settled(idx)
            {
                continue;
            }

            let spec = Arc::clone(&state.records[idx].spec);
            if spec.when == WhenPolicy::OnFailure && !state.controller.run_failed() {
                self.settle_pending(
                    state,
                    idx,
                    JobStatus::Skipped,
                    "run has not failed".to_string(),
                    None,
                )
                .await;
                continue;
            }

            if running.len() >= self.config.max_parallel_jobs {
                continue;
            }

            match self.workers.acquire(&spec.tags) {
                Ok(worker) => self.start(state, idx, worker, plan, cache, running).await,
                Err(unavailable) => {
                    let record = &mut state.records[idx];
                    let since = *record.waiting_since.get_or_insert_with(|| {
                        info!(job = %spec.name, reason = %unavailable, "Job waiting for a worker");
                        Instant::now()
                    });
                    if since.elapsed() >= self.config.worker_timeout() {
                        let waited_ms = elapsed_ms(since);
                        self.settle_pending(
                            state,
                            idx,
                            JobStatus::Failed,
                            unavailable.to_string(),
                            Some(FailureReason::WorkerTimeout { waited_ms }),
                        )
                        .await;
                    } else {
                        waiting = true;
                    }
                }
            }
        }
        waiting
    }

    async fn start(
        &self,
        state: &mut RunState,
        idx: usize,
        worker: WorkerHandle,
        plan: &ExecutionPlan,
        cache: &CacheManager,
        running: &mut FuturesUnordered<JobFuture>,
    ) {
        let record = &mut state.records[idx];
        if let Err(e) = record.transition(JobStatus::Running) {
            error!(error = %e, "Cannot start job");
            self.workers.release(worker);
            return;
        }
        record.waiting_since = None;
        record.result.worker = Some(worker.id.clone());
        record.worker = Some(worker.clone());

        let spec = Arc::clone(&record.spec);
        self.events
            .emit(&PipelineEvent::job_started(&spec.name, &spec.stage, &worker.id))
            .await;
        info!(job = %spec.name, stage = %spec.stage, worker = %worker.id, "Job started");

        let span = info_span!(
            "pipeline.job",
            job = %spec.name,
            stage = %spec.stage,
            worker = %worker.id
        );
        let context = JobContext {
            timeout: self.config.job_timeout(spec.timeout_secs),
            spec,
            worker,
            trigger: plan.trigger.clone(),
            cache_key: record.cache_key.clone(),
            has_downstream_consumer: record.has_downstream_consumer,
            executor: Arc::clone(&self.executor),
            cache: cache.clone(),
            events: Arc::clone(&self.events),
        };

        let handle = tokio::spawn(run_job(context).instrument(span));
        running.push(Box::pin(async move { (idx, handle.await) }));
    }

    /// Applies a job task's outcome.
    async fn finish(&self, state: &mut RunState, idx: usize, outcome: JobOutcome) {
        let record = &mut state.records[idx];
        if let Some(worker) = record.worker.take() {
            self.workers.release(worker);
        }

        record.result.exit_code = outcome.exit_code;
        record.result.logs = outcome.logs;
        record.result.failure = outcome.failure;
        record.result.reason = outcome.reason;
        record.result.cache = outcome.cache;
        if let Err(e) = record.transition(outcome.status) {
            error!(error = %e, "Dropping job outcome");
            return;
        }
        self.conclude(state, idx).await;
    }

    /// Moves a pending job straight to a terminal state.
    async fn settle_pending(
        &self,
        state: &mut RunState,
        idx: usize,
        to: JobStatus,
        reason: String,
        failure: Option<FailureReason>,
    ) {
        let record = &mut state.records[idx];
        record.waiting_since = None;
        record.result.reason = Some(reason);
        record.result.failure = failure;
        if let Err(e) = record.transition(to) {
            error!(error = %e, "Cannot settle pending job");
            return;
        }
        self.conclude(state, idx).await;
    }

    /// Reports a terminal job and propagates its failure.
    async fn conclude(&self, state: &mut RunState, idx: usize) {
        self.emit_terminal(&state.records[idx].result).await;

        let stage_index = state.records[idx].spec.stage_index;
        let action = state.controller.observe(&state.records[idx].result, stage_index);
        if let FailureAction::CancelDownstream { job, stage_index } = action {
            let graph: HashMap<&str, &[String]> = state
                .records
                .iter()
                .map(|r| (r.spec.name.as_str(), r.spec.needs.as_slice()))
                .collect();
            let targets = state.pending_where(|r| {
                !r.spec.is_exempt()
                    && (r.spec.stage_index > stage_index || depends_on(&r.spec.name, &job, &graph))
            });

            if !targets.is_empty() {
                warn!(job = %job, canceled = targets.len(), "Job failed, canceling downstream jobs");
            }
            for target in targets {
                self.cancel_pending(state, target, format!("upstream job '{job}' failed"))
                    .await;
            }
        }
    }

    async fn cancel_pending(&self, state: &mut RunState, idx: usize, reason: String) {
        let record = &mut state.records[idx];
        record.waiting_since = None;
        record.result.reason = Some(reason);
        match record.transition(JobStatus::Canceled) {
            Ok(()) => self.emit_terminal(&record.result).await,
            Err(e) => error!(error = %e, "Cannot cancel job"),
        }
    }

    async fn cancel_run(&self, state: &mut RunState, cancel: &CancellationToken) {
        let reason = cancel.reason().unwrap_or_else(|| "canceled".to_string());
        warn!(reason = %reason, "Pipeline run canceled");
        state.controller.cancel(reason.clone());

        for idx in state.pending_where(|r| !r.spec.is_exempt()) {
            self.cancel_pending(state, idx, format!("run canceled: {reason}"))
                .await;
        }
    }

    async fn emit_terminal(&self, result: &JobResult) {
        let reason = result.reason.clone().unwrap_or_default();
        let event = match result.status {
            JobStatus::Succeeded => {
                info!(job = %result.name, duration_ms = result.duration_ms, "Job succeeded");
                PipelineEvent::job_succeeded(&result.name, result.duration_ms)
            }
            JobStatus::Failed => {
                let failure = result
                    .failure
                    .as_ref()
                    .map_or_else(|| reason.clone(), ToString::to_string);
                if result.allow_failure {
                    warn!(job = %result.name, failure = %failure, "Job failed (allowed)");
                } else {
                    warn!(job = %result.name, failure = %failure, "Job failed");
                }
                PipelineEvent::job_failed(&result.name, &failure, result.allow_failure)
            }
            JobStatus::Skipped => {
                info!(job = %result.name, reason = %reason, "Job skipped");
                PipelineEvent::job_skipped(&result.name, &reason)
            }
            JobStatus::Canceled => {
                info!(job = %result.name, reason = %reason, "Job canceled");
                PipelineEvent::job_canceled(&result.name, &reason)
            }
            JobStatus::Pending | JobStatus::Running => return,
        };
        self.events.emit(&event).await;
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Body of a dispatched job: cache pull, scripts, cache push.
async fn run_job(context: JobContext) -> JobOutcome {
    let JobContext {
        spec,
        worker,
        trigger,
        cache_key,
        has_downstream_consumer,
        timeout,
        executor,
        cache,
        events,
    } = context;

    if !spec.filter.admits(&trigger) {
        return JobOutcome {
            status: JobStatus::Skipped,
            reason: Some(spec.filter.rejection_reason(&trigger)),
            ..JobOutcome::default()
        };
    }

    let mut activity = cache_key.as_ref().map(|key| CacheActivity {
        key: key.clone(),
        ..CacheActivity::default()
    });

    let snapshot = match (&cache_key, spec.cache_policy()) {
        (Some(key), Some(policy)) => {
            let snapshot = cache.pull(&spec.name, key, policy).await;
            if let (Some(snapshot), Some(activity)) = (&snapshot, activity.as_mut()) {
                activity.fetched = true;
                activity.hit = snapshot.is_hit();
                events
                    .emit(&PipelineEvent::cache_fetched(&spec.name, key, snapshot.is_hit()))
                    .await;
            }
            snapshot
        }
        _ => None,
    };

    let request = ExecutionRequest {
        variables: run_variables(&spec, &trigger),
        job: Arc::clone(&spec),
        worker,
        trigger,
        cache: snapshot,
        timeout,
    };

    let report = match executor.execute(&request).await {
        Ok(report) => report,
        Err(e) => {
            return JobOutcome {
                logs: e.logs().to_string(),
                cache: activity,
                ..JobOutcome::failed(FailureReason::Executor {
                    message: e.to_string(),
                })
            };
        }
    };

    if !report.succeeded() {
        return JobOutcome {
            status: JobStatus::Failed,
            exit_code: Some(report.exit_code),
            logs: report.logs,
            failure: Some(FailureReason::ScriptFailed {
                exit_code: report.exit_code,
            }),
            reason: None,
            cache: activity,
        };
    }

    if let (Some(key), Some(declared)) = (&cache_key, &spec.cache) {
        match cache
            .push(&spec.name, key, &declared.paths, declared.policy)
            .await
        {
            Ok(Some(_)) => {
                if let Some(activity) = activity.as_mut() {
                    activity.stored = true;
                }
                events
                    .emit(&PipelineEvent::cache_stored(&spec.name, key, declared.paths.len()))
                    .await;
            }
            Ok(None) => {}
            Err(e) if has_downstream_consumer => {
                return JobOutcome {
                    status: JobStatus::Failed,
                    exit_code: Some(report.exit_code),
                    logs: report.logs,
                    failure: Some(FailureReason::CacheStoreFailed {
                        message: e.to_string(),
                    }),
                    reason: None,
                    cache: activity,
                };
            }
            Err(e) => {
                warn!(job = %spec.name, key = %key, error = %e, "Cache store failed, no later job needs it");
            }
        }
    }

    JobOutcome {
        status: JobStatus::Succeeded,
        exit_code: Some(report.exit_code),
        logs: report.logs,
        failure: None,
        reason: None,
        cache: activity,
    }
}
