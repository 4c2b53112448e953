//! Execution plan types.

use crate::core::Trigger;
use crate::pipeline::{JobSpec, PipelineDefinition};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A job admitted into the plan.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    /// The job definition.
    pub spec: Arc<JobSpec>,
    /// The cache key expanded for this run.
    pub cache_key: Option<String>,
    /// Whether a later job pulls the key this job writes.
    pub has_downstream_consumer: bool,
}

impl PlannedJob {
    /// Returns the job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// The jobs of one stage.
#[derive(Debug, Clone)]
pub struct StageBucket {
    /// The stage name.
    pub stage: String,
    /// Position of the stage.
    pub index: usize,
    /// Jobs eligible for dispatch, `needs` predecessors first.
    pub jobs: Vec<PlannedJob>,
    /// Jobs the branch filters excluded for this trigger.
    pub excluded: Vec<Arc<JobSpec>>,
}

impl StageBucket {
    /// Returns true if the bucket has no dispatchable jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Returns the number of dispatchable jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }
}

/// An ordered list of stage buckets for one trigger.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// The definition the plan was built from.
    pub definition: Arc<PipelineDefinition>,
    /// The triggering ref.
    pub trigger: Trigger,
    /// One bucket per stage, in stage order.
    pub buckets: Vec<StageBucket>,
    /// Non-fatal findings from planning.
    pub warnings: Vec<String>,
}

impl ExecutionPlan {
    /// Iterates over admitted jobs in dispatch order.
    pub fn planned_jobs(&self) -> impl Iterator<Item = &PlannedJob> {
        self.buckets.iter().flat_map(|b| b.jobs.iter())
    }

    /// Iterates over excluded jobs.
    pub fn excluded_jobs(&self) -> impl Iterator<Item = &Arc<JobSpec>> {
        self.buckets.iter().flat_map(|b| b.excluded.iter())
    }

    /// Returns an admitted job by name.
    #[must_use]
    pub fn planned_job(&self, name: &str) -> Option<&PlannedJob> {
        self.planned_jobs().find(|j| j.name() == name)
    }

    /// Returns true if the job was excluded by its filters.
    #[must_use]
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded_jobs().any(|j| j.name == name)
    }

    /// Returns every expanded cache key used by admitted jobs.
    #[must_use]
    pub fn cache_keys(&self) -> BTreeSet<String> {
        self.planned_jobs()
            .filter_map(|j| j.cache_key.clone())
            .collect()
    }

    /// Returns the number of admitted jobs.
    #[must_use]
    pub fn planned_count(&self) -> usize {
        self.buckets.iter().map(StageBucket::len).sum()
    }

    /// Renders the plan as JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "pipeline": self.definition.name,
            "ref": self.trigger.ref_name,
            "ref_kind": self.trigger.ref_kind.to_string(),
            "stages": self.buckets.iter().map(|b| json!({
                "stage": b.stage,
                "jobs": b.jobs.iter().map(|j| json!({
                    "name": j.name(),
                    "when": j.spec.when.to_string(),
                    "needs": j.spec.needs,
                    "cache_key": j.cache_key,
                })).collect::<Vec<_>>(),
                "excluded": b.excluded.iter().map(|j| j.name.clone()).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
            "warnings": self.warnings,
        })
    }
}
