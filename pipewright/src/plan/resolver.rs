//! Turns a definition and a trigger into an execution plan.

use super::{ExecutionPlan, PlannedJob, StageBucket};
use crate::core::Trigger;
use crate::pipeline::{depends_on, JobSpec, PipelineDefinition};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Returns the variables a job sees in a run.
///
/// Pipeline and job variables are overlaid with the trigger's predefined
/// `CI_*` variables.
#[must_use]
pub fn run_variables(spec: &JobSpec, trigger: &Trigger) -> BTreeMap<String, String> {
    let mut variables = spec.variables.clone();
    variables.extend(trigger.variables());
    variables
}

/// Builds the execution plan for a trigger.
///
/// Jobs whose `only` / `except` filters reject the ref are kept as excluded
/// entries. Remaining jobs are bucketed per stage in declaration order, with
/// `needs` predecessors moved ahead of their dependents.
#[must_use]
pub fn resolve(definition: &Arc<PipelineDefinition>, trigger: &Trigger) -> ExecutionPlan {
    let graph: HashMap<&str, &[String]> = definition
        .jobs
        .iter()
        .map(|j| (j.name.as_str(), j.needs.as_slice()))
        .collect();

    let mut buckets: Vec<StageBucket> = definition
        .stages
        .iter()
        .enumerate()
        .map(|(index, stage)| StageBucket {
            stage: stage.clone(),
            index,
            jobs: Vec::new(),
            excluded: Vec::new(),
        })
        .collect();

    for job in &definition.jobs {
        let bucket = &mut buckets[job.stage_index];
        if job.filter.admits(trigger) {
            let cache_key = job
                .cache
                .as_ref()
                .map(|c| c.key.expand(&run_variables(job, trigger)));
            bucket.jobs.push(PlannedJob {
                spec: Arc::clone(job),
                cache_key,
                has_downstream_consumer: false,
            });
        } else {
            debug!(
                job = %job.name,
                reason = %job.filter.rejection_reason(trigger),
                "Job excluded from plan"
            );
            bucket.excluded.push(Arc::clone(job));
        }
    }

    for bucket in &mut buckets {
        bucket.jobs = order_by_needs(std::mem::take(&mut bucket.jobs));
    }

    mark_downstream_consumers(&mut buckets, &graph);
    let warnings = collect_warnings(&buckets, &graph);
    for warning in &warnings {
        warn!(pipeline = %definition.name, "{}", warning);
    }

    ExecutionPlan {
        definition: Arc::clone(definition),
        trigger: trigger.clone(),
        buckets,
        warnings,
    }
}

/// Stable reorder: repeatedly take the first job whose in-bucket needs are placed.
fn order_by_needs(jobs: Vec<PlannedJob>) -> Vec<PlannedJob> {
    let in_bucket: HashSet<String> = jobs.iter().map(|j| j.spec.name.clone()).collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut remaining = jobs;
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .position(|j| {
                j.spec
                    .needs
                    .iter()
                    .all(|n| !in_bucket.contains(n) || placed.contains(n))
            })
            .unwrap_or(0);
        let job = remaining.remove(next);
        placed.insert(job.spec.name.clone());
        ordered.push(job);
    }
    ordered
}

/// True if `reader` runs after `writer` for certain.
fn runs_after(reader: &JobSpec, writer: &JobSpec, graph: &HashMap<&str, &[String]>) -> bool {
    reader.stage_index > writer.stage_index
        || (reader.stage_index == writer.stage_index
            && depends_on(&reader.name, &writer.name, graph))
}

fn mark_downstream_consumers(buckets: &mut [StageBucket], graph: &HashMap<&str, &[String]>) {
    let readers: Vec<(Arc<JobSpec>, String)> = buckets
        .iter()
        .flat_map(|b| b.jobs.iter())
        .filter(|j| j.spec.cache_policy().is_some_and(|p| p.pulls()))
        .filter_map(|j| j.cache_key.clone().map(|k| (Arc::clone(&j.spec), k)))
        .collect();

    for job in buckets.iter_mut().flat_map(|b| b.jobs.iter_mut()) {
        if !job.spec.writes_cache() {
            continue;
        }
        let Some(key) = job.cache_key.as_deref() else {
            continue;
        };
        job.has_downstream_consumer = readers
            .iter()
            .any(|(reader, k)| k == key && runs_after(reader, &job.spec, graph));
    }
}

fn collect_warnings(buckets: &[StageBucket], graph: &HashMap<&str, &[String]>) -> Vec<String> {
    let mut warnings = Vec::new();
    let writers: Vec<&PlannedJob> = buckets
        .iter()
        .flat_map(|b| b.jobs.iter())
        .filter(|j| j.spec.writes_cache())
        .collect();

    for bucket in buckets {
        let stage_writers: Vec<&&PlannedJob> = writers
            .iter()
            .filter(|w| w.spec.stage_index == bucket.index)
            .collect();
        for (i, a) in stage_writers.iter().enumerate() {
            for b in &stage_writers[i + 1..] {
                let ordered = depends_on(&a.spec.name, &b.spec.name, graph)
                    || depends_on(&b.spec.name, &a.spec.name, graph);
                if a.cache_key == b.cache_key && !ordered {
                    warnings.push(format!(
                        "Jobs '{}' and '{}' in stage '{}' both write cache key '{}'; the last to finish wins",
                        a.name(),
                        b.name(),
                        bucket.stage,
                        a.cache_key.as_deref().unwrap_or_default()
                    ));
                }
            }
        }

        for reader in bucket.jobs.iter().filter(|j| j.spec.pulls_only()) {
            let Some(key) = reader.cache_key.as_deref() else {
                continue;
            };
            let produced = writers.iter().any(|w| {
                w.cache_key.as_deref() == Some(key) && runs_after(&reader.spec, &w.spec, graph)
            });
            let racing = stage_writers.iter().find(|w| {
                w.cache_key.as_deref() == Some(key)
                    && !depends_on(&w.spec.name, &reader.spec.name, graph)
                    && !runs_after(&reader.spec, &w.spec, graph)
            });
            if let Some(writer) = racing {
                warnings.push(format!(
                    "Job '{}' pulls cache key '{}' while '{}' in the same stage writes it; the read races the write",
                    reader.name(),
                    key,
                    writer.name()
                ));
            } else if !produced {
                warnings.push(format!(
                    "Job '{}' pulls cache key '{}' that no earlier job writes",
                    reader.name(),
                    key
                ));
            }
        }
    }
    warnings
}
