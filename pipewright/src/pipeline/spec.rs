//! Validated, immutable pipeline definition.

use super::filters::RefFilter;
use crate::cache::CacheKeyTemplate;
use crate::core::{CachePolicy, WhenPolicy, PREDEFINED_VARIABLES};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Cache declaration of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSpec {
    /// Key template, expanded per run.
    pub key: CacheKeyTemplate,
    /// Cached path patterns.
    pub paths: Vec<String>,
    /// Pull/push policy.
    pub policy: CachePolicy,
}

/// Specification for a single job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// The unique name of the job.
    pub name: String,
    /// The stage the job belongs to.
    pub stage: String,
    /// Position of the stage in the pipeline's stage order.
    pub stage_index: usize,
    /// Position of the job in declaration order.
    pub index: usize,
    /// Commands run before the script.
    pub before_script: Vec<String>,
    /// Script commands.
    pub script: Vec<String>,
    /// Commands run after the script regardless of its outcome.
    pub after_script: Vec<String>,
    /// Cache declaration.
    pub cache: Option<CacheSpec>,
    /// Branch filters.
    pub filter: RefFilter,
    /// Tags a worker must carry to run this job.
    pub tags: BTreeSet<String>,
    /// When the job runs.
    pub when: WhenPolicy,
    /// Whether failure is tolerated.
    pub allow_failure: bool,
    /// Jobs that must be terminal before this one starts.
    pub needs: Vec<String>,
    /// Job timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Pipeline variables merged with job variables.
    pub variables: BTreeMap<String, String>,
}

impl JobSpec {
    /// Creates a job with a script and defaults for everything else.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        stage: impl Into<String>,
        script: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            stage_index: 0,
            index: 0,
            before_script: Vec::new(),
            script: script.into_iter().map(Into::into).collect(),
            after_script: Vec::new(),
            cache: None,
            filter: RefFilter::default(),
            tags: BTreeSet::new(),
            when: WhenPolicy::OnSuccess,
            allow_failure: false,
            needs: Vec::new(),
            timeout_secs: None,
            variables: BTreeMap::new(),
        }
    }

    /// Returns true if the job is exempt from failure cancellation.
    #[must_use]
    pub fn is_exempt(&self) -> bool {
        self.when.is_exempt()
    }

    /// Returns the cache policy, if the job declares a cache.
    #[must_use]
    pub fn cache_policy(&self) -> Option<CachePolicy> {
        self.cache.as_ref().map(|c| c.policy)
    }

    /// Returns true if the job writes its cache after success.
    #[must_use]
    pub fn writes_cache(&self) -> bool {
        self.cache_policy().is_some_and(|p| p.pushes())
    }

    /// Returns true if the job only reads its cache.
    #[must_use]
    pub fn pulls_only(&self) -> bool {
        self.cache_policy() == Some(CachePolicy::Pull)
    }

    /// Returns the cache key with the job's own variables substituted.
    ///
    /// Predefined `CI_*` references stay symbolic since they are only known
    /// per run.
    #[must_use]
    pub fn bound_cache_key(&self) -> Option<CacheKeyTemplate> {
        self.cache.as_ref().map(|c| {
            c.key.bind(|name| {
                if PREDEFINED_VARIABLES.contains(&name) {
                    None
                } else {
                    self.variables.get(name).map(String::as_str)
                }
            })
        })
    }

    /// Returns true if both jobs' caches resolve to the same key in every run.
    #[must_use]
    pub fn shares_cache_key(&self, other: &Self) -> bool {
        match (self.bound_cache_key(), other.bound_cache_key()) {
            (Some(a), Some(b)) => a.same_key(&b),
            _ => false,
        }
    }

    /// Returns every command in execution order.
    pub fn all_steps(&self) -> impl Iterator<Item = &String> {
        self.before_script
            .iter()
            .chain(self.script.iter())
            .chain(self.after_script.iter())
    }
}

/// A validated pipeline definition.
///
/// Produced by [`DescriptorStore`](super::DescriptorStore) and shared
/// read-only with the resolver and scheduler.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// The pipeline name.
    pub name: String,
    /// Ordered stage names.
    pub stages: Vec<String>,
    /// Jobs in declaration order.
    pub jobs: Vec<Arc<JobSpec>>,
    /// Pipeline-level variables.
    pub variables: BTreeMap<String, String>,
    /// SHA-256 digest of the source document.
    pub digest: String,
}

impl PipelineDefinition {
    /// Returns a job by name.
    #[must_use]
    pub fn job(&self, name: &str) -> Option<&Arc<JobSpec>> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Returns the position of a stage.
    #[must_use]
    pub fn stage_index(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s == stage)
    }

    /// Returns the jobs of one stage in declaration order.
    pub fn jobs_in_stage(&self, stage_index: usize) -> impl Iterator<Item = &Arc<JobSpec>> {
        self.jobs.iter().filter(move |j| j.stage_index == stage_index)
    }

    /// Returns the number of jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}
