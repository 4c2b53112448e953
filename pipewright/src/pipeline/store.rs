//! Job descriptor store: parses and validates pipeline definitions.

use super::document::{CacheDocument, Commands, DefaultsDocument, DocumentFormat, JobDocument, PipelineDocument};
use super::filters::{RefFilter, RefPattern};
use super::spec::{CacheSpec, JobSpec, PipelineDefinition};
use crate::cache::CacheKeyTemplate;
use crate::core::PREDEFINED_VARIABLES;
use crate::errors::{DescriptorError, PipewrightError};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Name used when a document does not name its pipeline.
pub const DEFAULT_PIPELINE_NAME: &str = "pipeline";

/// Parses pipeline documents into validated, shared definitions.
///
/// Definitions are cached by the SHA-256 digest of their source text, so
/// loading the same document twice returns the same `Arc`.
#[derive(Debug, Default)]
pub struct DescriptorStore {
    definitions: DashMap<String, Arc<PipelineDefinition>>,
}

impl DescriptorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a document, detecting its format from the text.
    ///
    /// # Errors
    ///
    /// Returns a `DescriptorError` if the document is malformed.
    pub fn load_str(&self, source: &str) -> Result<Arc<PipelineDefinition>, DescriptorError> {
        self.load(source, DocumentFormat::detect(source))
    }

    /// Loads a document in the given format.
    ///
    /// # Errors
    ///
    /// Returns a `DescriptorError` if the document is malformed.
    pub fn load(
        &self,
        source: &str,
        format: DocumentFormat,
    ) -> Result<Arc<PipelineDefinition>, DescriptorError> {
        let digest = source_digest(source);
        if let Some(existing) = self.definitions.get(&digest) {
            debug!(digest = %digest, "Pipeline definition served from store");
            return Ok(Arc::clone(existing.value()));
        }

        let document = PipelineDocument::parse(source, format)?;
        let definition = Arc::new(build_definition(document, digest.clone())?);

        info!(
            pipeline = %definition.name,
            stages = definition.stages.len(),
            jobs = definition.jobs.len(),
            digest = %digest,
            "Loaded pipeline definition"
        );

        self.definitions.insert(digest, Arc::clone(&definition));
        Ok(definition)
    }

    /// Reads and loads a document from disk.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or a descriptor error.
    pub fn load_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Arc<PipelineDefinition>, PipewrightError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        Ok(self.load(&source, DocumentFormat::from_path(path))?)
    }

    /// Returns a previously loaded definition by digest.
    #[must_use]
    pub fn get(&self, digest: &str) -> Option<Arc<PipelineDefinition>> {
        self.definitions.get(digest).map(|d| Arc::clone(d.value()))
    }

    /// Drops a definition from the store.
    pub fn remove(&self, digest: &str) -> Option<Arc<PipelineDefinition>> {
        self.definitions.remove(digest).map(|(_, d)| d)
    }

    /// Returns the number of stored definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if nothing has been loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Returns the hex SHA-256 digest of a document's source text.
#[must_use]
pub fn source_digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Validates a parsed document and builds the definition.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn build_definition(
    document: PipelineDocument,
    digest: String,
) -> Result<PipelineDefinition, DescriptorError> {
    let PipelineDocument {
        name,
        stages,
        variables,
        default,
        jobs,
    } = document;

    if stages.is_empty() {
        return Err(DescriptorError::NoStages);
    }
    let mut stage_positions: HashMap<&str, usize> = HashMap::new();
    for (position, stage) in stages.iter().enumerate() {
        if stage_positions.insert(stage.as_str(), position).is_some() {
            return Err(DescriptorError::DuplicateStage(stage.clone()));
        }
    }

    if jobs.is_empty() {
        return Err(DescriptorError::NoJobs);
    }

    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(jobs.len());
    for (index, job) in jobs.into_iter().enumerate() {
        if job.name.trim().is_empty() {
            return Err(DescriptorError::EmptyJobName(index));
        }
        if !seen.insert(job.name.clone()) {
            return Err(DescriptorError::DuplicateJob(job.name));
        }
        specs.push(build_job(job, index, &stage_positions, &variables, &default)?);
    }

    validate_needs(&specs)?;
    detect_needs_cycles(&specs)?;
    order_cache_pairs(&stages, &mut specs)?;

    Ok(PipelineDefinition {
        name: name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PIPELINE_NAME.to_string()),
        stages,
        jobs: specs.into_iter().map(Arc::new).collect(),
        variables,
        digest,
    })
}

fn build_job(
    job: JobDocument,
    index: usize,
    stage_positions: &HashMap<&str, usize>,
    pipeline_variables: &BTreeMap<String, String>,
    defaults: &DefaultsDocument,
) -> Result<JobSpec, DescriptorError> {
    let JobDocument {
        name,
        stage,
        script,
        before_script,
        after_script,
        cache,
        only,
        except,
        tags,
        when,
        allow_failure,
        needs,
        timeout_secs,
        variables,
    } = job;

    let Some(&stage_index) = stage_positions.get(stage.as_str()) else {
        return Err(DescriptorError::UnknownStage { job: name, stage });
    };

    let script = non_blank(script.into_vec());
    if script.is_empty() {
        return Err(DescriptorError::EmptyScript(name));
    }

    let filter = RefFilter {
        only: parse_patterns(&name, &only)?,
        except: parse_patterns(&name, &except)?,
    };
    if let Some(pattern) = filter.conflict() {
        return Err(DescriptorError::ConflictingFilters {
            job: name.clone(),
            pattern: pattern.to_string(),
        });
    }

    let mut merged_variables = pipeline_variables.clone();
    merged_variables.extend(variables);

    let cache = cache
        .or_else(|| defaults.cache.clone())
        .map(|c| build_cache(&name, c, &merged_variables))
        .transpose()?;

    let mut unique_needs: Vec<String> = Vec::with_capacity(needs.len());
    for need in needs {
        if !unique_needs.contains(&need) {
            unique_needs.push(need);
        }
    }

    Ok(JobSpec {
        name,
        stage,
        stage_index,
        index,
        before_script: inherit_commands(before_script, defaults.before_script.as_ref()),
        script,
        after_script: inherit_commands(after_script, defaults.after_script.as_ref()),
        cache,
        filter,
        tags: tags
            .or_else(|| defaults.tags.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        when,
        allow_failure,
        needs: unique_needs,
        timeout_secs: timeout_secs.or(defaults.timeout_secs),
        variables: merged_variables,
    })
}

fn inherit_commands(own: Option<Commands>, fallback: Option<&Commands>) -> Vec<String> {
    own.or_else(|| fallback.cloned())
        .map(|c| non_blank(c.into_vec()))
        .unwrap_or_default()
}

fn non_blank(commands: Vec<String>) -> Vec<String> {
    commands
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .collect()
}

fn parse_patterns(job: &str, raw: &[String]) -> Result<Vec<RefPattern>, DescriptorError> {
    raw.iter()
        .map(|p| {
            RefPattern::parse(p).map_err(|reason| DescriptorError::invalid_pattern(job, p, reason))
        })
        .collect()
}

fn build_cache(
    job: &str,
    cache: CacheDocument,
    variables: &BTreeMap<String, String>,
) -> Result<CacheSpec, DescriptorError> {
    let key = CacheKeyTemplate::parse(&cache.key)
        .map_err(|reason| DescriptorError::invalid_cache_key(job, &cache.key, reason))?;

    if let Some(undefined) = key
        .variables()
        .find(|v| !PREDEFINED_VARIABLES.contains(v) && !variables.contains_key(*v))
    {
        return Err(DescriptorError::invalid_cache_key(
            job,
            &cache.key,
            format!("variable '{undefined}' is not defined"),
        ));
    }

    let paths = non_blank(cache.paths);
    if paths.is_empty() {
        return Err(DescriptorError::EmptyCachePaths(job.to_string()));
    }

    Ok(CacheSpec {
        key,
        paths,
        policy: cache.policy,
    })
}

fn validate_needs(jobs: &[JobSpec]) -> Result<(), DescriptorError> {
    let by_name: HashMap<&str, &JobSpec> = jobs.iter().map(|j| (j.name.as_str(), j)).collect();

    for job in jobs {
        for need in &job.needs {
            let Some(target) = by_name.get(need.as_str()) else {
                return Err(DescriptorError::UnknownNeed {
                    job: job.name.clone(),
                    need: need.clone(),
                });
            };
            if target.name == job.name || target.stage_index > job.stage_index {
                return Err(DescriptorError::InvalidNeed {
                    job: job.name.clone(),
                    need: need.clone(),
                });
            }
        }
    }
    Ok(())
}

fn detect_needs_cycles(jobs: &[JobSpec]) -> Result<(), DescriptorError> {
    let graph: HashMap<&str, &[String]> = jobs
        .iter()
        .map(|j| (j.name.as_str(), j.needs.as_slice()))
        .collect();
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for job in jobs {
        if !visited.contains(job.name.as_str()) {
            if let Some(cycle) =
                dfs_cycle(job.name.as_str(), &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Err(DescriptorError::NeedsCycle { path: cycle });
            }
        }
    }
    Ok(())
}

fn dfs_cycle<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    let needs: &'a [String] = graph.get(node).copied().unwrap_or(&[]);
    for dep in needs {
        let dep = dep.as_str();
        if !visited.contains(dep) {
            if let Some(cycle) = dfs_cycle(dep, graph, visited, rec_stack, path) {
                return Some(cycle);
            }
        } else if rec_stack.contains(dep) {
            let start = path.iter().position(|n| *n == dep).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|n| (*n).to_string()).collect();
            cycle.push(dep.to_string());
            return Some(cycle);
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}

/// Orders same-stage writer/pull-only pairs that resolve to one cache key.
///
/// A pair already ordered by `needs` is left alone. A writer declared before
/// its reader becomes an implicit need of the reader. Any other pair is an
/// ordering ambiguity.
fn order_cache_pairs(stages: &[String], jobs: &mut [JobSpec]) -> Result<(), DescriptorError> {
    for r in 0..jobs.len() {
        if !jobs[r].pulls_only() {
            continue;
        }
        for w in 0..jobs.len() {
            let (reader, writer) = (&jobs[r], &jobs[w]);
            if w == r
                || writer.stage_index != reader.stage_index
                || !writer.writes_cache()
                || !writer.shares_cache_key(reader)
            {
                continue;
            }

            let implied = {
                let graph = needs_graph(jobs);
                if depends_on(&reader.name, &writer.name, &graph) {
                    None
                } else if writer.index < reader.index
                    && !depends_on(&writer.name, &reader.name, &graph)
                {
                    Some(writer.name.clone())
                } else {
                    return Err(DescriptorError::OrderingAmbiguity {
                        stage: stages[reader.stage_index].clone(),
                        key: reader
                            .cache
                            .as_ref()
                            .map(|c| c.key.to_string())
                            .unwrap_or_default(),
                        writer: writer.name.clone(),
                        reader: reader.name.clone(),
                    });
                }
            };

            if let Some(writer) = implied {
                debug!(job = %jobs[r].name, writer = %writer, "Reader ordered after cache writer");
                jobs[r].needs.push(writer);
            }
        }
    }
    Ok(())
}

fn needs_graph(jobs: &[JobSpec]) -> HashMap<&str, &[String]> {
    jobs.iter()
        .map(|j| (j.name.as_str(), j.needs.as_slice()))
        .collect()
}

/// Returns true if `job` transitively needs `target`.
pub(crate) fn depends_on(job: &str, target: &str, graph: &HashMap<&str, &[String]>) -> bool {
    let mut queue: VecDeque<&str> = VecDeque::from([job]);
    let mut seen: HashSet<&str> = HashSet::new();

    while let Some(current) = queue.pop_front() {
        for dep in graph.get(current).copied().unwrap_or(&[]) {
            if dep == target {
                return true;
            }
            if seen.insert(dep.as_str()) {
                queue.push_back(dep.as_str());
            }
        }
    }
    false
}
