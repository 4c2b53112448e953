//! Serialized pipeline definition format.
//!
//! These types mirror the document as written. They carry no validation;
//! [`DescriptorStore`](super::DescriptorStore) turns them into a
//! [`PipelineDefinition`](super::PipelineDefinition).

use crate::core::{CachePolicy, WhenPolicy};
use crate::errors::DescriptorError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Source format of a pipeline document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// YAML document.
    Yaml,
    /// JSON document.
    Json,
}

impl DocumentFormat {
    /// Picks the format from a file extension, defaulting to YAML.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }

    /// Guesses the format from the document text.
    #[must_use]
    pub fn detect(source: &str) -> Self {
        if source.trim_start().starts_with('{') {
            Self::Json
        } else {
            Self::Yaml
        }
    }

    /// Returns the format name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }
}

/// A command list written either as one string or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Commands {
    /// A single command.
    One(String),
    /// An ordered list of commands.
    Many(Vec<String>),
}

impl Default for Commands {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl Commands {
    /// Returns the commands as a list.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(command) => vec![command],
            Self::Many(commands) => commands,
        }
    }
}

/// Cache declaration of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheDocument {
    /// Key template.
    pub key: String,
    /// Cached path patterns.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Pull/push policy.
    #[serde(default)]
    pub policy: CachePolicy,
}

/// Settings inherited by every job that does not set them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsDocument {
    /// Commands run before each job's script.
    #[serde(default)]
    pub before_script: Option<Commands>,
    /// Commands run after each job's script.
    #[serde(default)]
    pub after_script: Option<Commands>,
    /// Required worker tags.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Cache declaration.
    #[serde(default)]
    pub cache: Option<CacheDocument>,
    /// Job timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One job as written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDocument {
    /// Unique job name.
    pub name: String,
    /// Stage the job belongs to.
    pub stage: String,
    /// Script commands.
    #[serde(default)]
    pub script: Commands,
    /// Commands run before the script.
    #[serde(default)]
    pub before_script: Option<Commands>,
    /// Commands run after the script.
    #[serde(default)]
    pub after_script: Option<Commands>,
    /// Cache declaration.
    #[serde(default)]
    pub cache: Option<CacheDocument>,
    /// Refs the job runs for.
    #[serde(default)]
    pub only: Vec<String>,
    /// Refs the job never runs for.
    #[serde(default)]
    pub except: Vec<String>,
    /// Required worker tags.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// When the job runs.
    #[serde(default)]
    pub when: WhenPolicy,
    /// Whether failure is tolerated.
    #[serde(default)]
    pub allow_failure: bool,
    /// Jobs that must be terminal before this one starts.
    #[serde(default)]
    pub needs: Vec<String>,
    /// Job timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Job variables.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// A pipeline document as written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDocument {
    /// Pipeline name.
    #[serde(default)]
    pub name: Option<String>,
    /// Ordered stage names.
    #[serde(default)]
    pub stages: Vec<String>,
    /// Pipeline variables.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Job defaults.
    #[serde(default)]
    pub default: DefaultsDocument,
    /// Jobs in declaration order.
    #[serde(default)]
    pub jobs: Vec<JobDocument>,
}

impl PipelineDocument {
    /// Parses a document in the given format.
    ///
    /// # Errors
    ///
    /// Returns `DescriptorError::Parse` when the text is not a valid document.
    pub fn parse(source: &str, format: DocumentFormat) -> Result<Self, DescriptorError> {
        match format {
            DocumentFormat::Yaml => serde_yaml::from_str(source)
                .map_err(|e| DescriptorError::parse(format.name(), e.to_string())),
            DocumentFormat::Json => serde_json::from_str(source)
                .map_err(|e| DescriptorError::parse(format.name(), e.to_string())),
        }
    }
}
