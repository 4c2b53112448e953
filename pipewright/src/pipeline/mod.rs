//! Pipeline definitions.
//!
//! This module provides:
//! - The serialized document format (YAML or JSON)
//! - Branch filters for `only` / `except`
//! - Validated job and pipeline definitions
//! - The descriptor store that parses and validates documents

mod document;
mod filters;
mod spec;
mod store;

pub use document::{
    CacheDocument, Commands, DefaultsDocument, DocumentFormat, JobDocument, PipelineDocument,
};
pub use filters::{matches, RefFilter, RefPattern};
pub use spec::{CacheSpec, JobSpec, PipelineDefinition};
pub use store::{build_definition, source_digest, DescriptorStore, DEFAULT_PIPELINE_NAME};
pub(crate) use store::depends_on;
