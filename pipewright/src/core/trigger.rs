//! Trigger input for a pipeline run.

use crate::utils::{ref_slug, short_sha};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Predefined variable holding the full commit identifier.
pub const CI_COMMIT_SHA: &str = "CI_COMMIT_SHA";
/// Predefined variable holding the first eight characters of the commit.
pub const CI_COMMIT_SHORT_SHA: &str = "CI_COMMIT_SHORT_SHA";
/// Predefined variable holding the triggering ref name.
pub const CI_COMMIT_REF_NAME: &str = "CI_COMMIT_REF_NAME";
/// Predefined variable holding the slugified ref name.
pub const CI_COMMIT_REF_SLUG: &str = "CI_COMMIT_REF_SLUG";

/// Names of all variables derived from the trigger.
pub const PREDEFINED_VARIABLES: [&str; 4] = [
    CI_COMMIT_SHA,
    CI_COMMIT_SHORT_SHA,
    CI_COMMIT_REF_NAME,
    CI_COMMIT_REF_SLUG,
];

/// Whether the triggering ref is a branch or a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// A branch head.
    #[default]
    Branch,
    /// A tag.
    Tag,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branch => write!(f, "branch"),
            Self::Tag => write!(f, "tag"),
        }
    }
}

/// The ref and commit a pipeline run was triggered for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trigger {
    /// The ref name, e.g. `main` or `v1.2.0`.
    pub ref_name: String,
    /// Whether the ref is a branch or a tag.
    #[serde(default)]
    pub ref_kind: RefKind,
    /// The commit identifier.
    pub commit_sha: String,
}

impl Trigger {
    /// Creates a branch trigger.
    #[must_use]
    pub fn branch(ref_name: impl Into<String>, commit_sha: impl Into<String>) -> Self {
        Self {
            ref_name: ref_name.into(),
            ref_kind: RefKind::Branch,
            commit_sha: commit_sha.into(),
        }
    }

    /// Creates a tag trigger.
    #[must_use]
    pub fn tag(ref_name: impl Into<String>, commit_sha: impl Into<String>) -> Self {
        Self {
            ref_name: ref_name.into(),
            ref_kind: RefKind::Tag,
            commit_sha: commit_sha.into(),
        }
    }

    /// Returns the predefined `CI_*` variables for this trigger.
    #[must_use]
    pub fn variables(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert(CI_COMMIT_SHA.to_string(), self.commit_sha.clone());
        vars.insert(CI_COMMIT_SHORT_SHA.to_string(), short_sha(&self.commit_sha));
        vars.insert(CI_COMMIT_REF_NAME.to_string(), self.ref_name.clone());
        vars.insert(CI_COMMIT_REF_SLUG.to_string(), ref_slug(&self.ref_name));
        vars
    }
}
