//! Branch/ref filters for `only` and `except`.
//!
//! A pattern is one of:
//! - `/regex/`: the ref name must match the regular expression
//! - `branches` / `tags`: the ref must be of that kind
//! - anything else: the ref name must be equal to the pattern

use crate::core::{RefKind, Trigger};
use regex::Regex;
use std::fmt;

/// A single ref-matching pattern.
#[derive(Debug, Clone)]
pub enum RefPattern {
    /// Exact ref name.
    Exact(String),
    /// Regular expression over the ref name.
    Regex {
        /// The pattern as written, including the slashes.
        source: String,
        /// The compiled expression.
        regex: Regex,
    },
    /// Any ref of the given kind.
    Kind(RefKind),
}

impl RefPattern {
    /// Parses a pattern.
    ///
    /// # Errors
    ///
    /// Returns the reason when the pattern is empty or the regex does not compile.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let pattern = raw.trim();
        if pattern.is_empty() {
            return Err("pattern is empty".to_string());
        }

        if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let body = &pattern[1..pattern.len() - 1];
            if body.is_empty() {
                return Err("regex pattern is empty".to_string());
            }
            let regex = Regex::new(body).map_err(|e| e.to_string())?;
            return Ok(Self::Regex {
                source: pattern.to_string(),
                regex,
            });
        }
        if pattern == "/" {
            return Err("unterminated regex pattern".to_string());
        }

        Ok(match pattern {
            "branches" => Self::Kind(RefKind::Branch),
            "tags" => Self::Kind(RefKind::Tag),
            other => Self::Exact(other.to_string()),
        })
    }

    /// Returns the pattern text as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(name) => name,
            Self::Regex { source, .. } => source,
            Self::Kind(RefKind::Branch) => "branches",
            Self::Kind(RefKind::Tag) => "tags",
        }
    }

    /// Returns true if the pattern matches the trigger's ref.
    #[must_use]
    pub fn is_match(&self, ref_name: &str, ref_kind: RefKind) -> bool {
        match self {
            Self::Exact(name) => name == ref_name,
            Self::Regex { regex, .. } => regex.is_match(ref_name),
            Self::Kind(kind) => *kind == ref_kind,
        }
    }
}

impl PartialEq for RefPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for RefPattern {}

impl fmt::Display for RefPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true if any pattern in the set matches the ref.
///
/// An empty set matches nothing.
#[must_use]
pub fn matches(ref_name: &str, ref_kind: RefKind, patterns: &[RefPattern]) -> bool {
    patterns.iter().any(|p| p.is_match(ref_name, ref_kind))
}

/// The `only` / `except` filter pair of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefFilter {
    /// If non-empty, the ref must match one of these.
    pub only: Vec<RefPattern>,
    /// The ref must match none of these.
    pub except: Vec<RefPattern>,
}

impl RefFilter {
    /// Returns true if the filter lets the trigger's ref through.
    #[must_use]
    pub fn admits(&self, trigger: &Trigger) -> bool {
        let included =
            self.only.is_empty() || matches(&trigger.ref_name, trigger.ref_kind, &self.only);
        included && !matches(&trigger.ref_name, trigger.ref_kind, &self.except)
    }

    /// Returns the first pattern listed in both `only` and `except`.
    #[must_use]
    pub fn conflict(&self) -> Option<&RefPattern> {
        self.only.iter().find(|p| self.except.contains(p))
    }

    /// Explains why the filter rejects a ref.
    #[must_use]
    pub fn rejection_reason(&self, trigger: &Trigger) -> String {
        if matches(&trigger.ref_name, trigger.ref_kind, &self.except) {
            format!("ref '{}' matches an except pattern", trigger.ref_name)
        } else {
            format!("ref '{}' matches no only pattern", trigger.ref_name)
        }
    }
}
