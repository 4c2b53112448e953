//! Cache snapshots.

use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The content of a cache entry at the time it was read.
///
/// Fetching a key that was never stored yields an empty snapshot rather than
/// an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// The expanded cache key.
    pub key: String,
    /// Cached path patterns.
    pub paths: Vec<String>,
    /// SHA-256 digest of the cached content, empty for an empty snapshot.
    pub digest: String,
    /// When the entry was stored.
    pub stored_at: Option<Timestamp>,
}

impl CacheSnapshot {
    /// Creates an empty snapshot for a key.
    #[must_use]
    pub fn empty(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            paths: Vec::new(),
            digest: String::new(),
            stored_at: None,
        }
    }

    /// Creates a snapshot of freshly stored paths.
    #[must_use]
    pub fn new(key: impl Into<String>, paths: &[String]) -> Self {
        Self {
            key: key.into(),
            paths: paths.to_vec(),
            digest: content_digest(paths),
            stored_at: Some(now_utc()),
        }
    }

    /// Returns true if nothing was stored under the key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stored_at.is_none()
    }

    /// Returns true if the snapshot holds stored content.
    #[must_use]
    pub fn is_hit(&self) -> bool {
        !self.is_empty()
    }
}

fn content_digest(paths: &[String]) -> String {
    let mut hasher = Sha256::new();
    for path in paths {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
