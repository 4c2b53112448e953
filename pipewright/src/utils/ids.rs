//! Run identifiers and ref/commit string helpers.

use uuid::Uuid;

/// Generates a new run identifier.
///
/// Run ids are UUID v7 so that they sort by creation time.
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::now_v7()
}

/// Returns the first eight characters of a commit identifier.
#[must_use]
pub fn short_sha(commit_sha: &str) -> String {
    commit_sha.chars().take(8).collect()
}

/// Lowercases a ref name and replaces everything outside `[a-z0-9]` with `-`.
///
/// Leading and trailing dashes are stripped and the result is capped at
/// 63 characters, which keeps it usable in cache keys and hostnames.
#[must_use]
pub fn ref_slug(ref_name: &str) -> String {
    let replaced: String = ref_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = replaced.trim_matches('-');
    let capped: String = trimmed.chars().take(63).collect();
    capped.trim_end_matches('-').to_string()
}
