//! Artifact cache.
//!
//! This module provides:
//! - Cache key templates and their per-run expansion
//! - The [`CacheStore`] trait and an in-memory backend
//! - [`CacheManager`], which applies job pull/push policies

mod key;
mod manager;
mod snapshot;
mod store;

pub use key::{is_variable_name, CacheKeyTemplate, FALLBACK_KEY, MAX_KEY_LEN};
pub use manager::CacheManager;
pub use snapshot::CacheSnapshot;
pub use store::{CacheStore, InMemoryCacheStore};
