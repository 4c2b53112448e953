//! Identifier and timestamp helpers shared across the engine.

mod ids;
pub mod timestamps;

pub use ids::{generate_run_id, ref_slug, short_sha};
pub use timestamps::{elapsed_ms, iso_timestamp, now_utc, Timestamp};
