//! Observability utilities.
//!
//! Runs execute inside a `pipeline.run` span and each job inside a
//! `pipeline.job` span; [`init_tracing`] installs a subscriber that renders
//! them as plain text or JSON.

mod subscriber;
mod summary;

pub use subscriber::init_tracing;
pub use summary::run_summary;
