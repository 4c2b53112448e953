//! Run scheduling.
//!
//! This module provides:
//! - The job state machine and its legal transitions
//! - Failure propagation and the run outcome
//! - The scheduler loop that dispatches planned jobs to workers

mod failure;
#[cfg(test)]
mod integration_tests;
#[allow(clippy::module_inception)]
mod scheduler;
mod state;

pub use failure::{FailureAction, FailureController, FailureRecord};
pub use scheduler::Scheduler;
pub use state::is_legal_transition;
