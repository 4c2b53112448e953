//! Dependency and ordering resolution.
//!
//! The resolver filters jobs by the trigger's ref and partitions the rest
//! into stage buckets that the scheduler dispatches in order.

mod model;
mod resolver;

pub use model::{ExecutionPlan, PlannedJob, StageBucket};
pub use resolver::{resolve, run_variables};
