//! Testing utilities for pipelines.
//!
//! This module provides:
//! - A scripted executor and a cache store that can fail on demand
//! - Fixture definitions and a run harness
//! - Assertions over run results

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_all_terminal, assert_job_status, assert_outcome};
pub use fixtures::{definition, main_trigger, TestHarness, CI_PIPELINE};
pub use mocks::{ExecutionRecord, FailingCacheStore, ScriptedExecutor};
