//! Lifecycle event delivery.
//!
//! The scheduler emits a [`PipelineEvent`](crate::core::PipelineEvent) for
//! every run and job transition and for cache traffic.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
