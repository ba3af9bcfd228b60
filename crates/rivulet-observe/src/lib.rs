//! Observability setup for rivulet binaries.

pub mod tracing_setup;
