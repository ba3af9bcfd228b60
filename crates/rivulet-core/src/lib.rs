//! Dataflow engine core for rivulet.
//!
//! Steps are declared through [`workflow::WorkflowBuilder`], resolved into an
//! ordered step set, and executed by [`workflow::Engine`] on a bounded worker
//! pool. Every state transition is streamed back to the caller as a
//! [`workflow::StepRun`].

pub mod config;
pub mod workflow;
