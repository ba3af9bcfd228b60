//! Workflow engine core: step contract, dependency resolution, versioned
//! context, and the concurrent scheduler.
//!
//! - `step` -- parameters, step specs, readiness and invocation
//! - `definition` -- immutable `Workflow` and its builder
//! - `dag` -- dependency resolver with static cycle detection
//! - `context` -- generation-checked run context
//! - `run` -- `StepRun` records streamed to callers
//! - `stop` -- composable stop strategies
//! - `executor` -- worker pool and coordinating loop
//! - `checkpoint` -- serializable record of a run for resumption

pub mod checkpoint;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod run;
pub mod step;
pub mod stop;

pub use checkpoint::{Checkpoint, CheckpointError};
pub use context::RunContext;
pub use dag::{resolve, resolve_all};
pub use definition::{Workflow, WorkflowBuilder, WorkflowError};
pub use executor::{Engine, EngineError, RunOptions, RunStream};
pub use run::{RunInfo, StepFailure, StepRun};
pub use step::{Parameter, Step, StepError, StepHandler, StepInputs, StepSpec};
pub use stop::{MaxSteps, NeverStop, Pipeline, Predicate, StopStrategy, TargetReached};
