//! Step execution records streamed to run callers.
//!
//! A `StepRun` is one point-in-time state of one step's attempted
//! execution. Records are never mutated: each transition builds a new record
//! that carries the step name, generation and inputs forward.

use std::collections::BTreeMap;
use std::sync::Arc;

use rivulet_types::value::Variable;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::step::StepError;

// ---------------------------------------------------------------------------
// RunInfo
// ---------------------------------------------------------------------------

/// Identity of one attempted execution: which step, at which generation,
/// with which inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub step: String,
    pub generation: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Value>,
}

impl RunInfo {
    pub fn new(step: impl Into<String>, generation: u64, inputs: BTreeMap<String, Value>) -> Self {
        Self {
            step: step.into(),
            generation,
            inputs,
        }
    }

    pub fn queued(self) -> StepRun {
        StepRun::Queued(self)
    }

    pub fn running(self) -> StepRun {
        StepRun::Running(self)
    }

    /// Completion record. A produced value is tagged with this run's step
    /// name and generation.
    pub fn completed(self, value: Option<Value>) -> StepRun {
        let value = value.map(|v| Variable::new(self.step.clone(), self.generation, v));
        StepRun::Completed { run: self, value }
    }

    pub fn failed(self, error: StepError) -> StepRun {
        StepRun::Failed {
            run: self,
            error: StepFailure::new(error),
        }
    }
}

// ---------------------------------------------------------------------------
// StepFailure
// ---------------------------------------------------------------------------

/// Error attached to a `Failed` record.
///
/// The message survives serialization; the original error is only available
/// in the process that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailure {
    pub message: String,
    #[serde(skip)]
    error: Option<Arc<StepError>>,
}

impl StepFailure {
    pub fn new(error: StepError) -> Self {
        Self {
            message: error.to_string(),
            error: Some(Arc::new(error)),
        }
    }

    /// The original error, if this record was not deserialized.
    pub fn error(&self) -> Option<&StepError> {
        self.error.as_deref()
    }
}

impl PartialEq for StepFailure {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

// ---------------------------------------------------------------------------
// StepRun
// ---------------------------------------------------------------------------

/// One observable state transition.
///
/// Lifecycle: `Queued` -> `Running` -> `Completed` | `Failed`. `NotReady` is
/// terminal and emitted instead of `Queued`. `Variable` announces a value
/// independent of any run (initial values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "record", rename_all = "snake_case")]
pub enum StepRun {
    Queued(RunInfo),
    NotReady { step: String, generation: u64 },
    Running(RunInfo),
    Completed { run: RunInfo, value: Option<Variable> },
    Failed { run: RunInfo, error: StepFailure },
    Variable(Variable),
}

impl StepRun {
    pub fn not_ready(step: impl Into<String>, generation: u64) -> Self {
        StepRun::NotReady {
            step: step.into(),
            generation,
        }
    }

    /// Name of the step this record is about.
    pub fn step_name(&self) -> &str {
        match self {
            StepRun::Queued(run) | StepRun::Running(run) => &run.step,
            StepRun::Completed { run, .. } | StepRun::Failed { run, .. } => &run.step,
            StepRun::NotReady { step, .. } => step,
            StepRun::Variable(v) => &v.name,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            StepRun::Queued(run) | StepRun::Running(run) => run.generation,
            StepRun::Completed { run, .. } | StepRun::Failed { run, .. } => run.generation,
            StepRun::NotReady { generation, .. } => *generation,
            StepRun::Variable(v) => v.generation,
        }
    }

    /// True for records that end an execution attempt that actually ran.
    pub fn is_finished(&self) -> bool {
        matches!(self, StepRun::Completed { .. } | StepRun::Failed { .. })
    }

    /// The value carried by a `Completed` or `Variable` record.
    pub fn value(&self) -> Option<&Variable> {
        match self {
            StepRun::Completed { value, .. } => value.as_ref(),
            StepRun::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Short lowercase label for display.
    pub fn status(&self) -> &'static str {
        match self {
            StepRun::Queued(_) => "queued",
            StepRun::NotReady { .. } => "not_ready",
            StepRun::Running(_) => "running",
            StepRun::Completed { .. } => "completed",
            StepRun::Failed { .. } => "failed",
            StepRun::Variable(_) => "variable",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
