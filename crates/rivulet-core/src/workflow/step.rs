//! Step contract: parameters, the handler capability, readiness and
//! invocation.
//!
//! A `Step` is built from a `StepSpec` and never changes afterwards. The
//! scheduler asks it two questions: "can you run against this context?"
//! (`is_ready`) and "run with these inputs" (`execute`).

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rivulet_types::value::{ParamSource, ValueType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::context::ContextView;
use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// Parameter
// ---------------------------------------------------------------------------

/// One input slot of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name the handler sees the value under. Unique within a step.
    pub name: String,
    /// Type tag checked against the resolved value.
    pub value_type: ValueType,
    /// Where the value comes from.
    pub source: ParamSource,
    /// Used when no value is available in the context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Parameter {
    /// A parameter supplied externally, keyed by its own name.
    pub fn input(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            source: ParamSource::Input,
            default: None,
        }
    }

    /// A parameter satisfied by another step's output.
    pub fn from_step(
        name: impl Into<String>,
        value_type: ValueType,
        step: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value_type,
            source: ParamSource::Step { step: step.into() },
            default: None,
        }
    }

    /// A parameter fed by the owning step's previous output.
    ///
    /// `initial` is used on the first iteration.
    pub fn feedback(name: impl Into<String>, value_type: ValueType, initial: Value) -> Self {
        Self {
            name: name.into(),
            value_type,
            source: ParamSource::Feedback,
            default: Some(initial),
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Context key that satisfies this parameter when it belongs to `owner`.
    pub fn source_name<'a>(&'a self, owner: &'a str) -> &'a str {
        match &self.source {
            ParamSource::Input => &self.name,
            ParamSource::Step { step } => step,
            ParamSource::Feedback => owner,
        }
    }
}

// ---------------------------------------------------------------------------
// StepInputs
// ---------------------------------------------------------------------------

/// Resolved inputs handed to a step handler, keyed by parameter name.
#[derive(Debug, Clone)]
pub struct StepInputs {
    values: BTreeMap<String, Value>,
    cancel: CancellationToken,
}

impl StepInputs {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self {
            values,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the run's cancellation signal.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Decode an input into a concrete type.
    pub fn parse<T: DeserializeOwned>(&self, name: &str) -> Result<T, StepError> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| StepError::MissingInput(name.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|source| StepError::Decode {
            name: name.to_string(),
            source,
        })
    }

    /// Cancellation signal for the run. Long-running handlers should select
    /// on `cancelled()` at their await points.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors raised while executing a single step. The scheduler turns these
/// into `Failed` records; they never abort a run.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// A required input was not supplied.
    #[error("missing input '{0}'")]
    MissingInput(String),

    /// An input did not match its parameter's type tag.
    #[error("input '{name}' expected {expected}, got {actual}")]
    InputType {
        name: String,
        expected: ValueType,
        actual: ValueType,
    },

    /// The handler produced a value not matching the declared output type.
    #[error("output expected {expected}, got {actual}")]
    OutputType {
        expected: ValueType,
        actual: ValueType,
    },

    /// An input could not be decoded into the requested type.
    #[error("failed to decode input '{name}': {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The handler panicked.
    #[error("step panicked: {0}")]
    Panicked(String),

    /// Error returned by the handler itself.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// StepHandler
// ---------------------------------------------------------------------------

/// Result of one handler invocation. `Ok(None)` means the step has nothing
/// to contribute this round.
pub type StepResult = Result<Option<Value>, StepError>;

/// The bound computation of a step.
///
/// Implemented for every `Fn(StepInputs) -> impl Future<Output = StepResult>`,
/// so async closures can be registered directly.
pub trait StepHandler: Send + Sync + 'static {
    fn invoke(&self, inputs: StepInputs) -> BoxFuture<'static, StepResult>;
}

impl<F, Fut> StepHandler for F
where
    F: Fn(StepInputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult> + Send + 'static,
{
    fn invoke(&self, inputs: StepInputs) -> BoxFuture<'static, StepResult> {
        Box::pin(self(inputs))
    }
}

// ---------------------------------------------------------------------------
// StepSpec
// ---------------------------------------------------------------------------

/// Declarative description of a step, registered with a `WorkflowBuilder`.
pub struct StepSpec {
    name: String,
    parameters: Vec<Parameter>,
    dependencies: Vec<String>,
    output_type: ValueType,
    handler: Option<Arc<dyn StepHandler>>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            dependencies: Vec::new(),
            output_type: ValueType::Any,
            handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Declare an explicit dependency: `step` must have a value in the
    /// context before this step is considered, whether or not a parameter
    /// consumes it.
    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.dependencies.push(step.into());
        self
    }

    pub fn output(mut self, value_type: ValueType) -> Self {
        self.output_type = value_type;
        self
    }

    pub fn handler<H: StepHandler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Validate the spec and freeze it into a `Step`.
    ///
    /// Checks:
    /// - Step and parameter names are non-empty
    /// - Parameter names are unique within the step
    /// - Feedback parameters carry a default
    /// - A handler is bound
    pub fn build(self) -> Result<Step, WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "step name must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if param.name.trim().is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' has a parameter with an empty name",
                    self.name
                )));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' declares parameter '{}' more than once",
                    self.name, param.name
                )));
            }
            if param.source == ParamSource::Feedback && !param.has_default() {
                return Err(WorkflowError::ValidationError(format!(
                    "feedback parameter '{}' of step '{}' must have a default",
                    param.name, self.name
                )));
            }
        }

        let handler = self.handler.ok_or_else(|| {
            WorkflowError::ValidationError(format!("step '{}' has no handler", self.name))
        })?;

        // Keep declaration order, drop repeats.
        let mut dependencies: Vec<String> = Vec::with_capacity(self.dependencies.len());
        for dep in self.dependencies {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        Ok(Step {
            name: self.name,
            parameters: self.parameters,
            output_type: self.output_type,
            dependencies,
            handler,
        })
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// An immutable, named unit of computation.
pub struct Step {
    name: String,
    parameters: Vec<Parameter>,
    output_type: ValueType,
    dependencies: Vec<String>,
    handler: Arc<dyn StepHandler>,
}

impl Step {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn output_type(&self) -> ValueType {
        self.output_type
    }

    /// Explicit dependencies, in declaration order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Names of other steps whose output feeds a parameter of this step.
    pub fn data_sources(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().filter_map(|p| match &p.source {
            ParamSource::Step { step } => Some(step.as_str()),
            _ => None,
        })
    }

    pub fn has_feedback(&self) -> bool {
        self.parameters
            .iter()
            .any(|p| p.source == ParamSource::Feedback)
    }

    /// Whether a new value for `step` can change this step's readiness or
    /// inputs.
    pub fn consumes(&self, step: &str) -> bool {
        self.data_sources().any(|s| s == step)
            || (self.name == step && self.has_feedback())
            || self.dependencies.iter().any(|d| d == step)
    }

    /// True iff every parameter lacking a default and every explicit
    /// dependency has an entry in `context`.
    pub fn is_ready<C: ContextView + ?Sized>(&self, context: &C) -> bool {
        self.parameters
            .iter()
            .filter(|p| !p.has_default())
            .all(|p| context.contains(p.source_name(&self.name)))
            && self.dependencies.iter().all(|d| context.contains(d))
    }

    /// Map each parameter to its context value, falling back to its default.
    /// Parameters with neither are left out.
    pub fn resolve_inputs<C: ContextView + ?Sized>(&self, context: &C) -> BTreeMap<String, Value> {
        self.parameters
            .iter()
            .filter_map(|p| {
                context
                    .value_of(p.source_name(&self.name))
                    .or_else(|| p.default.clone())
                    .map(|v| (p.name.clone(), v))
            })
            .collect()
    }

    /// Invoke the handler.
    ///
    /// Returns `Ok(None)` without invoking anything when a parameter lacking
    /// a default is missing from `inputs`, so a step can be polled as the
    /// context evolves.
    pub async fn execute(&self, inputs: StepInputs) -> StepResult {
        if let Some(missing) = self
            .parameters
            .iter()
            .find(|p| !p.has_default() && !inputs.contains(&p.name))
        {
            tracing::debug!(
                step = self.name.as_str(),
                parameter = missing.name.as_str(),
                "step not ready, skipping invocation"
            );
            return Ok(None);
        }

        for param in &self.parameters {
            if let Some(value) = inputs.get(&param.name) {
                if !param.value_type.matches(value) {
                    return Err(StepError::InputType {
                        name: param.name.clone(),
                        expected: param.value_type,
                        actual: ValueType::of(value),
                    });
                }
            }
        }

        let output = self.handler.invoke(inputs).await?;

        if let Some(value) = &output {
            if !self.output_type.matches(value) {
                return Err(StepError::OutputType {
                    expected: self.output_type,
                    actual: ValueType::of(value),
                });
            }
        }

        Ok(output)
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("output_type", &self.output_type)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
