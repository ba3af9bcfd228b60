//! Workflow construction and validation.
//!
//! A `Workflow` is an immutable, named collection of steps assembled from
//! `StepSpec`s by `WorkflowBuilder`. Building validates structural
//! constraints (unique names, known references) and precomputes the
//! step graph used to find transitive dependents.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use thiserror::Error;

use super::step::{Step, StepSpec};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while building or resolving a workflow. All of them are
/// fatal: a run never starts.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Two steps share a name.
    #[error("duplicate step name: '{0}'")]
    DuplicateStep(String),

    /// A step references a step that does not exist.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// Explicit dependencies contain a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// A run targeted a step that does not exist.
    #[error("unknown step: '{0}'")]
    UnknownStep(String),
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Immutable mapping from step name to step.
///
/// Steps keep their registration order, which is also the order in which the
/// scheduler considers them.
pub struct Workflow {
    name: String,
    steps: Vec<Arc<Step>>,
    index: HashMap<String, usize>,
    /// Edge from a producer to every step that consumes it (through a
    /// parameter or an explicit dependency). Feedback edges are left out.
    graph: DiGraph<usize, ()>,
}

impl Workflow {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Step>> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn steps(&self) -> &[Arc<Step>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps directly affected by a new value for `name`, in registration
    /// order. Includes `name` itself when it has a feedback parameter.
    pub fn successors_of(&self, name: &str) -> Vec<Arc<Step>> {
        self.steps
            .iter()
            .filter(|s| s.consumes(name))
            .cloned()
            .collect()
    }

    /// Every step that depends, directly or transitively, on `name`. `name`
    /// itself is never part of the result, even inside a loop.
    pub fn dependents_of(&self, name: &str) -> HashSet<String> {
        let Some(&start) = self.index.get(name) else {
            return HashSet::new();
        };
        let start = NodeIndex::new(start);
        let mut dependents = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                dependents.insert(self.steps[self.graph[node]].name().to_string());
            }
        }
        dependents
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WorkflowBuilder
// ---------------------------------------------------------------------------

/// Collects `StepSpec`s and validates them into a `Workflow`.
pub struct WorkflowBuilder {
    name: String,
    specs: Vec<StepSpec>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specs: Vec::new(),
        }
    }

    pub fn step(mut self, spec: StepSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Validate every spec and assemble the workflow.
    ///
    /// Checks:
    /// - Workflow name is non-empty
    /// - Each spec is valid on its own (see `StepSpec::build`)
    /// - Step names are unique
    /// - Explicit dependencies and parameter sources name existing steps
    ///
    /// Cycles are not checked here; see `dag::resolve`.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "workflow name must not be empty".to_string(),
            ));
        }

        let mut steps = Vec::with_capacity(self.specs.len());
        let mut index = HashMap::with_capacity(self.specs.len());
        for spec in self.specs {
            let step = spec.build()?;
            if index.contains_key(step.name()) {
                return Err(WorkflowError::DuplicateStep(step.name().to_string()));
            }
            index.insert(step.name().to_string(), steps.len());
            steps.push(Arc::new(step));
        }

        for step in &steps {
            for dep in step.dependencies() {
                if !index.contains_key(dep.as_str()) {
                    return Err(WorkflowError::UnknownDependency(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.name(),
                        dep
                    )));
                }
            }
            for source in step.data_sources() {
                if !index.contains_key(source) {
                    return Err(WorkflowError::UnknownDependency(format!(
                        "step '{}' reads from unknown step '{}'",
                        step.name(),
                        source
                    )));
                }
            }
        }

        let mut graph = DiGraph::<usize, ()>::with_capacity(steps.len(), steps.len());
        let nodes: Vec<NodeIndex> = (0..steps.len()).map(|i| graph.add_node(i)).collect();
        for (to, step) in steps.iter().enumerate() {
            let producers = step
                .dependencies()
                .iter()
                .map(String::as_str)
                .chain(step.data_sources());
            for producer in producers {
                let from = index[producer];
                if from != to {
                    graph.add_edge(nodes[from], nodes[to], ());
                }
            }
        }

        tracing::debug!(
            workflow = self.name.as_str(),
            steps = steps.len(),
            "built workflow"
        );

        Ok(Workflow {
            name: self.name,
            steps,
            index,
            graph,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step::{Parameter, StepError, StepInputs};
    use rivulet_types::value::ValueType;
    use serde_json::json;

    fn noop(name: &str) -> StepSpec {
        StepSpec::new(name).handler(|_: StepInputs| async { Ok::<_, StepError>(None) })
    }

    fn reads(name: &str, from: &[&str]) -> StepSpec {
        from.iter().fold(noop(name), |spec, src| {
            spec.param(Parameter::from_step(*src, ValueType::Any, *src))
        })
    }

    #[test]
    fn build_and_lookup() {
        let wf = Workflow::builder("chain")
            .step(noop("a"))
            .step(reads("b", &["a"]))
            .build()
            .unwrap();
        assert_eq!(wf.name(), "chain");
        assert_eq!(wf.len(), 2);
        assert!(wf.contains("a"));
        assert_eq!(wf.get("b").unwrap().name(), "b");
        assert!(wf.get("zzz").is_none());
    }

    #[test]
    fn duplicate_step_names_rejected() {
        let err = Workflow::builder("dup")
            .step(noop("a"))
            .step(noop("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateStep(ref n) if n == "a"));
    }

    #[test]
    fn unknown_references_rejected() {
        let err = Workflow::builder("bad")
            .step(noop("a").depends_on("ghost"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown step 'ghost'"), "got: {err}");

        let err = Workflow::builder("bad")
            .step(reads("a", &["ghost"]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("reads from unknown step"), "got: {err}");
    }

    #[test]
    fn empty_workflow_name_rejected() {
        assert!(Workflow::builder("").step(noop("a")).build().is_err());
    }

    #[test]
    fn successors_include_params_explicit_deps_and_feedback() {
        let wf = Workflow::builder("wf")
            .step(noop("a"))
            .step(reads("b", &["a"]))
            .step(noop("c").depends_on("a"))
            .step(noop("loop").param(Parameter::feedback("prev", ValueType::Any, json!(0))))
            .build()
            .unwrap();
        let names: Vec<String> = wf
            .successors_of("a")
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "c"]);
        let names: Vec<String> = wf
            .successors_of("loop")
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["loop"]);
    }

    #[test]
    fn dependents_are_transitive_and_exclude_self() {
        // a -> b -> c, c feeds back into b (data loop), d independent
        let wf = Workflow::builder("wf")
            .step(noop("a"))
            .step(
                reads("b", &["a"])
                    .param(Parameter::from_step("c", ValueType::Any, "c").with_default(json!(0))),
            )
            .step(reads("c", &["b"]))
            .step(noop("d"))
            .build()
            .unwrap();

        let deps = wf.dependents_of("a");
        assert_eq!(deps, HashSet::from(["b".to_string(), "c".to_string()]));

        let deps = wf.dependents_of("b");
        assert_eq!(deps, HashSet::from(["c".to_string()]));

        assert!(wf.dependents_of("d").is_empty());
        assert!(wf.dependents_of("missing").is_empty());
    }
}
