//! Dependency resolution and static cycle detection.
//!
//! `resolve` answers "which steps must be considered to reach this target,
//! and in what order". It walks explicit dependencies depth-first, emitting
//! every step after everything it depends on. Only explicit dependencies
//! can form an error-worthy cycle: data edges (a parameter sourced from
//! another step) are followed to pull in prerequisites, but may loop, since
//! loops through defaulted parameters are resolved generation by generation
//! at run time.

use std::collections::HashMap;
use std::sync::Arc;

use super::definition::{Workflow, WorkflowError};
use super::step::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Resolved,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Ordered set of steps needed to reach `target`, ending with `target`.
///
/// Fails with `UnknownStep` if `target` does not exist and with
/// `CycleDetected` if the explicit dependencies reachable from it loop.
pub fn resolve(workflow: &Workflow, target: &str) -> Result<Vec<Arc<Step>>, WorkflowError> {
    let step = workflow
        .get(target)
        .ok_or_else(|| WorkflowError::UnknownStep(target.to_string()))?;

    let mut marks = HashMap::new();
    check_explicit_cycles(workflow, step, &mut marks)?;

    let mut marks = HashMap::new();
    let mut order = Vec::new();
    collect(workflow, step, &mut marks, &mut order);
    Ok(order)
}

/// Every step of the workflow, dependencies first, otherwise in
/// registration order.
pub fn resolve_all(workflow: &Workflow) -> Result<Vec<Arc<Step>>, WorkflowError> {
    let mut marks = HashMap::new();
    for step in workflow.steps() {
        check_explicit_cycles(workflow, step, &mut marks)?;
    }

    let mut marks = HashMap::new();
    let mut order = Vec::with_capacity(workflow.len());
    for step in workflow.steps() {
        collect(workflow, step, &mut marks, &mut order);
    }
    Ok(order)
}

// ---------------------------------------------------------------------------
// Traversals
// ---------------------------------------------------------------------------

/// White/gray/black DFS over explicit dependencies only.
fn check_explicit_cycles<'a>(
    workflow: &'a Workflow,
    step: &'a Arc<Step>,
    marks: &mut HashMap<&'a str, Mark>,
) -> Result<(), WorkflowError> {
    match marks.get(step.name()) {
        Some(Mark::Resolved) => return Ok(()),
        Some(Mark::Visiting) => {
            return Err(WorkflowError::CycleDetected(format!(
                "cycle detected involving step '{}'",
                step.name()
            )));
        }
        None => {}
    }

    marks.insert(step.name(), Mark::Visiting);
    for dep in step.dependencies() {
        // Unknown names are rejected when the workflow is built.
        if let Some(dep_step) = workflow.get(dep) {
            check_explicit_cycles(workflow, dep_step, marks)?;
        }
    }
    marks.insert(step.name(), Mark::Resolved);
    Ok(())
}

/// Post-order DFS over explicit and data edges. Nodes already on the stack
/// are skipped; explicit cycles were ruled out beforehand.
fn collect<'a>(
    workflow: &'a Workflow,
    step: &'a Arc<Step>,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<Arc<Step>>,
) {
    if marks.contains_key(step.name()) {
        return;
    }
    marks.insert(step.name(), Mark::Visiting);

    let upstream = step
        .dependencies()
        .iter()
        .map(String::as_str)
        .chain(step.data_sources());
    for name in upstream {
        if let Some(up) = workflow.get(name) {
            collect(workflow, up, marks, order);
        }
    }

    marks.insert(step.name(), Mark::Resolved);
    order.push(Arc::clone(step));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step::{Parameter, StepError, StepInputs, StepSpec};
    use rivulet_types::value::ValueType;
    use serde_json::json;

    fn step(id: &str, depends_on: &[&str]) -> StepSpec {
        depends_on.iter().fold(
            StepSpec::new(id).handler(|_: StepInputs| async { Ok::<_, StepError>(None) }),
            |spec, dep| spec.depends_on(*dep),
        )
    }

    fn names(steps: &[Arc<Step>]) -> Vec<&str> {
        steps.iter().map(|s| s.name()).collect()
    }

    fn position(steps: &[Arc<Step>], name: &str) -> usize {
        steps.iter().position(|s| s.name() == name).unwrap()
    }

    #[test]
    fn test_linear_chain_order() {
        let wf = Workflow::builder("chain")
            .step(step("c", &["b"]))
            .step(step("b", &["a"]))
            .step(step("a", &[]))
            .build()
            .unwrap();
        let order = resolve(&wf, "c").unwrap();
        assert_eq!(names(&order), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_only_reachable_steps_included() {
        let wf = Workflow::builder("wf")
            .step(step("a", &[]))
            .step(step("b", &["a"]))
            .step(step("unrelated", &[]))
            .build()
            .unwrap();
        let order = resolve(&wf, "b").unwrap();
        assert_eq!(names(&order), vec!["a", "b"]);
    }

    #[test]
    fn test_dependencies_precede_dependents_in_fork_join() {
        //     a
        //    / \
        //   b   c
        //   |   |
        //   d   e
        //    \ /
        //     f
        let wf = Workflow::builder("fork-join")
            .step(step("f", &["d", "e"]))
            .step(step("e", &["c"]))
            .step(step("d", &["b"]))
            .step(step("c", &["a"]))
            .step(step("b", &["a"]))
            .step(step("a", &[]))
            .build()
            .unwrap();
        let order = resolve(&wf, "f").unwrap();
        assert_eq!(order.len(), 6);
        assert_eq!(order.last().unwrap().name(), "f");
        for s in &order {
            for dep in s.dependencies() {
                assert!(
                    position(&order, dep) < position(&order, s.name()),
                    "{dep} should precede {}",
                    s.name()
                );
            }
        }
    }

    #[test]
    fn test_two_step_cycle_detected() {
        let wf = Workflow::builder("cycle")
            .step(step("a", &["b"]))
            .step(step("b", &["a"]))
            .build()
            .unwrap();
        let err = resolve(&wf, "a").unwrap_err();
        assert!(err.to_string().contains("cycle detected"), "got: {err}");
    }

    #[test]
    fn test_three_step_cycle_detected_by_resolve_all() {
        let wf = Workflow::builder("cycle")
            .step(step("a", &["c"]))
            .step(step("b", &["a"]))
            .step(step("c", &["b"]))
            .step(step("free", &[]))
            .build()
            .unwrap();
        let err = resolve_all(&wf).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let wf = Workflow::builder("self")
            .step(step("a", &["a"]))
            .build()
            .unwrap();
        assert!(resolve(&wf, "a").is_err());
    }

    #[test]
    fn test_feedback_and_data_loops_are_not_cycles() {
        // count feeds itself; ping and pong feed each other through a default.
        let noop = |name: &str| {
            StepSpec::new(name).handler(|_: StepInputs| async { Ok::<_, StepError>(None) })
        };
        let wf = Workflow::builder("loops")
            .step(noop("count").param(Parameter::feedback("prev", ValueType::Integer, json!(0))))
            .step(
                noop("ping")
                    .param(Parameter::from_step("pong", ValueType::Any, "pong").with_default(json!(0))),
            )
            .step(noop("pong").param(Parameter::from_step("ping", ValueType::Any, "ping")))
            .build()
            .unwrap();

        assert_eq!(names(&resolve(&wf, "count").unwrap()), vec!["count"]);
        let order = resolve(&wf, "pong").unwrap();
        assert_eq!(names(&order), vec!["ping", "pong"]);
        assert_eq!(resolve_all(&wf).unwrap().len(), 3);
    }

    #[test]
    fn test_data_sources_pulled_into_resolution() {
        let noop = |name: &str| {
            StepSpec::new(name).handler(|_: StepInputs| async { Ok::<_, StepError>(None) })
        };
        let wf = Workflow::builder("data")
            .step(noop("a"))
            .step(noop("b").param(Parameter::from_step("a", ValueType::Any, "a")))
            .step(noop("c").param(Parameter::from_step("b", ValueType::Any, "b")))
            .build()
            .unwrap();
        assert_eq!(names(&resolve(&wf, "c").unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unknown_target() {
        let wf = Workflow::builder("wf").step(step("a", &[])).build().unwrap();
        let err = resolve(&wf, "nope").unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownStep(ref s) if s == "nope"));
    }

    #[test]
    fn test_resolve_all_keeps_registration_order_for_independent_steps() {
        let wf = Workflow::builder("wf")
            .step(step("x", &[]))
            .step(step("y", &[]))
            .step(step("z", &["x"]))
            .build()
            .unwrap();
        assert_eq!(names(&resolve_all(&wf).unwrap()), vec!["x", "y", "z"]);
    }
}
