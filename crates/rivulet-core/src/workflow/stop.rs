//! Stop strategies: predicates over the records emitted so far.
//!
//! The engine evaluates its strategy after every emitted record and ends the
//! run as soon as it returns `true`.

use std::sync::Arc;

use super::run::StepRun;

/// Decides whether a run should end, given every record emitted so far.
///
/// The engine calls `should_stop` once per emitted record, so `history`
/// grows by exactly one record between calls and its last element is the
/// record just emitted. A strategy may rely on that and look only at the
/// newest record.
pub trait StopStrategy: Send + Sync {
    fn should_stop(&self, history: &[StepRun]) -> bool;
}

/// Never stops; the run ends when no work remains.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverStop;

impl StopStrategy for NeverStop {
    fn should_stop(&self, _history: &[StepRun]) -> bool {
        false
    }
}

/// Stops once `n` executions have finished (completed or failed).
///
/// Counting is linear in the history length, and only happens when the
/// newest record is itself finished.
#[derive(Debug, Clone, Copy)]
pub struct MaxSteps(pub usize);

impl StopStrategy for MaxSteps {
    fn should_stop(&self, history: &[StepRun]) -> bool {
        if self.0 == 0 {
            return true;
        }
        match history.last() {
            Some(last) if last.is_finished() => {
                history.iter().filter(|r| r.is_finished()).count() >= self.0
            }
            _ => false,
        }
    }
}

/// Stops when the newest record is a completion of the named step with a
/// value. Constant time per call.
#[derive(Debug, Clone)]
pub struct TargetReached(pub String);

impl TargetReached {
    pub fn new(step: impl Into<String>) -> Self {
        Self(step.into())
    }
}

impl StopStrategy for TargetReached {
    fn should_stop(&self, history: &[StepRun]) -> bool {
        match history.last() {
            Some(StepRun::Completed {
                run,
                value: Some(_),
            }) => run.step == self.0,
            _ => false,
        }
    }
}

/// Arbitrary closure over the history.
pub struct Predicate<F>(pub F);

impl<F> StopStrategy for Predicate<F>
where
    F: Fn(&[StepRun]) -> bool + Send + Sync,
{
    fn should_stop(&self, history: &[StepRun]) -> bool {
        (self.0)(history)
    }
}

/// Stops when any child strategy stops. An empty pipeline never stops.
#[derive(Clone, Default)]
pub struct Pipeline {
    children: Vec<Arc<dyn StopStrategy>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, strategy: impl StopStrategy + 'static) -> Self {
        self.with_arc(Arc::new(strategy))
    }

    pub fn with_arc(mut self, strategy: Arc<dyn StopStrategy>) -> Self {
        self.children.push(strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl StopStrategy for Pipeline {
    fn should_stop(&self, history: &[StepRun]) -> bool {
        self.children.iter().any(|c| c.should_stop(history))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("children", &self.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::run::RunInfo;
    use crate::workflow::step::StepError;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn info(step: &str, generation: u64) -> RunInfo {
        RunInfo::new(step, generation, BTreeMap::new())
    }

    fn history() -> Vec<StepRun> {
        vec![
            info("a", 1).queued(),
            info("a", 1).running(),
            info("a", 1).completed(Some(json!(1))),
            info("b", 2).queued(),
            info("b", 2).running(),
            info("b", 2).failed(StepError::MissingInput("x".into())),
            info("c", 3).completed(None),
        ]
    }

    #[test]
    fn never_stop() {
        assert!(!NeverStop.should_stop(&history()));
        assert!(!NeverStop.should_stop(&[]));
    }

    #[test]
    fn max_steps_counts_finished_records_only() {
        let h = history();
        assert!(MaxSteps(3).should_stop(&h));
        assert!(!MaxSteps(4).should_stop(&h));
        // Up to and including a's completion: one finished record.
        assert!(MaxSteps(1).should_stop(&h[..3]));
        assert!(!MaxSteps(1).should_stop(&h[..2]));
    }

    #[test]
    fn max_steps_zero_stops_immediately() {
        assert!(MaxSteps(0).should_stop(&[]));
        assert!(MaxSteps(0).should_stop(&history()[..1]));
    }

    #[test]
    fn max_steps_fires_on_the_finishing_record() {
        let h = history();
        assert!(MaxSteps(1).should_stop(&h[..3]));
        // b is queued and running after one finished record.
        assert!(!MaxSteps(2).should_stop(&h[..5]));
        // b's failure is the second.
        assert!(MaxSteps(2).should_stop(&h[..6]));
    }

    #[test]
    fn target_reached_requires_a_value() {
        let h = history();
        assert!(TargetReached::new("a").should_stop(&h[..3]));
        assert!(!TargetReached::new("a").should_stop(&h[..2]));
        // b failed, c completed without a value.
        assert!(!TargetReached::new("b").should_stop(&h[..6]));
        assert!(!TargetReached::new("c").should_stop(&h));
    }

    #[test]
    fn target_reached_checks_newest_record_only() {
        let h = history();
        // Evaluated once per record, so a's completion was already seen
        // when it was the newest.
        assert!(!TargetReached::new("a").should_stop(&h));
        let fired = (1..=h.len())
            .filter(|n| TargetReached::new("a").should_stop(&h[..*n]))
            .count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn predicate_sees_history() {
        let any_failure = Predicate(|h: &[StepRun]| h.iter().any(|r| r.status() == "failed"));
        assert!(any_failure.should_stop(&history()));
        assert!(!any_failure.should_stop(&history()[..3]));
    }

    #[test]
    fn pipeline_is_logical_or() {
        let h = history();
        assert!(!Pipeline::new().should_stop(&h));

        let pipeline = Pipeline::new()
            .with(NeverStop)
            .with(TargetReached::new("zzz"));
        assert_eq!(pipeline.len(), 2);
        assert!(!pipeline.should_stop(&h));

        let pipeline = pipeline.with(MaxSteps(2));
        assert!(pipeline.should_stop(&h));
    }
}
