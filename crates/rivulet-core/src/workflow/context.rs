//! Run-scoped, generation-checked context of step values.
//!
//! `RunContext` maps step names to the latest `Variable` produced for them in
//! the current run. It is shared between the coordinator (sole writer) and
//! the workers (readers, for the generation invariant check). A write only
//! lands if it carries a strictly higher generation than what is stored.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rivulet_types::value::Variable;
use serde_json::Value;

// ---------------------------------------------------------------------------
// ContextView
// ---------------------------------------------------------------------------

/// Read access to "which step names currently have a value, and what is it".
pub trait ContextView {
    fn contains(&self, name: &str) -> bool;
    fn value_of(&self, name: &str) -> Option<Value>;
}

impl ContextView for HashMap<String, Variable> {
    fn contains(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn value_of(&self, name: &str) -> Option<Value> {
        self.get(name).map(|v| v.value.clone())
    }
}

impl ContextView for BTreeMap<String, Variable> {
    fn contains(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn value_of(&self, name: &str) -> Option<Value> {
        self.get(name).map(|v| v.value.clone())
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Concurrent map from step name to its latest value. Cloning shares the map.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    entries: Arc<DashMap<String, Variable>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context from caller-supplied values. When a name repeats, the
    /// highest generation wins.
    pub fn from_initial(values: impl IntoIterator<Item = Variable>) -> Self {
        let ctx = Self::new();
        for value in values {
            ctx.try_update(value);
        }
        ctx
    }

    pub fn get(&self, name: &str) -> Option<Variable> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    pub fn generation_of(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|e| e.value().generation)
    }

    /// Highest generation stored, 0 when empty.
    pub fn max_generation(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.value().generation)
            .max()
            .unwrap_or(0)
    }

    /// Store `variable` unless a value with the same or a higher generation
    /// is already present. Returns whether the write landed.
    pub fn try_update(&self, variable: Variable) -> bool {
        match self.entries.entry(variable.name.clone()) {
            Entry::Occupied(mut entry) => {
                if variable.supersedes(entry.get()) {
                    entry.insert(variable);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(variable);
                true
            }
        }
    }

    /// View of this context with `excluded` names hidden.
    pub fn without<'a>(&'a self, excluded: &'a HashSet<String>) -> FilteredContext<'a> {
        FilteredContext {
            context: self,
            excluded,
        }
    }

    /// All stored values, ordered by name.
    pub fn snapshot(&self) -> Vec<Variable> {
        let mut values: Vec<Variable> = self.entries.iter().map(|e| e.value().clone()).collect();
        values.sort_by(|a, b| a.name.cmp(&b.name));
        values
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ContextView for RunContext {
    fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn value_of(&self, name: &str) -> Option<Value> {
        self.entries.get(name).map(|e| e.value().value.clone())
    }
}

// ---------------------------------------------------------------------------
// FilteredContext
// ---------------------------------------------------------------------------

/// A `RunContext` with some names hidden. Used to evaluate downstream
/// readiness without values left over from a previous loop iteration.
#[derive(Debug, Clone, Copy)]
pub struct FilteredContext<'a> {
    context: &'a RunContext,
    excluded: &'a HashSet<String>,
}

impl ContextView for FilteredContext<'_> {
    fn contains(&self, name: &str) -> bool {
        !self.excluded.contains(name) && self.context.contains(name)
    }

    fn value_of(&self, name: &str) -> Option<Value> {
        if self.excluded.contains(name) {
            None
        } else {
            self.context.value_of(name)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_and_get() {
        let ctx = RunContext::new();
        assert!(ctx.try_update(Variable::new("a", 1, json!("a"))));
        assert_eq!(ctx.get("a").unwrap().value, json!("a"));
        assert_eq!(ctx.generation_of("a"), Some(1));
        assert!(ctx.get("missing").is_none());
    }

    #[test]
    fn test_lower_or_equal_generation_is_rejected() {
        let ctx = RunContext::new();
        assert!(ctx.try_update(Variable::new("a", 5, json!(5))));
        assert!(!ctx.try_update(Variable::new("a", 5, json!("dup"))));
        assert!(!ctx.try_update(Variable::new("a", 3, json!(3))));
        assert_eq!(ctx.get("a").unwrap().value, json!(5));
    }

    #[test]
    fn test_generation_never_regresses_for_any_completion_order() {
        let generations = [4u64, 9, 1, 7, 9, 2, 12, 3];
        // Rotate through several arrival orders.
        for shift in 0..generations.len() {
            let ctx = RunContext::new();
            let mut order = generations.to_vec();
            order.rotate_left(shift);
            for g in &order {
                ctx.try_update(Variable::new("s", *g, json!(g)));
            }
            assert_eq!(ctx.generation_of("s"), Some(12));
            assert_eq!(ctx.get("s").unwrap().value, json!(12));
        }
    }

    #[test]
    fn test_from_initial_keeps_highest_generation() {
        let ctx = RunContext::from_initial(vec![
            Variable::new("a", 2, json!("new")),
            Variable::new("a", 1, json!("old")),
            Variable::new("b", 0, json!("b")),
        ]);
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.get("a").unwrap().value, json!("new"));
        assert_eq!(ctx.max_generation(), 2);
    }

    #[test]
    fn test_max_generation_empty() {
        assert_eq!(RunContext::new().max_generation(), 0);
        assert!(RunContext::new().is_empty());
    }

    #[test]
    fn test_filtered_view_hides_excluded() {
        let ctx = RunContext::from_initial(vec![
            Variable::new("a", 1, json!(1)),
            Variable::new("b", 1, json!(2)),
        ]);
        let excluded = HashSet::from(["b".to_string()]);
        let view = ctx.without(&excluded);
        assert!(view.contains("a"));
        assert!(!view.contains("b"));
        assert_eq!(view.value_of("b"), None);
        assert_eq!(view.value_of("a"), Some(json!(1)));
        // The underlying context is untouched.
        assert!(ctx.contains("b"));
    }

    #[test]
    fn test_snapshot_sorted_by_name() {
        let ctx = RunContext::from_initial(vec![
            Variable::new("c", 1, json!(3)),
            Variable::new("a", 1, json!(1)),
            Variable::new("b", 1, json!(2)),
        ]);
        let names: Vec<String> = ctx.snapshot().into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_clone_shares_entries() {
        let ctx = RunContext::new();
        let other = ctx.clone();
        other.try_update(Variable::new("a", 1, json!(1)));
        assert!(ctx.contains("a"));
    }
}
