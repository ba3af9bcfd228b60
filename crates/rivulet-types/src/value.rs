//! Generation-tagged values and the type tags used to describe step inputs
//! and outputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Variable
// ---------------------------------------------------------------------------

/// A value produced by one execution of a step.
///
/// `name` is the producing step's name. `generation` is assigned by the
/// scheduler when the producing run was enqueued; within a run a higher
/// generation always supersedes a lower one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Name of the step that produced this value.
    pub name: String,
    /// Generation of the run that produced this value.
    pub generation: u64,
    /// The payload.
    pub value: Value,
}

impl Variable {
    pub fn new(name: impl Into<String>, generation: u64, value: Value) -> Self {
        Self {
            name: name.into(),
            generation,
            value,
        }
    }

    /// A caller-supplied initial value. Generation 0 is below anything the
    /// scheduler assigns.
    pub fn initial(name: impl Into<String>, value: Value) -> Self {
        Self::new(name, 0, value)
    }

    /// Returns true if this value should replace `current` in a context.
    pub fn supersedes(&self, current: &Variable) -> bool {
        self.generation > current.generation
    }
}

// ---------------------------------------------------------------------------
// ValueType
// ---------------------------------------------------------------------------

/// Semantic type tag for a parameter or a step output.
///
/// Checked against JSON payloads at invocation time and usable as a
/// serialization hint by transports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Any,
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl ValueType {
    /// Whether `value` conforms to this type tag.
    ///
    /// `Number` accepts integers; `Integer` only accepts JSON numbers with
    /// no fractional representation.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::Null => value.is_null(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Number => value.is_number(),
            ValueType::String => value.is_string(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }

    /// Type tag describing an arbitrary JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueType::Integer,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
            Value::Object(_) => ValueType::Object,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValueType::Any => "any",
            ValueType::Null => "null",
            ValueType::Boolean => "boolean",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ParamSource
// ---------------------------------------------------------------------------

/// Where a parameter's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamSource {
    /// Supplied externally, keyed by the parameter's own name.
    Input,
    /// The output of another step.
    Step { step: String },
    /// The owning step's own previous output. Used to express loops.
    Feedback,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn supersedes_requires_strictly_higher_generation() {
        let old = Variable::new("count", 3, json!(1));
        let same = Variable::new("count", 3, json!(2));
        let newer = Variable::new("count", 4, json!(3));
        assert!(!same.supersedes(&old));
        assert!(newer.supersedes(&old));
        assert!(!old.supersedes(&newer));
    }

    #[test]
    fn initial_values_start_at_generation_zero() {
        let v = Variable::initial("seed", json!("x"));
        assert_eq!(v.generation, 0);
        assert_eq!(v.name, "seed");
    }

    #[test]
    fn value_type_matches() {
        assert!(ValueType::Any.matches(&json!({"a": 1})));
        assert!(ValueType::Integer.matches(&json!(3)));
        assert!(!ValueType::Integer.matches(&json!(3.5)));
        assert!(ValueType::Number.matches(&json!(3)));
        assert!(ValueType::Number.matches(&json!(3.5)));
        assert!(ValueType::String.matches(&json!("s")));
        assert!(!ValueType::String.matches(&json!(1)));
        assert!(ValueType::Null.matches(&Value::Null));
        assert!(ValueType::Array.matches(&json!([1, 2])));
        assert!(ValueType::Object.matches(&json!({})));
        assert!(ValueType::Boolean.matches(&json!(false)));
    }

    #[test]
    fn value_type_of_json() {
        assert_eq!(ValueType::of(&json!(1)), ValueType::Integer);
        assert_eq!(ValueType::of(&json!(1.25)), ValueType::Number);
        assert_eq!(ValueType::of(&json!("a")), ValueType::String);
        assert_eq!(ValueType::of(&json!(null)), ValueType::Null);
    }

    #[test]
    fn param_source_serializes_with_kind_tag() {
        let json = serde_json::to_value(ParamSource::Step { step: "a".into() }).unwrap();
        assert_eq!(json, json!({"kind": "step", "step": "a"}));
        let parsed: ParamSource = serde_json::from_value(json!({"kind": "feedback"})).unwrap();
        assert_eq!(parsed, ParamSource::Feedback);
    }

    #[test]
    fn variable_serde_roundtrip() {
        let v = Variable::new("b", 7, json!({"text": "ab"}));
        let s = serde_json::to_string(&v).unwrap();
        let parsed: Variable = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed, v);
    }
}
