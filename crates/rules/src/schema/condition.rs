//! The condition tree value type.

use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConditionError, Result};

/// A typed, named predicate tree.
///
/// Equality and hashing are structural and order-sensitive: two trees are
/// equal only if they carry the same `typeId` and the same parameters in the
/// same order. Synthetic rule keys depend on this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Condition {
    pub type_id: String,
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterValue>,
}

/// A parameter value: a nested condition, a sequence of conditions, or a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Condition(Box<Condition>),
    Conditions(Vec<Condition>),
    Scalar(Value),
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.parameters.iter().eq(other.parameters.iter())
    }
}

impl Eq for Condition {}

impl Hash for Condition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.parameters.len().hash(state);
        for (name, value) in &self.parameters {
            name.hash(state);
            value.hash(state);
        }
    }
}

impl Hash for ParameterValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ParameterValue::Condition(c) => c.hash(state),
            ParameterValue::Conditions(cs) => cs.hash(state),
            ParameterValue::Scalar(v) => v.to_string().hash(state),
        }
    }
}

impl From<Condition> for ParameterValue {
    fn from(c: Condition) -> Self {
        ParameterValue::Condition(Box::new(c))
    }
}

impl From<Vec<Condition>> for ParameterValue {
    fn from(cs: Vec<Condition>) -> Self {
        ParameterValue::Conditions(cs)
    }
}

impl From<Value> for ParameterValue {
    fn from(v: Value) -> Self {
        ParameterValue::Scalar(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(s: &str) -> Self {
        ParameterValue::Scalar(Value::from(s))
    }
}

impl From<String> for ParameterValue {
    fn from(s: String) -> Self {
        ParameterValue::Scalar(Value::from(s))
    }
}

impl From<i64> for ParameterValue {
    fn from(n: i64) -> Self {
        ParameterValue::Scalar(Value::from(n))
    }
}

impl From<i32> for ParameterValue {
    fn from(n: i32) -> Self {
        ParameterValue::Scalar(Value::from(n))
    }
}

impl From<u32> for ParameterValue {
    fn from(n: u32) -> Self {
        ParameterValue::Scalar(Value::from(n))
    }
}

impl From<bool> for ParameterValue {
    fn from(b: bool) -> Self {
        ParameterValue::Scalar(Value::from(b))
    }
}

/// Prefix marking a parent-condition value that refers to a parameter.
pub const PARAMETER_REFERENCE: &str = "parameter::";

impl ParameterValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            ParameterValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.as_scalar()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// A list of strings, or a single string promoted to a one-element list.
    pub fn as_strings(&self) -> Option<Vec<String>> {
        match self {
            ParameterValue::Scalar(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect(),
            ParameterValue::Scalar(Value::String(s)) => Some(vec![s.clone()]),
            // `[]` deserializes as an empty condition sequence.
            ParameterValue::Conditions(cs) if cs.is_empty() => Some(Vec::new()),
            _ => None,
        }
    }

    pub fn as_condition(&self) -> Option<&Condition> {
        match self {
            ParameterValue::Condition(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_conditions(&self) -> Option<&[Condition]> {
        match self {
            ParameterValue::Conditions(cs) => Some(cs),
            _ => None,
        }
    }

    /// Every condition directly held by this value, in order.
    pub fn conditions(&self) -> Vec<&Condition> {
        match self {
            ParameterValue::Condition(c) => vec![c.as_ref()],
            ParameterValue::Conditions(cs) => cs.iter().collect(),
            ParameterValue::Scalar(_) => Vec::new(),
        }
    }

    fn substitute(&self, values: &IndexMap<String, ParameterValue>) -> ParameterValue {
        match self {
            ParameterValue::Condition(c) => {
                ParameterValue::Condition(Box::new(c.substitute_parameters(values)))
            }
            ParameterValue::Conditions(cs) => {
                ParameterValue::Conditions(cs.iter().map(|c| c.substitute_parameters(values)).collect())
            }
            ParameterValue::Scalar(Value::String(s)) => match s.strip_prefix(PARAMETER_REFERENCE) {
                Some(name) => values
                    .get(name)
                    .cloned()
                    .unwrap_or(ParameterValue::Scalar(Value::Null)),
                None => self.clone(),
            },
            ParameterValue::Scalar(_) => self.clone(),
        }
    }
}

impl Condition {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            parameters: IndexMap::new(),
        }
    }

    /// Builder-style parameter setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// `booleanCondition` with operator `and`.
    pub fn and(sub_conditions: Vec<Condition>) -> Self {
        Condition::new("booleanCondition")
            .with("operator", "and")
            .with("subConditions", sub_conditions)
    }

    /// `booleanCondition` with operator `or`.
    pub fn or(sub_conditions: Vec<Condition>) -> Self {
        Condition::new("booleanCondition")
            .with("operator", "or")
            .with("subConditions", sub_conditions)
    }

    /// `notCondition` wrapping `inner`.
    pub fn not(inner: Condition) -> Self {
        Condition::new("notCondition").with("subCondition", inner)
    }

    pub fn match_all() -> Self {
        Condition::new("matchAllCondition")
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters.get(name)
    }

    /// Set a parameter in place. An existing key keeps its position.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.parameters.insert(name.into(), value.into());
    }

    pub fn remove_parameter(&mut self, name: &str) -> Option<ParameterValue> {
        self.parameters.shift_remove(name)
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.parameter(name).and_then(ParameterValue::as_str)
    }

    pub fn param_i64(&self, name: &str) -> Option<i64> {
        self.parameter(name).and_then(ParameterValue::as_i64)
    }

    pub fn param_strings(&self, name: &str) -> Option<Vec<String>> {
        self.parameter(name).and_then(ParameterValue::as_strings)
    }

    pub fn param_condition(&self, name: &str) -> Option<&Condition> {
        self.parameter(name).and_then(ParameterValue::as_condition)
    }

    pub fn param_conditions(&self, name: &str) -> Option<&[Condition]> {
        self.parameter(name).and_then(ParameterValue::as_conditions)
    }

    /// Direct children across every parameter, in parameter order.
    pub fn children(&self) -> impl Iterator<Item = &Condition> {
        self.parameters.values().flat_map(ParameterValue::conditions)
    }

    /// Pre-order walk over the tree, visiting `(node, depth)`.
    ///
    /// Fails with [`ConditionError::TooDeep`] instead of descending past
    /// `max_depth`, so malformed trees are rejected rather than followed.
    pub fn walk<F>(&self, max_depth: usize, visitor: &mut F) -> Result<()>
    where
        F: FnMut(&Condition, usize),
    {
        self.walk_at(0, max_depth, visitor)
    }

    fn walk_at<F>(&self, depth: usize, max_depth: usize, visitor: &mut F) -> Result<()>
    where
        F: FnMut(&Condition, usize),
    {
        if depth > max_depth {
            return Err(ConditionError::TooDeep { max_depth });
        }
        visitor(self, depth);
        for child in self.children() {
            child.walk_at(depth + 1, max_depth, visitor)?;
        }
        Ok(())
    }

    /// Copy of the tree with every `parameter::<name>` scalar replaced by the
    /// value `values` holds under `<name>`. Unknown names become null.
    pub fn substitute_parameters(&self, values: &IndexMap<String, ParameterValue>) -> Condition {
        let parameters = self
            .parameters
            .iter()
            .map(|(name, value)| (name.clone(), value.substitute(values)))
            .collect();
        Condition {
            type_id: self.type_id.clone(),
            parameters,
        }
    }

    /// Number of levels in the tree, bounded by `max_depth`.
    pub fn depth(&self, max_depth: usize) -> Result<usize> {
        let mut deepest = 0;
        self.walk(max_depth, &mut |_, d| deepest = deepest.max(d))?;
        Ok(deepest + 1)
    }
}
