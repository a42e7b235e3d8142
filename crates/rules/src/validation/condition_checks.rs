//! Condition tree checks: known types, required and declared parameters,
//! parameter shapes, operators and depth.

use serde_json::Value;

use super::fuzzy::fuzzy_match;
use super::ValidationResult;
use crate::registry::ConditionTypeRegistry;
use crate::schema::{
    params, tags, ComparisonOperator, Condition, ParameterKind, ParameterSpec, ParameterValue,
};

const BOOLEAN_OPERATORS: &[&str] = &["and", "or"];

pub(super) fn validate_tree(
    condition: &Condition,
    registry: &ConditionTypeRegistry,
    path: &str,
    result: &mut ValidationResult,
) {
    validate_node(condition, registry, path, 0, result);
}

fn validate_node(
    condition: &Condition,
    registry: &ConditionTypeRegistry,
    path: &str,
    depth: usize,
    result: &mut ValidationResult,
) {
    if depth > registry.max_depth() {
        result.error(
            path,
            format!("condition nesting exceeds {} levels", registry.max_depth()),
        );
        return;
    }

    let Some(ct) = registry.get(&condition.type_id) else {
        let known = registry.ids();
        let type_path = format!("{path}.typeId");
        let message = format!("unknown condition type '{}'", condition.type_id);
        match fuzzy_match(&condition.type_id, &known) {
            Some(s) => result.error_with_suggestion(type_path, message, format!("Did you mean '{s}'?")),
            None => result.error(type_path, message),
        }
        // Children are still checked so every problem surfaces at once.
        visit_children(condition, registry, path, depth, result);
        return;
    };

    for spec in ct.parameters.iter().filter(|p| p.required) {
        if !condition.parameters.contains_key(&spec.id) {
            result.error(
                format!("{path}.parameters.{}", spec.id),
                format!("'{}' requires parameter '{}'", ct.id, spec.id),
            );
        }
    }

    for (name, value) in &condition.parameters {
        let param_path = format!("{path}.parameters.{name}");
        match ct.parameter(name) {
            Some(spec) => check_shape(spec, value, &param_path, result),
            None => {
                let declared: Vec<&str> = ct.parameters.iter().map(|p| p.id.as_str()).collect();
                let message = format!("'{}' does not declare parameter '{name}'", ct.id);
                match fuzzy_match(name, &declared) {
                    Some(s) => result.warn(param_path, format!("{message}; did you mean '{s}'?")),
                    None => result.warn(param_path, message),
                }
            }
        }
    }

    if ct.has_tag(tags::BOOLEAN) {
        if let Some(op) = condition.param_str(params::OPERATOR) {
            if !BOOLEAN_OPERATORS.contains(&op) {
                result.error(
                    format!("{path}.parameters.{}", params::OPERATOR),
                    format!("boolean operator must be 'and' or 'or', got '{op}'"),
                );
            }
        }
        if let Some(subs) = condition.param_conditions(params::SUB_CONDITIONS) {
            if subs.is_empty() {
                result.warn(
                    format!("{path}.parameters.{}", params::SUB_CONDITIONS),
                    "empty composition",
                );
            }
        }
    }

    check_comparison(condition, path, result);

    if ct.has_tag(tags::PAST_EVENT) {
        let has_event_condition = condition
            .parameters
            .values()
            .filter_map(ParameterValue::as_condition)
            .any(|c| registry.is_event_only(c));
        if !has_event_condition {
            result.error(
                path,
                format!("'{}' needs a nested condition that only matches events", ct.id),
            );
        }
    }

    visit_children(condition, registry, path, depth, result);
}

fn visit_children(
    condition: &Condition,
    registry: &ConditionTypeRegistry,
    path: &str,
    depth: usize,
    result: &mut ValidationResult,
) {
    for (name, value) in &condition.parameters {
        match value {
            ParameterValue::Condition(child) => {
                validate_node(child, registry, &format!("{path}.{name}"), depth + 1, result)
            }
            ParameterValue::Conditions(children) => {
                for (i, child) in children.iter().enumerate() {
                    validate_node(child, registry, &format!("{path}.{name}[{i}]"), depth + 1, result);
                }
            }
            ParameterValue::Scalar(_) => {}
        }
    }
}

fn check_comparison(condition: &Condition, path: &str, result: &mut ValidationResult) {
    let Some(op) = condition.param_str("comparisonOperator") else {
        return;
    };
    let op_path = format!("{path}.parameters.comparisonOperator");
    let Some(parsed) = ComparisonOperator::parse(op) else {
        let known: Vec<&str> = ComparisonOperator::VARIANTS.iter().map(|o| o.as_str()).collect();
        let message = format!("unknown comparison operator '{op}'");
        match fuzzy_match(op, &known) {
            Some(s) => result.error_with_suggestion(op_path, message, format!("Did you mean '{s}'?")),
            None => result.error(op_path, message),
        }
        return;
    };

    let has_value = condition.parameters.keys().any(|k| k.starts_with("propertyValue"))
        || condition.parameters.contains_key("scoreValue");
    if !parsed.is_unary() && !has_value && condition.parameters.contains_key("propertyName") {
        result.warn(path, format!("operator '{op}' has no value to compare with"));
    }
}

fn check_shape(spec: &ParameterSpec, value: &ParameterValue, path: &str, result: &mut ValidationResult) {
    match (spec.kind, value) {
        (ParameterKind::Object, _) => {}
        (ParameterKind::Condition, ParameterValue::Condition(_)) if !spec.multivalued => {}
        (ParameterKind::Condition, ParameterValue::Conditions(_)) if spec.multivalued => {}
        (ParameterKind::Condition, _) => result.error(
            path,
            if spec.multivalued {
                "expected a list of conditions"
            } else {
                "expected a single condition"
            },
        ),
        // An empty YAML list deserializes as an empty condition list.
        (_, ParameterValue::Conditions(c)) if c.is_empty() && spec.multivalued => {}
        (kind, ParameterValue::Scalar(v)) => check_scalar(kind, spec.multivalued, v, path, result),
        (kind, _) => result.error(path, format!("expected {}, got a condition", describe(kind))),
    }
}

fn check_scalar(kind: ParameterKind, multivalued: bool, value: &Value, path: &str, result: &mut ValidationResult) {
    if value.is_null() {
        return;
    }
    match value {
        Value::Array(items) if multivalued => {
            for (i, item) in items.iter().enumerate() {
                if !scalar_fits(kind, item) {
                    result.error(format!("{path}[{i}]"), format!("expected {}", describe(kind)));
                }
            }
        }
        // A single value is accepted where a list is allowed.
        v if scalar_fits(kind, v) => {}
        _ => result.error(path, format!("expected {}", describe(kind))),
    }
}

fn scalar_fits(kind: ParameterKind, value: &Value) -> bool {
    match kind {
        ParameterKind::String => value.is_string(),
        ParameterKind::Integer => value.is_i64() || value.is_u64(),
        ParameterKind::Boolean => value.is_boolean(),
        ParameterKind::Date => value
            .as_str()
            .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false),
        ParameterKind::Condition => false,
        ParameterKind::Object => true,
    }
}

fn describe(kind: ParameterKind) -> &'static str {
    match kind {
        ParameterKind::String => "a string",
        ParameterKind::Integer => "an integer",
        ParameterKind::Boolean => "a boolean",
        ParameterKind::Date => "an RFC 3339 date",
        ParameterKind::Condition => "a condition",
        ParameterKind::Object => "a value",
    }
}
