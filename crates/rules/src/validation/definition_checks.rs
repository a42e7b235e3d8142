//! Definition-level checks: metadata, conditions and self references.

use super::condition_checks::validate_tree;
use super::fuzzy::is_kebab_case;
use super::ValidationResult;
use crate::analyzer::{DependencyAnalyzer, ReferenceKind};
use crate::registry::ConditionTypeRegistry;
use crate::schema::{Condition, Metadata, ScoringPlan, Segment};

pub(super) fn validate_metadata(metadata: &Metadata, result: &mut ValidationResult) {
    if metadata.id.trim().is_empty() {
        result.error("id", "id must not be empty");
    } else if metadata.id.chars().any(char::is_whitespace) {
        result.error("id", format!("id must not contain whitespace, got '{}'", metadata.id));
    } else if !is_kebab_case(&metadata.id) {
        result.warn(
            "id",
            format!("ids are conventionally kebab-case, got '{}'", metadata.id),
        );
    }

    if metadata.name.trim().is_empty() {
        result.warn("name", "name is empty");
    }
    if metadata.scope.trim().is_empty() {
        result.error("scope", "scope must not be empty");
    }
}

pub(super) fn validate_segment(
    segment: &Segment,
    registry: &ConditionTypeRegistry,
    result: &mut ValidationResult,
) {
    let Some(condition) = &segment.condition else {
        if segment.metadata.enabled {
            result.warn("condition", "enabled segment has no condition and matches nobody");
        }
        return;
    };
    validate_tree(condition, registry, "condition", result);
    check_self_reference(condition, ReferenceKind::Segment, segment.id(), "condition", registry, result);
}

pub(super) fn validate_scoring(
    plan: &ScoringPlan,
    registry: &ConditionTypeRegistry,
    result: &mut ValidationResult,
) {
    if plan.elements.is_empty() {
        result.warn("elements", "scoring plan has no elements");
    }
    for (i, element) in plan.elements.iter().enumerate() {
        let path = format!("elements[{i}].condition");
        if element.value == 0 {
            result.warn(format!("elements[{i}].value"), "element adds nothing to the score");
        }
        validate_tree(&element.condition, registry, &path, result);
        check_self_reference(&element.condition, ReferenceKind::Scoring, plan.id(), &path, registry, result);
    }
}

fn check_self_reference(
    condition: &Condition,
    kind: ReferenceKind,
    own_id: &str,
    path: &str,
    registry: &ConditionTypeRegistry,
    result: &mut ValidationResult,
) {
    // Depth problems are already reported by the tree check.
    if let Ok(true) = DependencyAnalyzer::new(registry).impacts(condition, kind, own_id) {
        result.error(path, format!("definition '{own_id}' references itself"));
    }
}
