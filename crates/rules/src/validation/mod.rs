//! Validation of condition trees and definitions with structured errors and
//! suggestions.
//!
//! Returns a [`ValidationResult`] with errors (block save) and warnings
//! (advisory). Unlike [`ConditionTypeRegistry::resolve`], which stops at the
//! first problem, validation reports everything it finds.

mod condition_checks;
mod definition_checks;

pub mod fuzzy;

use serde::{Deserialize, Serialize};

use crate::registry::ConditionTypeRegistry;
use crate::schema::{Condition, ScoringPlan, Segment};

// ── Result types ────────────────────────────────────────────────────

/// Overall validation outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

/// A blocking validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    /// Path-like location, e.g. `"condition.subConditions[1].typeId"`.
    pub path: String,
    pub message: String,
    /// Optional "Did you mean …?" suggestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// A non-blocking advisory warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationResult {
    pub(crate) fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        });
    }

    pub(crate) fn error_with_suggestion(
        &mut self,
        path: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) {
        self.valid = false;
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
            suggestion: Some(suggestion.into()),
        });
    }

    pub(crate) fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            path: path.into(),
            message: message.into(),
        });
    }

    /// One-line summary of the errors, for logs and error messages.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| match &e.suggestion {
                Some(s) => format!("{}: {} ({s})", e.path, e.message),
                None => format!("{}: {}", e.path, e.message),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ── Public API ──────────────────────────────────────────────────────

/// Validate a single condition tree.
pub fn validate_condition(
    condition: &Condition,
    registry: &ConditionTypeRegistry,
) -> ValidationResult {
    let mut result = ValidationResult::new();
    condition_checks::validate_tree(condition, registry, "condition", &mut result);
    result
}

/// Validate a segment definition.
pub fn validate_segment(segment: &Segment, registry: &ConditionTypeRegistry) -> ValidationResult {
    let mut result = ValidationResult::new();
    definition_checks::validate_metadata(&segment.metadata, &mut result);
    definition_checks::validate_segment(segment, registry, &mut result);
    result
}

/// Validate a scoring plan.
pub fn validate_scoring(plan: &ScoringPlan, registry: &ConditionTypeRegistry) -> ValidationResult {
    let mut result = ValidationResult::new();
    definition_checks::validate_metadata(&plan.metadata, &mut result);
    definition_checks::validate_scoring(plan, registry, &mut result);
    result
}

/// Parse a segment from YAML and validate it.
pub fn validate_segment_yaml(yaml: &str, registry: &ConditionTypeRegistry) -> ValidationResult {
    match serde_yaml::from_str::<Segment>(yaml) {
        Ok(segment) => validate_segment(&segment, registry),
        Err(e) => {
            let mut result = ValidationResult::new();
            result.error("", format!("YAML parse error: {e}"));
            result
        }
    }
}
