//! Condition type descriptors.
//!
//! Behaviour is dispatched on the `roleTags` a type carries, never on its id,
//! so new types only need the right tags to take part in derivation and
//! dependency analysis.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::condition::Condition;

/// Well-known role tags.
pub mod tags {
    /// Matches against event documents.
    pub const EVENT_CONDITION: &str = "event-condition";
    /// Matches against profile documents.
    pub const PROFILE_CONDITION: &str = "profile-condition";
    /// Matches against session documents.
    pub const SESSION_CONDITION: &str = "session-condition";
    /// Lists segment ids the profile must (not) belong to.
    pub const SEGMENT_REFERENCE: &str = "segment-membership-reference";
    /// Names a scoring plan whose score is compared.
    pub const SCORING_REFERENCE: &str = "scoring-reference";
    /// Counts historical events; needs a materialized counter.
    pub const PAST_EVENT: &str = "past-event";
    /// Boolean composition (`and`/`or`/`not`) of sub-conditions.
    pub const BOOLEAN: &str = "boolean";
}

/// Parameter names shared between the deriver, analyzer and matcher.
pub mod params {
    pub const SUB_CONDITIONS: &str = "subConditions";
    pub const SUB_CONDITION: &str = "subCondition";
    pub const OPERATOR: &str = "operator";
    pub const EVENT_CONDITION: &str = "eventCondition";
    pub const NUMBER_OF_DAYS: &str = "numberOfDays";
    pub const GENERATED_PROPERTY_KEY: &str = "generatedPropertyKey";
    pub const SEGMENTS: &str = "segments";
    pub const SCORING_PLAN_ID: &str = "scoringPlanId";
}

/// Value shape accepted by a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterKind {
    String,
    Integer,
    Boolean,
    Date,
    Condition,
    /// Anything; not checked.
    Object,
}

/// Declared parameter of a condition type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    #[serde(default)]
    pub multivalued: bool,
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    pub fn new(id: &str, kind: ParameterKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            multivalued: false,
            required: false,
        }
    }

    pub fn multivalued(mut self) -> Self {
        self.multivalued = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A known condition type.
///
/// Types other than the built-in ones are evaluated through their
/// `parentCondition`: a tree of known types in which scalar values of the form
/// `parameter::<name>` stand for the node's own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionType {
    pub id: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub role_tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_condition: Option<Condition>,
}

impl ConditionType {
    pub fn new(id: &str, role_tags: &[&str], parameters: Vec<ParameterSpec>) -> Self {
        Self {
            id: id.to_string(),
            parameters,
            role_tags: role_tags.iter().map(|t| t.to_string()).collect(),
            parent_condition: None,
        }
    }

    pub fn with_parent(mut self, parent: Condition) -> Self {
        self.parent_condition = Some(parent);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.role_tags.contains(tag)
    }

    pub fn parameter(&self, id: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.id == id)
    }
}

/// Operators accepted by property and scoring comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqualTo,
    LessThan,
    LessThanOrEqualTo,
    Between,
    Exists,
    Missing,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    All,
}

impl ComparisonOperator {
    pub const VARIANTS: &'static [ComparisonOperator] = &[
        Self::Equals,
        Self::NotEquals,
        Self::GreaterThan,
        Self::GreaterThanOrEqualTo,
        Self::LessThan,
        Self::LessThanOrEqualTo,
        Self::Between,
        Self::Exists,
        Self::Missing,
        Self::Contains,
        Self::NotContains,
        Self::StartsWith,
        Self::EndsWith,
        Self::In,
        Self::NotIn,
        Self::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "notEquals",
            Self::GreaterThan => "greaterThan",
            Self::GreaterThanOrEqualTo => "greaterThanOrEqualTo",
            Self::LessThan => "lessThan",
            Self::LessThanOrEqualTo => "lessThanOrEqualTo",
            Self::Between => "between",
            Self::Exists => "exists",
            Self::Missing => "missing",
            Self::Contains => "contains",
            Self::NotContains => "notContains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::In => "in",
            Self::NotIn => "notIn",
            Self::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::VARIANTS.iter().copied().find(|op| op.as_str() == s)
    }

    /// Whether the operator needs no comparison value.
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::Exists | Self::Missing)
    }
}

impl std::fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
