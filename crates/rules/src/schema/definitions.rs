//! Segment, scoring plan and synthetic counter rule definitions.

use std::collections::BTreeSet;

use cohort_core::{Item, ItemType};
use serde::{Deserialize, Serialize};

use super::Condition;

/// Shared header of segment and scoring definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub id: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Metadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope: default_scope(),
            name: name.into(),
            description: None,
            enabled: true,
        }
    }
}

pub(crate) fn default_true() -> bool {
    true
}

fn default_scope() -> String {
    "systemscope".to_string()
}

/// A named group of profiles defined by a condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    #[serde(flatten)]
    pub metadata: Metadata,
    /// `None` only for a disabled segment whose tree was emptied by a cascade.
    #[serde(default)]
    pub condition: Option<Condition>,
}

impl Segment {
    pub fn new(id: impl Into<String>, name: impl Into<String>, condition: Condition) -> Self {
        Self {
            metadata: Metadata::new(id, name),
            condition: Some(condition),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

impl Item for Segment {
    const ITEM_TYPE: ItemType = ItemType::Segment;

    fn item_id(&self) -> &str {
        &self.metadata.id
    }
}

/// One weighted condition of a scoring plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringElement {
    pub condition: Condition,
    pub value: i64,
}

/// A numeric ranking built from weighted conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringPlan {
    #[serde(flatten)]
    pub metadata: Metadata,
    #[serde(default)]
    pub elements: Vec<ScoringElement>,
}

impl ScoringPlan {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::new(id, name),
            elements: Vec::new(),
        }
    }

    pub fn with_element(mut self, condition: Condition, value: i64) -> Self {
        self.elements.push(ScoringElement { condition, value });
        self
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

impl Item for ScoringPlan {
    const ITEM_TYPE: ItemType = ItemType::Scoring;

    fn item_id(&self) -> &str {
        &self.metadata.id
    }
}

/// Hidden rule materializing a past-event count into profiles.
///
/// Shared by every definition referencing the same (event condition, window)
/// pair. `linked_items` is never empty while the rule is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticCounterRule {
    pub key: String,
    pub event_condition: Condition,
    #[serde(default)]
    pub window_days: Option<u32>,
    #[serde(default = "default_true")]
    pub hidden: bool,
    #[serde(default)]
    pub linked_items: BTreeSet<String>,
}

impl Item for SyntheticCounterRule {
    const ITEM_TYPE: ItemType = ItemType::Rule;

    fn item_id(&self) -> &str {
        &self.key
    }
}

/// Definitions that reference a given segment or scoring id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentMetadata {
    pub segments: Vec<Metadata>,
    pub scorings: Vec<Metadata>,
}

impl DependentMetadata {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.scorings.is_empty()
    }
}
