//! Condition type registry and tree resolution.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{ConditionError, Result};
use crate::schema::{params, tags, Condition, ConditionType, ParameterKind, ParameterSpec};

/// Depth bound used when none is configured.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Lookup table from condition type id to its descriptor.
#[derive(Debug, Clone)]
pub struct ConditionTypeRegistry {
    types: HashMap<String, Arc<ConditionType>>,
    max_depth: usize,
}

impl ConditionTypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// A registry pre-loaded with the built-in catalogue.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for ct in builtin_types() {
            registry.register(ct);
        }
        registry
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Add or replace a type.
    pub fn register(&mut self, condition_type: ConditionType) {
        debug!(type_id = %condition_type.id, "registered condition type");
        self.types
            .insert(condition_type.id.clone(), Arc::new(condition_type));
    }

    /// Register every type listed in a YAML sequence. Returns how many were added.
    ///
    /// Parent conditions are resolved once the whole catalogue is registered,
    /// so types in one file may build on each other.
    pub fn load_yaml(&mut self, yaml: &str) -> Result<usize> {
        let types: Vec<ConditionType> = serde_yaml::from_str(yaml)?;
        let count = types.len();
        let mut parents = Vec::new();
        for ct in types {
            if let Some(parent) = &ct.parent_condition {
                parents.push((ct.id.clone(), parent.clone()));
            }
            self.register(ct);
        }
        for (type_id, parent) in &parents {
            self.resolve_at(parent, &format!("{type_id}.parentCondition"), 0)?;
        }
        Ok(count)
    }

    /// Register every type listed in a YAML catalogue file.
    pub fn load_yaml_file(&mut self, path: &Path) -> Result<usize> {
        let yaml = std::fs::read_to_string(path)?;
        let added = self.load_yaml(&yaml)?;
        debug!(path = %path.display(), added, "loaded condition type catalogue");
        Ok(added)
    }

    pub fn get(&self, type_id: &str) -> Option<&ConditionType> {
        self.types.get(type_id).map(Arc::as_ref)
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.types.contains_key(type_id)
    }

    /// Sorted list of known type ids.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.types.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Whether the node's type carries `tag`. Unknown types carry nothing.
    pub fn has_tag(&self, condition: &Condition, tag: &str) -> bool {
        self.get(&condition.type_id)
            .map(|ct| ct.has_tag(tag))
            .unwrap_or(false)
    }

    /// True if the tree only ever looks at event documents: an event-tagged,
    /// non-profile leaf, or a boolean composition made only of such leaves.
    pub fn is_event_only(&self, condition: &Condition) -> bool {
        let Some(ct) = self.get(&condition.type_id) else {
            return false;
        };
        if ct.has_tag(tags::BOOLEAN) {
            let mut children = condition.children().peekable();
            children.peek().is_some() && children.all(|c| self.is_event_only(c))
        } else {
            ct.has_tag(tags::EVENT_CONDITION) && !ct.has_tag(tags::PROFILE_CONDITION)
        }
    }

    /// The node rewritten into its type's parent condition, with parameter
    /// references filled in. `None` for unknown types and types without one.
    pub fn expand(&self, condition: &Condition) -> Option<Condition> {
        self.get(&condition.type_id)?
            .parent_condition
            .as_ref()
            .map(|parent| parent.substitute_parameters(&condition.parameters))
    }

    /// Check that every node's type is known and required parameters are
    /// present, then return the tree. Stops at the first problem.
    pub fn resolve(&self, condition: &Condition) -> Result<Condition> {
        self.resolve_at(condition, "condition", 0)?;
        Ok(condition.clone())
    }

    fn resolve_at(&self, condition: &Condition, path: &str, depth: usize) -> Result<()> {
        if depth > self.max_depth {
            return Err(ConditionError::TooDeep {
                max_depth: self.max_depth,
            });
        }
        let ct = self
            .get(&condition.type_id)
            .ok_or_else(|| ConditionError::UnresolvedType {
                type_id: condition.type_id.clone(),
                path: path.to_string(),
            })?;

        for spec in ct.parameters.iter().filter(|p| p.required) {
            if !condition.parameters.contains_key(&spec.id) {
                return Err(ConditionError::MissingParameter {
                    type_id: ct.id.clone(),
                    parameter: spec.id.clone(),
                    path: path.to_string(),
                });
            }
        }

        for (name, value) in &condition.parameters {
            for (i, child) in value.conditions().into_iter().enumerate() {
                let child_path = if value.as_conditions().is_some() {
                    format!("{path}.{name}[{i}]")
                } else {
                    format!("{path}.{name}")
                };
                self.resolve_at(child, &child_path, depth + 1)?;
            }
        }
        Ok(())
    }
}

impl Default for ConditionTypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn property_parameters() -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::new("propertyName", ParameterKind::String).required(),
        ParameterSpec::new("comparisonOperator", ParameterKind::String).required(),
        ParameterSpec::new("propertyValue", ParameterKind::String),
        ParameterSpec::new("propertyValueInteger", ParameterKind::Integer),
        ParameterSpec::new("propertyValueDate", ParameterKind::Date),
        ParameterSpec::new("propertyValues", ParameterKind::Object).multivalued(),
    ]
}

/// The built-in catalogue.
pub fn builtin_types() -> Vec<ConditionType> {
    use tags::*;

    vec![
        ConditionType::new(
            "booleanCondition",
            &[BOOLEAN, PROFILE_CONDITION, EVENT_CONDITION, SESSION_CONDITION],
            vec![
                ParameterSpec::new(params::OPERATOR, ParameterKind::String).required(),
                ParameterSpec::new(params::SUB_CONDITIONS, ParameterKind::Condition)
                    .multivalued()
                    .required(),
            ],
        ),
        ConditionType::new(
            "notCondition",
            &[BOOLEAN, PROFILE_CONDITION, EVENT_CONDITION, SESSION_CONDITION],
            vec![ParameterSpec::new(params::SUB_CONDITION, ParameterKind::Condition).required()],
        ),
        ConditionType::new(
            "matchAllCondition",
            &[PROFILE_CONDITION, EVENT_CONDITION, SESSION_CONDITION],
            vec![],
        ),
        ConditionType::new("profilePropertyCondition", &[PROFILE_CONDITION], property_parameters()),
        ConditionType::new("sessionPropertyCondition", &[SESSION_CONDITION], property_parameters()),
        ConditionType::new("eventPropertyCondition", &[EVENT_CONDITION], property_parameters()),
        ConditionType::new(
            "eventTypeCondition",
            &[EVENT_CONDITION],
            vec![ParameterSpec::new("eventTypeId", ParameterKind::String).required()],
        ),
        ConditionType::new(
            "pastEventCondition",
            &[PROFILE_CONDITION, PAST_EVENT],
            vec![
                ParameterSpec::new(params::EVENT_CONDITION, ParameterKind::Condition).required(),
                ParameterSpec::new(params::NUMBER_OF_DAYS, ParameterKind::Integer),
                ParameterSpec::new("minimumEventCount", ParameterKind::Integer),
                ParameterSpec::new("maximumEventCount", ParameterKind::Integer),
                ParameterSpec::new(params::GENERATED_PROPERTY_KEY, ParameterKind::String),
            ],
        ),
        ConditionType::new(
            "profileSegmentCondition",
            &[PROFILE_CONDITION, SEGMENT_REFERENCE],
            vec![
                ParameterSpec::new(params::SEGMENTS, ParameterKind::String)
                    .multivalued()
                    .required(),
                ParameterSpec::new("matchType", ParameterKind::String),
            ],
        ),
        ConditionType::new(
            "scoringCondition",
            &[PROFILE_CONDITION, SCORING_REFERENCE],
            vec![
                ParameterSpec::new(params::SCORING_PLAN_ID, ParameterKind::String).required(),
                ParameterSpec::new("scoreValue", ParameterKind::Integer),
                ParameterSpec::new("comparisonOperator", ParameterKind::String),
            ],
        ),
    ]
}
