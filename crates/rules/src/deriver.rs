//! Derivation of synthetic counter rules from past-event conditions.
//!
//! A past-event condition cannot be evaluated against a profile directly: it
//! needs the number of matching events the profile produced, optionally within
//! a window. The deriver finds every such condition in a definition, gives its
//! (event condition, window) pair a deterministic key, annotates the parent
//! with that key under `generatedPropertyKey`, and works out which counter
//! rules must be created, linked, unlinked or deleted.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{ConditionError, Result};
use crate::registry::ConditionTypeRegistry;
use crate::schema::{params, tags, Condition, ParameterValue, SyntheticCounterRule};

/// Prefix of every synthetic counter key.
pub const COUNTER_KEY_PREFIX: &str = "eventTriggered";

/// A counter a definition needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedCounter {
    pub key: String,
    pub event_condition: Condition,
    pub window_days: Option<u32>,
}

#[derive(Serialize)]
struct CounterIdentity<'a> {
    condition: &'a Condition,
    #[serde(rename = "numberOfDays")]
    number_of_days: Option<u32>,
}

/// Deterministic key for an (event condition, window) pair.
///
/// Structurally equal conditions with the same window always map to the same
/// key, so counters are shared across definitions.
pub fn counter_key(event_condition: &Condition, window_days: Option<u32>) -> Result<String> {
    let canonical = serde_json::to_string(&CounterIdentity {
        condition: event_condition,
        number_of_days: window_days,
    })?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(format!("{COUNTER_KEY_PREFIX}{digest:x}"))
}

/// Find the counters `condition` needs and annotate each past-event node with
/// its `generatedPropertyKey`. Duplicates within one tree collapse to one entry.
pub fn derive_counters(
    condition: &mut Condition,
    registry: &ConditionTypeRegistry,
) -> Result<Vec<DerivedCounter>> {
    let mut found = Vec::new();
    visit(condition, registry, 0, &mut found)?;

    let mut seen = BTreeSet::new();
    found.retain(|c: &DerivedCounter| seen.insert(c.key.clone()));
    Ok(found)
}

fn visit(
    node: &mut Condition,
    registry: &ConditionTypeRegistry,
    depth: usize,
    found: &mut Vec<DerivedCounter>,
) -> Result<()> {
    if depth > registry.max_depth() {
        return Err(ConditionError::TooDeep {
            max_depth: registry.max_depth(),
        });
    }

    let past_event = registry.has_tag(node, tags::PAST_EVENT);
    let mut event_param: Option<String> = None;

    if past_event {
        // Shape-agnostic: the first single-condition parameter that only
        // looks at events is the counted condition.
        event_param = node
            .parameters
            .iter()
            .find(|(_, v)| {
                v.as_condition()
                    .map(|c| registry.is_event_only(c))
                    .unwrap_or(false)
            })
            .map(|(name, _)| name.clone());

        if let Some(name) = &event_param {
            let window_days = window_of(node)?;
            let event_condition = node
                .param_condition(name)
                .cloned()
                .ok_or_else(|| ConditionError::InvalidParameter {
                    type_id: node.type_id.clone(),
                    parameter: name.clone(),
                    reason: "expected a condition".to_string(),
                })?;
            let key = counter_key(&event_condition, window_days)?;
            node.set_parameter(params::GENERATED_PROPERTY_KEY, key.clone());
            found.push(DerivedCounter {
                key,
                event_condition,
                window_days,
            });
        }
    }

    for (name, value) in node.parameters.iter_mut() {
        if event_param.as_deref() == Some(name.as_str()) {
            continue;
        }
        match value {
            ParameterValue::Condition(child) => visit(child, registry, depth + 1, found)?,
            ParameterValue::Conditions(children) => {
                for child in children.iter_mut() {
                    visit(child, registry, depth + 1, found)?;
                }
            }
            ParameterValue::Scalar(_) => {}
        }
    }
    Ok(())
}

fn window_of(node: &Condition) -> Result<Option<u32>> {
    match node.parameter(params::NUMBER_OF_DAYS) {
        None => Ok(None),
        Some(ParameterValue::Scalar(serde_json::Value::Null)) => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| ConditionError::InvalidParameter {
                type_id: node.type_id.clone(),
                parameter: params::NUMBER_OF_DAYS.to_string(),
                reason: "expected a non-negative integer".to_string(),
            }),
    }
}

/// Changes to the counter rule store implied by one definition write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleLinkPlan {
    /// New rules, linked only to the definition. Need a backfill.
    pub created: Vec<SyntheticCounterRule>,
    /// Existing rules that gained the definition as a link.
    pub linked: Vec<SyntheticCounterRule>,
    /// Existing rules that lost the definition but keep other links.
    pub unlinked: Vec<SyntheticCounterRule>,
    /// Keys of rules that lost their last link.
    pub deleted: Vec<String>,
}

impl RuleLinkPlan {
    /// Compare what `definition_id` now needs with the stored rules.
    ///
    /// Pass an empty `derived` slice when the definition is being removed.
    pub fn compute(
        definition_id: &str,
        derived: &[DerivedCounter],
        existing: &[SyntheticCounterRule],
    ) -> Self {
        let by_key: HashMap<&str, &SyntheticCounterRule> =
            existing.iter().map(|r| (r.key.as_str(), r)).collect();
        let wanted: BTreeSet<&str> = derived.iter().map(|d| d.key.as_str()).collect();

        let mut plan = RuleLinkPlan::default();

        for counter in derived {
            match by_key.get(counter.key.as_str()) {
                Some(rule) if rule.linked_items.contains(definition_id) => {}
                Some(rule) => {
                    let mut rule = (*rule).clone();
                    rule.linked_items.insert(definition_id.to_string());
                    plan.linked.push(rule);
                }
                None => plan.created.push(SyntheticCounterRule {
                    key: counter.key.clone(),
                    event_condition: counter.event_condition.clone(),
                    window_days: counter.window_days,
                    hidden: true,
                    linked_items: BTreeSet::from([definition_id.to_string()]),
                }),
            }
        }

        for rule in existing {
            if rule.linked_items.contains(definition_id) && !wanted.contains(rule.key.as_str()) {
                let mut rule = rule.clone();
                rule.linked_items.remove(definition_id);
                if rule.linked_items.is_empty() {
                    plan.deleted.push(rule.key);
                } else {
                    plan.unlinked.push(rule);
                }
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.linked.is_empty()
            && self.unlinked.is_empty()
            && self.deleted.is_empty()
    }
}
