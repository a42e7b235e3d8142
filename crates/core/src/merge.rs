//! Typed profile merging.
//!
//! When several profiles are found to belong to the same visitor they are
//! folded into a master profile. Each property is merged with the strategy
//! declared for it (falling back to [`MergeStrategy::LastWriteWins`]);
//! segment memberships are unioned and scores are added.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Profile;

/// How a single property is combined when profiles merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// The merged-in profile's value replaces the master's.
    #[default]
    LastWriteWins,
    /// The master keeps its value if it has one.
    OldestWins,
    /// Integer values are summed; non-integers fall back to last-write-wins.
    AddIntegers,
    /// Values are collected into an array without duplicates.
    Union,
    /// Like last-write-wins, but null and empty strings never overwrite.
    NonEmpty,
}

impl MergeStrategy {
    /// Merge `incoming` into `current`. Returns the merged value.
    pub fn apply(&self, current: Option<&Value>, incoming: &Value) -> Value {
        match (self, current) {
            (_, None) => incoming.clone(),
            (MergeStrategy::LastWriteWins, Some(_)) => incoming.clone(),
            (MergeStrategy::OldestWins, Some(cur)) => {
                if cur.is_null() {
                    incoming.clone()
                } else {
                    cur.clone()
                }
            }
            (MergeStrategy::AddIntegers, Some(cur)) => match (cur.as_i64(), incoming.as_i64()) {
                (Some(a), Some(b)) => Value::from(a.saturating_add(b)),
                _ => incoming.clone(),
            },
            (MergeStrategy::Union, Some(cur)) => {
                let mut out: Vec<Value> = Vec::new();
                for v in as_items(cur).into_iter().chain(as_items(incoming)) {
                    if !out.contains(&v) {
                        out.push(v);
                    }
                }
                Value::Array(out)
            }
            (MergeStrategy::NonEmpty, Some(cur)) => {
                if is_empty(incoming) {
                    cur.clone()
                } else {
                    incoming.clone()
                }
            }
        }
    }
}

fn as_items(v: &Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Fold `others` into `master` in order. Returns `true` if `master` changed.
pub fn merge_profiles(
    master: &mut Profile,
    others: &[Profile],
    strategies: &HashMap<String, MergeStrategy>,
) -> bool {
    let before = master.clone();

    for other in others {
        if other.id == master.id {
            continue;
        }
        for (name, incoming) in &other.properties {
            let strategy = strategies.get(name).copied().unwrap_or_default();
            let merged = strategy.apply(master.properties.get(name), incoming);
            master.properties.insert(name.clone(), merged);
        }

        master.segments.extend(other.segments.iter().cloned());

        for (plan_id, score) in &other.scores {
            let entry = master.scores.entry(plan_id.clone()).or_insert(0);
            *entry = entry.saturating_add(*score);
        }

        for (plan_id, modifier) in &other.system_properties.score_modifiers {
            master
                .system_properties
                .score_modifiers
                .entry(plan_id.clone())
                .or_insert(*modifier);
        }
    }

    *master != before
}
