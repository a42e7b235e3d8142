//! Dependency analysis over condition trees.
//!
//! Finds references to a segment or scoring plan id inside a tree and produces
//! a rewritten tree with those references removed. Reference leaves are
//! recognised by role tag; every nested condition parameter is followed, so a
//! reference hidden under `notCondition` or a past-event condition is found too.

use crate::error::{ConditionError, Result};
use crate::registry::ConditionTypeRegistry;
use crate::schema::{params, tags, Condition, ParameterValue};

/// What kind of definition a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Segment,
    Scoring,
}

impl ReferenceKind {
    /// Role tag marking leaves of this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            ReferenceKind::Segment => tags::SEGMENT_REFERENCE,
            ReferenceKind::Scoring => tags::SCORING_REFERENCE,
        }
    }

    /// Parameter listing the referenced ids.
    pub fn parameter(&self) -> &'static str {
        match self {
            ReferenceKind::Segment => params::SEGMENTS,
            ReferenceKind::Scoring => params::SCORING_PLAN_ID,
        }
    }
}

/// Tree walks for impact queries and cascading rewrites.
pub struct DependencyAnalyzer<'a> {
    registry: &'a ConditionTypeRegistry,
}

impl<'a> DependencyAnalyzer<'a> {
    pub fn new(registry: &'a ConditionTypeRegistry) -> Self {
        Self { registry }
    }

    fn max_depth(&self) -> usize {
        self.registry.max_depth()
    }

    fn is_reference(&self, node: &Condition, kind: ReferenceKind) -> bool {
        self.registry.has_tag(node, kind.tag())
    }

    /// True if any reference leaf of `kind` in `tree` lists `target_id`.
    pub fn impacts(&self, tree: &Condition, kind: ReferenceKind, target_id: &str) -> Result<bool> {
        let mut found = false;
        tree.walk(self.max_depth(), &mut |node, _| {
            if !found && self.is_reference(node, kind) {
                found = node
                    .param_strings(kind.parameter())
                    .map(|ids| ids.iter().any(|id| id == target_id))
                    .unwrap_or(false);
            }
        })?;
        Ok(found)
    }

    /// A copy of `tree` with `target_id` removed from every reference leaf.
    ///
    /// - a leaf left with no ids disappears;
    /// - an `and`/`or` composition left with no children disappears, with one
    ///   child it is replaced by that child;
    /// - any other node whose nested condition disappears disappears with it.
    ///
    /// `None` means the whole tree is gone; the owner must be disabled.
    /// Sibling order is preserved.
    pub fn rewrite_removing(
        &self,
        tree: &Condition,
        kind: ReferenceKind,
        target_id: &str,
    ) -> Result<Option<Condition>> {
        self.rewrite_at(tree, kind, target_id, 0)
    }

    fn rewrite_at(
        &self,
        node: &Condition,
        kind: ReferenceKind,
        target_id: &str,
        depth: usize,
    ) -> Result<Option<Condition>> {
        if depth > self.max_depth() {
            return Err(ConditionError::TooDeep {
                max_depth: self.max_depth(),
            });
        }

        if self.is_reference(node, kind) {
            return Ok(remove_reference(node, kind.parameter(), target_id));
        }

        let composition = self.registry.has_tag(node, tags::BOOLEAN)
            && node.param_conditions(params::SUB_CONDITIONS).is_some();

        let mut rewritten = Condition::new(node.type_id.clone());
        for (name, value) in &node.parameters {
            let new_value = match value {
                ParameterValue::Scalar(_) => value.clone(),
                ParameterValue::Condition(child) => {
                    match self.rewrite_at(child, kind, target_id, depth + 1)? {
                        Some(c) => ParameterValue::Condition(Box::new(c)),
                        None => return Ok(None),
                    }
                }
                ParameterValue::Conditions(children) => {
                    let mut kept = Vec::with_capacity(children.len());
                    for child in children {
                        if let Some(c) = self.rewrite_at(child, kind, target_id, depth + 1)? {
                            kept.push(c);
                        }
                    }
                    if kept.is_empty() && !children.is_empty() {
                        return Ok(None);
                    }
                    if composition && name == params::SUB_CONDITIONS && kept.len() == 1 {
                        return Ok(kept.pop());
                    }
                    ParameterValue::Conditions(kept)
                }
            };
            rewritten.parameters.insert(name.clone(), new_value);
        }
        Ok(Some(rewritten))
    }
}

fn remove_reference(node: &Condition, parameter: &str, target_id: &str) -> Option<Condition> {
    let Some(ids) = node.param_strings(parameter) else {
        return Some(node.clone());
    };
    if !ids.iter().any(|id| id == target_id) {
        return Some(node.clone());
    }
    let remaining: Vec<String> = ids.into_iter().filter(|id| id != target_id).collect();
    if remaining.is_empty() {
        return None;
    }
    let mut updated = node.clone();
    match node.parameter(parameter) {
        Some(ParameterValue::Scalar(serde_json::Value::String(_))) if remaining.len() == 1 => {
            updated.set_parameter(parameter, remaining[0].clone());
        }
        _ => updated.set_parameter(parameter, serde_json::Value::from(remaining)),
    }
    Some(updated)
}
