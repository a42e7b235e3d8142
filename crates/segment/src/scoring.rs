//! Score computation for one scoring plan, as a single scripted bulk update.
//!
//! The first condition/script pair resets every profile holding a score (or a
//! manual modifier) for the plan to its modifier. Each element then adds its
//! value to the profiles its condition matches. Elements are not mutually
//! exclusive.

use cohort_core::{ItemType, Result};
use cohort_rules::schema::{Condition, ScoringPlan};
use tracing::info;

use crate::persistence::{PersistenceService, UpdateScript};
use crate::queries::has_score;

pub struct ScoringComputer<'a> {
    persistence: &'a dyn PersistenceService,
}

impl<'a> ScoringComputer<'a> {
    pub fn new(persistence: &'a dyn PersistenceService) -> Self {
        Self { persistence }
    }

    /// Recompute `plan` for every profile. A disabled plan only resets.
    pub async fn apply(&self, plan: &ScoringPlan) -> Result<u64> {
        let mut conditions: Vec<Condition> = vec![has_score(plan.id())];
        let mut scripts = vec![UpdateScript::ResetScore {
            plan_id: plan.id().to_string(),
        }];
        if plan.metadata.enabled {
            for element in &plan.elements {
                conditions.push(element.condition.clone());
                scripts.push(UpdateScript::IncrementScore {
                    plan_id: plan.id().to_string(),
                    value: element.value,
                });
            }
        }
        let touched = self
            .persistence
            .bulk_script_update(&conditions, &scripts, ItemType::Profile)
            .await?;
        info!(plan_id = %plan.id(), elements = scripts.len() - 1, touched, "scores recomputed");
        Ok(touched)
    }

    /// Reset every score of `plan_id` back to its modifier.
    pub async fn strip(&self, plan_id: &str) -> Result<u64> {
        let touched = self
            .persistence
            .bulk_script_update(
                &[has_score(plan_id)],
                &[UpdateScript::ResetScore {
                    plan_id: plan_id.to_string(),
                }],
                ItemType::Profile,
            )
            .await?;
        info!(plan_id = %plan_id, touched, "scores stripped");
        Ok(touched)
    }
}
