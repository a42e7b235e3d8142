//! Storage of synthetic counter rules.

use cohort_core::{ItemType, Result};
use cohort_rules::schema::SyntheticCounterRule;
use cohort_rules::RuleLinkPlan;
use tracing::{debug, info, warn};

use crate::persistence::{load_all, save_item, PersistenceService};

const PAGE_SIZE: usize = 500;

pub async fn load_rules(persistence: &dyn PersistenceService) -> Result<Vec<SyntheticCounterRule>> {
    load_all(persistence, PAGE_SIZE).await
}

/// Persist every change in `plan`. Rules left without links are deleted.
pub async fn apply_plan(persistence: &dyn PersistenceService, plan: &RuleLinkPlan) -> Result<()> {
    for rule in &plan.created {
        save_item(persistence, rule).await?;
        info!(rule_key = %rule.key, linked = ?rule.linked_items, "created counter rule");
    }
    for rule in plan.linked.iter().chain(&plan.unlinked) {
        save_item(persistence, rule).await?;
        debug!(rule_key = %rule.key, linked = ?rule.linked_items, "relinked counter rule");
    }
    for key in &plan.deleted {
        persistence.remove(key, ItemType::Rule).await?;
        info!(rule_key = %key, "deleted orphaned counter rule");
    }
    Ok(())
}

/// Undo `plan`, given the rules as they were before it was applied. Created
/// rules are removed; relinked and deleted ones get their previous form back.
pub async fn revert_plan(
    persistence: &dyn PersistenceService,
    plan: &RuleLinkPlan,
    previous: &[SyntheticCounterRule],
) -> Result<()> {
    for rule in &plan.created {
        persistence.remove(&rule.key, ItemType::Rule).await?;
    }
    let touched = plan
        .linked
        .iter()
        .chain(&plan.unlinked)
        .map(|rule| rule.key.as_str())
        .chain(plan.deleted.iter().map(String::as_str));
    for key in touched {
        if let Some(rule) = previous.iter().find(|r| r.key == key) {
            save_item(persistence, rule).await?;
        }
    }
    warn!(
        created = plan.created.len(),
        restored = plan.linked.len() + plan.unlinked.len() + plan.deleted.len(),
        "reverted counter rule changes"
    );
    Ok(())
}
