//! Counter rule linking and past-event recalculation.

use std::collections::BTreeSet;
use std::time::Instant;

use cohort_rules::schema::{ScoringPlan, Segment, SyntheticCounterRule};
use cohort_rules::{DerivedCounter, RuleLinkPlan};
use tracing::{error, info};

use super::SegmentService;
use crate::counters::RecalculationSummary;
use crate::error::Result;
use crate::persistence::load_item;
use crate::rule_store::{apply_plan, load_rules, revert_plan};
use crate::scoring::ScoringComputer;

/// Counter rule changes made for one definition write, with the rules they
/// replaced.
pub(super) struct RuleChanges {
    plan: RuleLinkPlan,
    previous: Vec<SyntheticCounterRule>,
}

impl SegmentService {
    /// Bring the rule store in line with the counters `definition_id` now
    /// needs. Newly created rules are backfilled before returning.
    pub(super) async fn sync_counter_rules(
        &self,
        definition_id: &str,
        derived: &[DerivedCounter],
    ) -> Result<()> {
        let changes = self.link_counter_rules(definition_id, derived).await?;
        self.backfill_counters(&changes).await
    }

    /// Apply the link plan for `definition_id`. A failed apply is reverted
    /// before the error is returned.
    pub(super) async fn link_counter_rules(
        &self,
        definition_id: &str,
        derived: &[DerivedCounter],
    ) -> Result<RuleChanges> {
        let previous = load_rules(self.persistence()).await?;
        let plan = RuleLinkPlan::compute(definition_id, derived, &previous);
        let changes = RuleChanges { plan, previous };
        if changes.plan.is_empty() {
            return Ok(changes);
        }
        if let Err(e) = apply_plan(self.persistence(), &changes.plan).await {
            self.revert_counter_rules(definition_id, &changes).await;
            return Err(e.into());
        }
        Ok(changes)
    }

    /// Count events for every rule the plan created.
    pub(super) async fn backfill_counters(&self, changes: &RuleChanges) -> Result<()> {
        let recalculator = self.recalculator();
        for rule in &changes.plan.created {
            recalculator.recalculate(rule).await?;
        }
        Ok(())
    }

    /// Put the rule store back the way it was before `changes`. Failures are
    /// logged; the caller is already returning an error.
    pub(super) async fn revert_counter_rules(&self, definition_id: &str, changes: &RuleChanges) {
        if changes.plan.is_empty() {
            return;
        }
        if let Err(e) = revert_plan(self.persistence(), &changes.plan, &changes.previous).await {
            error!(definition_id = %definition_id, error = %e, "failed to revert counter rules");
        }
    }

    /// Every stored counter rule.
    pub async fn get_synthetic_rules(&self) -> Result<Vec<SyntheticCounterRule>> {
        Ok(load_rules(self.persistence()).await?)
    }

    /// Recount every counter rule, then re-apply each enabled definition
    /// linked to one so memberships and scores follow the new counts.
    pub async fn recalculate_past_event_conditions(&self) -> Result<RecalculationSummary> {
        let started = Instant::now();
        let rules = load_rules(self.persistence()).await?;
        let recalculator = self.recalculator();

        let mut summary = RecalculationSummary::default();
        let mut linked: BTreeSet<String> = BTreeSet::new();
        for rule in &rules {
            summary.absorb(recalculator.recalculate(rule).await?);
            linked.extend(rule.linked_items.iter().cloned());
        }

        for id in &linked {
            if let Some(segment) = load_item::<Segment>(self.persistence(), id).await? {
                if segment.metadata.enabled {
                    self.reconciler()
                        .reconcile(segment.id(), segment.condition.as_ref())
                        .await?;
                }
            }
            if let Some(plan) = load_item::<ScoringPlan>(self.persistence(), id).await? {
                if plan.metadata.enabled {
                    ScoringComputer::new(self.persistence()).apply(&plan).await?;
                }
            }
        }

        info!(
            rules = summary.rules,
            profiles_updated = summary.profiles_updated,
            profiles_reset = summary.profiles_reset,
            failures = summary.failures,
            definitions = linked.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "past-event conditions recalculated"
        );
        Ok(summary)
    }
}
