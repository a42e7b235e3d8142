use std::collections::BTreeSet;

use cohort_core::ItemType;
use cohort_rules::analyzer::ReferenceKind;
use cohort_rules::derive_counters;
use cohort_rules::schema::{DependentMetadata, ScoringPlan};
use cohort_rules::validation::validate_scoring;
use tracing::{debug, error, info, warn};

use super::maintenance::RuleChanges;
use super::SegmentService;
use crate::error::{Result, SegmentError};
use crate::notify::ChangeNotification;
use crate::persistence::{load_all, load_item, save_item};
use crate::scoring::ScoringComputer;

impl SegmentService {
    /// Validate, persist and apply a scoring plan. Scores of every profile are
    /// reset for the plan and then rebuilt from its elements. A write that
    /// fails after validation restores the previous plan, its counter rules
    /// and its scores.
    pub async fn set_scoring_definition(&self, plan: ScoringPlan) -> Result<()> {
        let report = validate_scoring(&plan, &self.registry);
        if !report.valid {
            return Err(SegmentError::Validation(report));
        }
        for warning in &report.warnings {
            debug!(plan_id = %plan.id(), path = %warning.path, "{}", warning.message);
        }

        let mut plan = plan;
        let mut derived = Vec::new();
        let mut seen = BTreeSet::new();
        for element in &mut plan.elements {
            for counter in derive_counters(&mut element.condition, &self.registry)? {
                if seen.insert(counter.key.clone()) {
                    derived.push(counter);
                }
            }
        }
        if !plan.metadata.enabled {
            derived.clear();
        }

        let previous = load_item::<ScoringPlan>(self.persistence(), plan.id()).await?;
        let changes = self.link_counter_rules(plan.id(), &derived).await?;
        let touched = match self.apply_scoring(&plan, &changes).await {
            Ok(touched) => touched,
            Err(e) => {
                warn!(plan_id = %plan.id(), error = %e, "scoring write failed, rolling back");
                self.roll_back_scoring(plan.id(), previous.as_ref(), &changes)
                    .await;
                return Err(e);
            }
        };
        info!(
            plan_id = %plan.id(),
            enabled = plan.metadata.enabled,
            counters = derived.len(),
            touched,
            "scoring definition saved"
        );

        self.refresh_after_write().await;
        self.notifier
            .notify(ChangeNotification::ScoringUpdated {
                plan_id: plan.id().to_string(),
            })
            .await;
        Ok(())
    }

    async fn apply_scoring(&self, plan: &ScoringPlan, changes: &RuleChanges) -> Result<u64> {
        self.backfill_counters(changes).await?;
        save_item(self.persistence(), plan).await?;
        Ok(ScoringComputer::new(self.persistence()).apply(plan).await?)
    }

    async fn roll_back_scoring(
        &self,
        plan_id: &str,
        previous: Option<&ScoringPlan>,
        changes: &RuleChanges,
    ) {
        self.revert_counter_rules(plan_id, changes).await;

        let restored = match previous {
            Some(plan) => save_item(self.persistence(), plan).await,
            None => self
                .persistence()
                .remove(plan_id, ItemType::Scoring)
                .await
                .map(|_| ()),
        };
        if let Err(e) = restored {
            error!(plan_id = %plan_id, error = %e, "failed to restore scoring plan");
        }

        let computer = ScoringComputer::new(self.persistence());
        let rescored = match previous {
            Some(plan) => computer.apply(plan).await,
            None => computer.strip(plan_id).await,
        };
        if let Err(e) = rescored {
            error!(plan_id = %plan_id, error = %e, "failed to restore scores");
        }
    }

    pub async fn get_scoring_definition(&self, plan_id: &str) -> Result<Option<ScoringPlan>> {
        Ok(load_item(self.persistence(), plan_id).await?)
    }

    pub async fn list_scoring_definitions(&self) -> Result<Vec<ScoringPlan>> {
        Ok(load_all(self.persistence(), self.config.update_batch_size).await?)
    }

    /// Definitions whose conditions reference the scoring plan `plan_id`.
    pub async fn get_scoring_dependent_metadata(&self, plan_id: &str) -> Result<DependentMetadata> {
        let dependents = self.find_dependents(ReferenceKind::Scoring, plan_id).await?;
        Ok(dependents.metadata())
    }

    /// Remove a scoring plan, with the same dependency handling as
    /// [`SegmentService::remove_segment_definition`]. Scores fall back to the
    /// manual modifier where one exists and disappear otherwise.
    pub async fn remove_scoring_definition(
        &self,
        plan_id: &str,
        validate_only: bool,
    ) -> Result<DependentMetadata> {
        if load_item::<ScoringPlan>(self.persistence(), plan_id).await?.is_none() {
            return Err(SegmentError::NotFound(plan_id.to_string()));
        }

        let dependents = self.find_dependents(ReferenceKind::Scoring, plan_id).await?;
        let metadata = dependents.metadata();
        if validate_only && !metadata.is_empty() {
            return Err(SegmentError::DependencyConflict(metadata));
        }

        self.cascade_removal(ReferenceKind::Scoring, plan_id, dependents)
            .await?;
        ScoringComputer::new(self.persistence()).strip(plan_id).await?;
        self.sync_counter_rules(plan_id, &[]).await?;
        self.persistence().remove(plan_id, ItemType::Scoring).await?;
        info!(
            plan_id = %plan_id,
            dependent_segments = metadata.segments.len(),
            dependent_scorings = metadata.scorings.len(),
            "scoring definition removed"
        );

        self.refresh_after_write().await;
        self.notifier
            .notify(ChangeNotification::ScoringRemoved {
                plan_id: plan_id.to_string(),
            })
            .await;
        Ok(metadata)
    }
}
