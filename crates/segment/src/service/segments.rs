use cohort_core::ItemType;
use cohort_rules::analyzer::ReferenceKind;
use cohort_rules::{derive_counters, DerivedCounter};
use cohort_rules::schema::{DependentMetadata, Segment};
use cohort_rules::validation::validate_segment;
use tracing::{debug, error, info, warn};

use super::maintenance::RuleChanges;
use super::SegmentService;
use crate::error::{Result, SegmentError};
use crate::notify::ChangeNotification;
use crate::persistence::{load_all, load_item, save_item};
use crate::reconcile::ReconcileSummary;

impl SegmentService {
    /// Validate, persist and apply a segment definition.
    ///
    /// Returns once the membership of every profile has been reconciled.
    /// A rejected definition leaves storage untouched. A write that fails
    /// after validation restores the previous definition, its counter rules
    /// and the memberships it changed before returning the error.
    pub async fn set_segment_definition(&self, segment: Segment) -> Result<()> {
        let report = validate_segment(&segment, &self.registry);
        if !report.valid {
            return Err(SegmentError::Validation(report));
        }
        for warning in &report.warnings {
            debug!(segment_id = %segment.id(), path = %warning.path, "{}", warning.message);
        }

        let mut segment = segment;
        let derived = match segment.condition.as_mut() {
            Some(condition) => derive_counters(condition, &self.registry)?,
            None => Vec::new(),
        };
        // Only enabled segments keep counters alive.
        let needed: &[DerivedCounter] = if segment.metadata.enabled {
            &derived
        } else {
            &[]
        };

        let previous = load_item::<Segment>(self.persistence(), segment.id()).await?;
        let changes = self.link_counter_rules(segment.id(), needed).await?;
        let summary = match self.apply_segment(&segment, &changes).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(segment_id = %segment.id(), error = %e, "segment write failed, rolling back");
                self.roll_back_segment(segment.id(), previous.as_ref(), &changes)
                    .await;
                return Err(e);
            }
        };
        info!(
            segment_id = %segment.id(),
            enabled = segment.metadata.enabled,
            counters = needed.len(),
            added = summary.added,
            removed = summary.removed,
            "segment definition saved"
        );

        self.refresh_after_write().await;
        self.notifier
            .notify(ChangeNotification::SegmentUpdated {
                segment_id: segment.id().to_string(),
            })
            .await;
        Ok(())
    }

    async fn apply_segment(
        &self,
        segment: &Segment,
        changes: &RuleChanges,
    ) -> Result<ReconcileSummary> {
        self.backfill_counters(changes).await?;
        save_item(self.persistence(), segment).await?;
        let condition = segment
            .condition
            .as_ref()
            .filter(|_| segment.metadata.enabled);
        Ok(self.reconciler().reconcile(segment.id(), condition).await?)
    }

    async fn roll_back_segment(
        &self,
        segment_id: &str,
        previous: Option<&Segment>,
        changes: &RuleChanges,
    ) {
        self.revert_counter_rules(segment_id, changes).await;

        let restored = match previous {
            Some(segment) => save_item(self.persistence(), segment).await,
            None => self
                .persistence()
                .remove(segment_id, ItemType::Segment)
                .await
                .map(|_| ()),
        };
        if let Err(e) = restored {
            error!(segment_id = %segment_id, error = %e, "failed to restore segment definition");
        }

        let condition = previous
            .filter(|segment| segment.metadata.enabled)
            .and_then(|segment| segment.condition.as_ref());
        if let Err(e) = self.reconciler().reconcile(segment_id, condition).await {
            error!(segment_id = %segment_id, error = %e, "failed to restore segment membership");
        }
    }

    /// The stored definition, enabled or not.
    pub async fn get_segment_definition(&self, segment_id: &str) -> Result<Option<Segment>> {
        Ok(load_item(self.persistence(), segment_id).await?)
    }

    /// Every stored segment, ordered by id.
    pub async fn list_segment_definitions(&self) -> Result<Vec<Segment>> {
        Ok(load_all(self.persistence(), self.config.update_batch_size).await?)
    }

    /// Definitions whose conditions reference `segment_id`.
    pub async fn get_segment_dependent_metadata(&self, segment_id: &str) -> Result<DependentMetadata> {
        let dependents = self.find_dependents(ReferenceKind::Segment, segment_id).await?;
        Ok(dependents.metadata())
    }

    /// Remove a segment.
    ///
    /// With `validate_only`, removal is refused with
    /// [`SegmentError::DependencyConflict`] while other definitions reference
    /// the segment. Otherwise those references are cut out of the dependents
    /// first; dependents left with nothing are disabled. Returns the
    /// dependents that were found.
    pub async fn remove_segment_definition(
        &self,
        segment_id: &str,
        validate_only: bool,
    ) -> Result<DependentMetadata> {
        if load_item::<Segment>(self.persistence(), segment_id).await?.is_none() {
            return Err(SegmentError::NotFound(segment_id.to_string()));
        }

        let dependents = self.find_dependents(ReferenceKind::Segment, segment_id).await?;
        let metadata = dependents.metadata();
        if validate_only && !metadata.is_empty() {
            return Err(SegmentError::DependencyConflict(metadata));
        }

        self.cascade_removal(ReferenceKind::Segment, segment_id, dependents)
            .await?;
        self.reconciler().reconcile(segment_id, None).await?;
        self.sync_counter_rules(segment_id, &[]).await?;
        self.persistence().remove(segment_id, ItemType::Segment).await?;
        info!(
            segment_id = %segment_id,
            dependent_segments = metadata.segments.len(),
            dependent_scorings = metadata.scorings.len(),
            "segment definition removed"
        );

        self.refresh_after_write().await;
        self.notifier
            .notify(ChangeNotification::SegmentRemoved {
                segment_id: segment_id.to_string(),
            })
            .await;
        Ok(metadata)
    }
}
