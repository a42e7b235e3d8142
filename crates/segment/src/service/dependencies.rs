//! Impact queries and cascading rewrites for definition removal.

use cohort_rules::analyzer::{DependencyAnalyzer, ReferenceKind};
use cohort_rules::schema::{DependentMetadata, ScoringElement, ScoringPlan, Segment};
use tracing::warn;

use super::SegmentService;
use crate::error::Result;
use crate::persistence::load_all;

/// Stored definitions referencing some id.
pub(super) struct Dependents {
    segments: Vec<Segment>,
    scorings: Vec<ScoringPlan>,
}

impl Dependents {
    pub(super) fn metadata(&self) -> DependentMetadata {
        DependentMetadata {
            segments: self.segments.iter().map(|s| s.metadata.clone()).collect(),
            scorings: self.scorings.iter().map(|p| p.metadata.clone()).collect(),
        }
    }
}

impl SegmentService {
    /// Every stored definition, enabled or not, whose conditions reference
    /// `target_id`. The target itself is never its own dependent.
    pub(super) async fn find_dependents(
        &self,
        kind: ReferenceKind,
        target_id: &str,
    ) -> Result<Dependents> {
        let analyzer = DependencyAnalyzer::new(&self.registry);
        let is_target = |own_kind: ReferenceKind, id: &str| own_kind == kind && id == target_id;

        let mut segments = Vec::new();
        for segment in load_all::<Segment>(self.persistence(), self.config.update_batch_size).await? {
            if is_target(ReferenceKind::Segment, segment.id()) {
                continue;
            }
            if let Some(condition) = &segment.condition {
                if analyzer.impacts(condition, kind, target_id)? {
                    segments.push(segment);
                }
            }
        }

        let mut scorings = Vec::new();
        for plan in load_all::<ScoringPlan>(self.persistence(), self.config.update_batch_size).await? {
            if is_target(ReferenceKind::Scoring, plan.id()) {
                continue;
            }
            let mut impacted = false;
            for element in &plan.elements {
                if analyzer.impacts(&element.condition, kind, target_id)? {
                    impacted = true;
                    break;
                }
            }
            if impacted {
                scorings.push(plan);
            }
        }

        Ok(Dependents { segments, scorings })
    }

    /// Rewrite every dependent without its references to `target_id` and save
    /// it through the normal write path. A segment whose tree disappears is
    /// disabled; a scoring element that disappears is dropped, and a plan left
    /// with no elements is disabled.
    pub(super) async fn cascade_removal(
        &self,
        kind: ReferenceKind,
        target_id: &str,
        dependents: Dependents,
    ) -> Result<()> {
        let analyzer = DependencyAnalyzer::new(&self.registry);

        for mut segment in dependents.segments {
            let rewritten = match &segment.condition {
                Some(condition) => analyzer.rewrite_removing(condition, kind, target_id)?,
                None => None,
            };
            if rewritten.is_none() {
                warn!(
                    segment_id = %segment.id(),
                    removed = %target_id,
                    "segment condition is empty after removal, disabling"
                );
                segment.metadata.enabled = false;
            }
            segment.condition = rewritten;
            self.set_segment_definition(segment).await?;
        }

        for mut plan in dependents.scorings {
            let mut kept = Vec::with_capacity(plan.elements.len());
            for element in plan.elements {
                if let Some(condition) = analyzer.rewrite_removing(&element.condition, kind, target_id)? {
                    kept.push(ScoringElement {
                        condition,
                        value: element.value,
                    });
                }
            }
            if kept.is_empty() {
                warn!(
                    plan_id = %plan.metadata.id,
                    removed = %target_id,
                    "scoring plan has no elements left after removal, disabling"
                );
                plan.metadata.enabled = false;
            }
            plan.elements = kept;
            self.set_scoring_definition(plan).await?;
        }
        Ok(())
    }
}
