//! The segmentation service: definition writes, removals, profile matching
//! and past-event maintenance over a [`PersistenceService`].
//!
//! A definition write validates the tree, derives and links its counter
//! rules, persists the definition, reconciles the profile population and
//! finally refreshes the definition snapshot and publishes a notification.

mod dependencies;
mod maintenance;
mod scorings;
mod segments;


use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cohort_core::config::SegmentConfig;
use cohort_core::Profile;
use cohort_rules::ConditionTypeRegistry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{DefinitionSnapshot, SnapshotCell};
use crate::counters::CounterRecalculator;
use crate::error::Result;
use crate::notify::{ChangeNotifier, NoopNotifier};
use crate::persistence::{load_all, PersistenceService};
use crate::reconcile::Reconciler;

/// Segment ids and scores a profile currently qualifies for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentsAndScores {
    pub segments: BTreeSet<String>,
    pub scores: BTreeMap<String, i64>,
}

pub struct SegmentService {
    persistence: Arc<dyn PersistenceService>,
    registry: ConditionTypeRegistry,
    notifier: Arc<dyn ChangeNotifier>,
    config: SegmentConfig,
    snapshot: SnapshotCell,
}

impl SegmentService {
    /// A service over `persistence` with the built-in condition types.
    pub fn new(persistence: Arc<dyn PersistenceService>, config: SegmentConfig) -> Self {
        let registry = ConditionTypeRegistry::builtin().with_max_depth(config.max_condition_depth);
        Self {
            persistence,
            registry,
            notifier: Arc::new(NoopNotifier),
            config,
            snapshot: SnapshotCell::default(),
        }
    }

    /// Replace the condition type registry. The configured depth bound still applies.
    pub fn with_registry(mut self, registry: ConditionTypeRegistry) -> Self {
        self.registry = registry.with_max_depth(self.config.max_condition_depth);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn registry(&self) -> &ConditionTypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    pub fn persistence(&self) -> &dyn PersistenceService {
        self.persistence.as_ref()
    }

    /// The definition snapshot the matching path currently reads.
    pub fn snapshot(&self) -> Arc<DefinitionSnapshot> {
        self.snapshot.load()
    }

    /// Rebuild the snapshot from storage and publish it.
    pub async fn refresh_definitions(&self) -> Result<()> {
        let segments = load_all(self.persistence(), self.config.update_batch_size).await?;
        let scorings = load_all(self.persistence(), self.config.update_batch_size).await?;
        let snapshot = DefinitionSnapshot::build(segments, scorings, &self.registry);
        debug!(
            segments = snapshot.segments.len(),
            scorings = snapshot.scorings.len(),
            "definition snapshot refreshed"
        );
        self.snapshot.store(snapshot);
        Ok(())
    }

    /// Whether `profile` satisfies the enabled segment `segment_id`.
    /// Unknown and disabled segments never match.
    pub fn is_profile_in_segment(&self, profile: &Profile, segment_id: &str) -> Result<bool> {
        let snapshot = self.snapshot.load();
        let Some(condition) = snapshot
            .segments
            .get(segment_id)
            .and_then(|s| s.condition.as_ref())
        else {
            return Ok(false);
        };
        let doc = serde_json::to_value(profile)?;
        Ok(self.persistence.test_match(condition, &doc)?)
    }

    /// Evaluate every enabled segment and scoring plan against `profile`.
    ///
    /// A plan's score is the sum of its matching element values plus the
    /// profile's manual modifier. Plans with no matching element and no
    /// modifier are left out.
    pub fn get_segments_and_scores_for_profile(&self, profile: &Profile) -> Result<SegmentsAndScores> {
        let snapshot = self.snapshot.load();
        let doc = serde_json::to_value(profile)?;
        let mut result = SegmentsAndScores::default();

        for (id, segment) in &snapshot.segments {
            if let Some(condition) = &segment.condition {
                if self.persistence.test_match(condition, &doc)? {
                    result.segments.insert(id.clone());
                }
            }
        }

        for (id, plan) in &snapshot.scorings {
            let modifier = profile.system_properties.score_modifiers.get(id).copied();
            let mut total: i64 = 0;
            let mut matched = false;
            for element in &plan.elements {
                if self.persistence.test_match(&element.condition, &doc)? {
                    total = total.saturating_add(element.value);
                    matched = true;
                }
            }
            if let Some(m) = modifier {
                total = total.saturating_add(m);
            }
            if matched || modifier.is_some() {
                result.scores.insert(id.clone(), total);
            }
        }
        Ok(result)
    }

    /// Reload the snapshot after a committed write. The write stands if the
    /// reload fails; the refresh loop catches up.
    async fn refresh_after_write(&self) {
        if let Err(e) = self.refresh_definitions().await {
            warn!(error = %e, "definition refresh after write failed");
        }
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(
            self.persistence(),
            self.notifier.as_ref(),
            self.config.update_batch_size,
            self.config.scroll_validity,
        )
    }

    fn recalculator(&self) -> CounterRecalculator<'_> {
        CounterRecalculator::new(
            self.persistence(),
            self.config.aggregate_bucket_size,
            self.config.update_batch_size,
            self.config.scroll_validity,
        )
    }
}
