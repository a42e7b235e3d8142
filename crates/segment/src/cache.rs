//! Immutable snapshot of enabled definitions, swapped atomically.
//!
//! Readers clone the current `Arc` and never see a half-built snapshot; the
//! refresh path builds a complete replacement and publishes it in one swap.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use cohort_rules::schema::{ScoringPlan, Segment};
use cohort_rules::ConditionTypeRegistry;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct DefinitionSnapshot {
    /// Enabled segments with a resolvable condition, by id.
    pub segments: BTreeMap<String, Segment>,
    /// Enabled scoring plans whose elements all resolve, by id.
    pub scorings: BTreeMap<String, ScoringPlan>,
    pub built_at: DateTime<Utc>,
}

impl DefinitionSnapshot {
    pub fn empty() -> Self {
        Self {
            segments: BTreeMap::new(),
            scorings: BTreeMap::new(),
            built_at: Utc::now(),
        }
    }

    /// Keep enabled definitions whose trees resolve. Others are logged and skipped.
    pub fn build(
        segments: Vec<Segment>,
        scorings: Vec<ScoringPlan>,
        registry: &ConditionTypeRegistry,
    ) -> Self {
        let segments = segments
            .into_iter()
            .filter(|s| s.metadata.enabled)
            .filter(|s| match &s.condition {
                Some(c) => match registry.resolve(c) {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(segment_id = %s.id(), error = %e, "skipping unresolvable segment");
                        false
                    }
                },
                None => false,
            })
            .map(|s| (s.id().to_string(), s))
            .collect();

        let scorings = scorings
            .into_iter()
            .filter(|p| p.metadata.enabled)
            .filter(|p| {
                p.elements.iter().all(|e| match registry.resolve(&e.condition) {
                    Ok(_) => true,
                    Err(err) => {
                        warn!(plan_id = %p.id(), error = %err, "skipping unresolvable scoring plan");
                        false
                    }
                })
            })
            .map(|p| (p.id().to_string(), p))
            .collect();

        Self {
            segments,
            scorings,
            built_at: Utc::now(),
        }
    }
}

/// Holder of the current snapshot.
pub struct SnapshotCell {
    current: RwLock<Arc<DefinitionSnapshot>>,
}

impl SnapshotCell {
    pub fn new(snapshot: DefinitionSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn load(&self) -> Arc<DefinitionSnapshot> {
        Arc::clone(&self.current.read().expect("snapshot lock poisoned"))
    }

    pub fn store(&self, snapshot: DefinitionSnapshot) {
        *self.current.write().expect("snapshot lock poisoned") = Arc::new(snapshot);
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new(DefinitionSnapshot::empty())
    }
}
