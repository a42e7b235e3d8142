//! Membership reconciliation for one segment.
//!
//! Two scrolled passes bring the `segments` flag of every profile in line with
//! the segment condition: profiles that match but are not flagged get the id
//! added, flagged profiles that no longer match get it removed. Only profiles
//! whose membership actually changes are written.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use cohort_core::{ItemType, Result};
use cohort_rules::schema::Condition;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::notify::{ChangeNotification, ChangeNotifier};
use crate::persistence::{document_id, PersistenceService};
use crate::queries::member_of;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: u64,
    pub removed: u64,
    /// Profiles whose update failed and were left as they were.
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MembershipChange {
    Add,
    Remove,
}

pub struct Reconciler<'a> {
    persistence: &'a dyn PersistenceService,
    notifier: &'a dyn ChangeNotifier,
    batch_size: usize,
    scroll_validity: Duration,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        persistence: &'a dyn PersistenceService,
        notifier: &'a dyn ChangeNotifier,
        batch_size: usize,
        scroll_validity: Duration,
    ) -> Self {
        Self {
            persistence,
            notifier,
            batch_size,
            scroll_validity,
        }
    }

    /// Reconcile `segment_id` against `condition`. With no condition (segment
    /// disabled or removed) every flagged profile loses the id.
    ///
    /// An expired scroll aborts with the passes partially applied; running
    /// again picks up from the persisted state.
    pub async fn reconcile(
        &self,
        segment_id: &str,
        condition: Option<&Condition>,
    ) -> Result<ReconcileSummary> {
        let started = Instant::now();
        let mut summary = ReconcileSummary::default();
        let flagged = member_of(segment_id);

        match condition {
            Some(condition) => {
                let to_add = Condition::and(vec![
                    condition.clone(),
                    Condition::not(flagged.clone()),
                ]);
                let (added, failed) = self
                    .run_pass(&to_add, segment_id, MembershipChange::Add)
                    .await?;
                summary.added = added;
                summary.failed += failed;

                let to_remove = Condition::and(vec![flagged, Condition::not(condition.clone())]);
                let (removed, failed) = self
                    .run_pass(&to_remove, segment_id, MembershipChange::Remove)
                    .await?;
                summary.removed = removed;
                summary.failed += failed;
            }
            None => {
                let (removed, failed) = self
                    .run_pass(&flagged, segment_id, MembershipChange::Remove)
                    .await?;
                summary.removed = removed;
                summary.failed = failed;
            }
        }

        info!(
            segment_id = %segment_id,
            added = summary.added,
            removed = summary.removed,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "segment membership reconciled"
        );
        Ok(summary)
    }

    async fn run_pass(
        &self,
        query: &Condition,
        segment_id: &str,
        change: MembershipChange,
    ) -> Result<(u64, u64)> {
        let mut applied = 0;
        let mut failed = 0;
        let mut page = self
            .persistence
            .scroll_query(query, ItemType::Profile, None, self.batch_size, self.scroll_validity)
            .await?;
        debug!(segment_id = %segment_id, ?change, total = page.total_size, "membership pass");

        loop {
            for doc in &page.items {
                match self.update_profile(doc, segment_id, change).await {
                    Ok(true) => applied += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            profile_id = document_id(doc).unwrap_or("?"),
                            segment_id = %segment_id,
                            error = %e,
                            "failed to update segment membership"
                        );
                        failed += 1;
                    }
                }
            }
            let Some(scroll_id) = page.scroll_id.take() else {
                break;
            };
            page = self
                .persistence
                .continue_scroll(&scroll_id, self.scroll_validity)
                .await?;
            if page.is_empty() {
                break;
            }
        }
        Ok((applied, failed))
    }

    /// Write the new membership list of one profile. `Ok(false)` when there
    /// was nothing to change or the profile disappeared.
    async fn update_profile(
        &self,
        doc: &Value,
        segment_id: &str,
        change: MembershipChange,
    ) -> Result<bool> {
        let Some(profile_id) = document_id(doc) else {
            return Ok(false);
        };
        let mut segments: BTreeSet<String> = doc
            .get("segments")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let changed = match change {
            MembershipChange::Add => segments.insert(segment_id.to_string()),
            MembershipChange::Remove => segments.remove(segment_id),
        };
        if !changed {
            return Ok(false);
        }

        let mut fields = Map::new();
        fields.insert(
            "segments".to_string(),
            Value::Array(segments.into_iter().map(Value::String).collect()),
        );
        fields.insert(
            "systemProperties.lastUpdated".to_string(),
            Value::from(Utc::now().to_rfc3339()),
        );
        let written = self
            .persistence
            .update_fields(profile_id, ItemType::Profile, fields)
            .await?;
        if written {
            self.notifier
                .notify(ChangeNotification::ProfileUpdated {
                    profile_id: profile_id.to_string(),
                })
                .await;
        }
        Ok(written)
    }
}
