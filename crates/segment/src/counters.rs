//! Past-event counter recalculation.
//!
//! For one counter rule: count matching events per profile with partitioned
//! terms aggregations and write each count into the profile with a partial
//! update. Profiles whose windowed count dropped to nothing are reset to zero.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use cohort_core::{ItemType, Result};
use cohort_rules::schema::{Condition, SyntheticCounterRule};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::persistence::{
    document_id, AggregateSpec, Partition, PersistenceService, CARDINALITY_BUCKET,
};
use crate::queries::{event_since, past_event_path, property_positive};

/// Outcome of one or more recalculations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecalculationSummary {
    pub rules: usize,
    pub profiles_updated: u64,
    pub profiles_reset: u64,
    pub failures: u64,
}

impl RecalculationSummary {
    pub fn absorb(&mut self, other: RecalculationSummary) {
        self.rules += other.rules;
        self.profiles_updated += other.profiles_updated;
        self.profiles_reset += other.profiles_reset;
        self.failures += other.failures;
    }
}

/// Number of terms partitions for an estimated population. One more than
/// strictly needed, to absorb hash skew.
pub fn partition_count(cardinality: u64, bucket_size: u64) -> u32 {
    let bucket_size = bucket_size.max(1);
    let needed = cardinality.div_ceil(bucket_size) + 1;
    u32::try_from(needed).unwrap_or(u32::MAX)
}

pub struct CounterRecalculator<'a> {
    persistence: &'a dyn PersistenceService,
    bucket_size: u64,
    batch_size: usize,
    scroll_validity: Duration,
}

impl<'a> CounterRecalculator<'a> {
    pub fn new(
        persistence: &'a dyn PersistenceService,
        bucket_size: u64,
        batch_size: usize,
        scroll_validity: Duration,
    ) -> Self {
        Self {
            persistence,
            bucket_size,
            batch_size,
            scroll_validity,
        }
    }

    /// Recount `rule` across the whole event population.
    ///
    /// Per-profile write failures are logged and counted, not returned.
    pub async fn recalculate(&self, rule: &SyntheticCounterRule) -> Result<RecalculationSummary> {
        let started = Instant::now();
        let now = Utc::now();
        let query = match rule.window_days {
            Some(days) => Condition::and(vec![
                rule.event_condition.clone(),
                event_since(now - ChronoDuration::days(i64::from(days))),
            ]),
            None => rule.event_condition.clone(),
        };

        let cardinality = self
            .persistence
            .aggregate(
                &query,
                &AggregateSpec::Cardinality {
                    field: "profileId".to_string(),
                },
                ItemType::Event,
            )
            .await?
            .get(CARDINALITY_BUCKET)
            .copied()
            .unwrap_or(0);
        let partitions = partition_count(cardinality, self.bucket_size);
        debug!(rule_key = %rule.key, cardinality, partitions, "recalculating counter");

        let mut summary = RecalculationSummary {
            rules: 1,
            ..Default::default()
        };
        let mut counted: HashSet<String> = HashSet::new();
        let path = past_event_path(&rule.key);
        let stamp = Value::from(now.to_rfc3339());

        for index in 0..partitions {
            let spec = AggregateSpec::Terms {
                field: "profileId".to_string(),
                partition: Some(Partition {
                    index,
                    count: partitions,
                }),
            };
            let buckets = self
                .persistence
                .aggregate(&query, &spec, ItemType::Event)
                .await?;
            for (profile_id, count) in buckets {
                let fields = counter_fields(&path, Value::from(count), &stamp);
                match self
                    .persistence
                    .update_fields(&profile_id, ItemType::Profile, fields)
                    .await
                {
                    Ok(true) => summary.profiles_updated += 1,
                    Ok(false) => debug!(profile_id = %profile_id, "events for unknown profile"),
                    Err(e) => {
                        warn!(profile_id = %profile_id, rule_key = %rule.key, error = %e, "failed to write past-event count");
                        summary.failures += 1;
                    }
                }
                counted.insert(profile_id);
            }
        }

        if rule.window_days.is_some() {
            self.reset_stale(&path, &counted, &stamp, &mut summary).await?;
        }

        info!(
            rule_key = %rule.key,
            updated = summary.profiles_updated,
            reset = summary.profiles_reset,
            failures = summary.failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "past-event counter recalculated"
        );
        Ok(summary)
    }

    /// Zero the counter on profiles that no longer have events in the window.
    async fn reset_stale(
        &self,
        path: &str,
        counted: &HashSet<String>,
        stamp: &Value,
        summary: &mut RecalculationSummary,
    ) -> Result<()> {
        let query = property_positive(path);
        let mut page = self
            .persistence
            .scroll_query(&query, ItemType::Profile, None, self.batch_size, self.scroll_validity)
            .await?;
        loop {
            for doc in &page.items {
                let Some(profile_id) = document_id(doc) else {
                    continue;
                };
                if counted.contains(profile_id) {
                    continue;
                }
                let fields = counter_fields(path, Value::from(0), stamp);
                match self
                    .persistence
                    .update_fields(profile_id, ItemType::Profile, fields)
                    .await
                {
                    Ok(_) => summary.profiles_reset += 1,
                    Err(e) => {
                        warn!(profile_id = %profile_id, error = %e, "failed to reset past-event count");
                        summary.failures += 1;
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
        Ok(())
    }
}

fn counter_fields(path: &str, count: Value, stamp: &Value) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(path.to_string(), count);
    fields.insert("systemProperties.lastUpdated".to_string(), stamp.clone());
    fields
}
