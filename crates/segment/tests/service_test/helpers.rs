use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use cohort_core::config::SegmentConfig;
use cohort_core::{Event, Profile};
use cohort_rules::schema::Condition;
use cohort_segment::{MemoryPersistence, SegmentService};

/// Small pages so every reconciliation walks several scroll pages.
pub fn test_config() -> SegmentConfig {
    SegmentConfig {
        update_batch_size: 2,
        scroll_validity: Duration::from_secs(60),
        aggregate_bucket_size: 2,
        ..SegmentConfig::default()
    }
}

pub fn make_service() -> (Arc<MemoryPersistence>, SegmentService) {
    make_service_with(test_config())
}

pub fn make_service_with(config: SegmentConfig) -> (Arc<MemoryPersistence>, SegmentService) {
    let store = Arc::new(MemoryPersistence::new());
    let service = SegmentService::new(store.clone(), config);
    (store, service)
}

pub fn prop(name: &str, op: &str, value: impl Into<Value>) -> Condition {
    let value = value.into();
    let parameter = if value.is_i64() {
        "propertyValueInteger"
    } else {
        "propertyValue"
    };
    Condition::new("profilePropertyCondition")
        .with("propertyName", name)
        .with("comparisonOperator", op)
        .with(parameter, value)
}

pub fn age_below(age: i64) -> Condition {
    prop("properties.age", "lessThan", age)
}

pub fn in_segments(ids: &[&str]) -> Condition {
    Condition::new("profileSegmentCondition")
        .with("segments", json!(ids))
        .with("matchType", "in")
}

pub fn event_type(event_type: &str) -> Condition {
    Condition::new("eventTypeCondition").with("eventTypeId", event_type)
}

pub fn past_event(event_condition: Condition, days: Option<i64>) -> Condition {
    let condition = Condition::new("pastEventCondition").with("eventCondition", event_condition);
    match days {
        Some(days) => condition.with("numberOfDays", days),
        None => condition,
    }
}

pub fn person(id: &str, gender: &str, age: i64) -> Profile {
    Profile::new(id)
        .with_property("gender", gender)
        .with_property("age", age)
}

pub fn event_days_ago(id: &str, event_type: &str, profile_id: &str, days: i64) -> Event {
    Event::new(id, event_type, profile_id, Utc::now() - ChronoDuration::days(days))
}

pub fn stored(store: &MemoryPersistence, id: &str) -> Profile {
    store.get::<Profile>(id).unwrap().expect("profile exists")
}

pub fn members(store: &MemoryPersistence, ids: &[&str], segment_id: &str) -> Vec<String> {
    ids.iter()
        .filter(|id| stored(store, id).segments.contains(segment_id))
        .map(|id| id.to_string())
        .collect()
}

/// The `generatedPropertyKey` of the first past-event node in `condition`.
pub fn generated_key(condition: &Condition) -> Option<String> {
    let mut key = None;
    condition
        .walk(64, &mut |node, _| {
            if key.is_none() && node.type_id == "pastEventCondition" {
                key = node.param_str("generatedPropertyKey").map(str::to_string);
            }
        })
        .unwrap();
    key
}

/// Shipped example definitions, relative to the workspace root.
pub fn definitions_dir() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../data/definitions")
}

/// `levels` nested `notCondition`s around `inner`.
pub fn nested_not(inner: Condition, levels: usize) -> Condition {
    (0..levels).fold(inner, |tree, _| Condition::not(tree))
}
