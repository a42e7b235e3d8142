//! Conditions the engine builds for its own queries.
//!
//! All of them use built-in condition types, so any backend that understands
//! the built-in catalogue can run them.

use chrono::{DateTime, Utc};
use cohort_rules::schema::Condition;

/// Profiles currently flagged as members of `segment_id`.
pub fn member_of(segment_id: &str) -> Condition {
    Condition::new("profileSegmentCondition")
        .with("segments", serde_json::json!([segment_id]))
        .with("matchType", "in")
}

/// Documents where the dotted `path` holds a value.
pub fn property_exists(path: &str) -> Condition {
    Condition::new("profilePropertyCondition")
        .with("propertyName", path)
        .with("comparisonOperator", "exists")
}

/// Profiles whose integer at `path` is strictly positive.
pub fn property_positive(path: &str) -> Condition {
    Condition::new("profilePropertyCondition")
        .with("propertyName", path)
        .with("comparisonOperator", "greaterThan")
        .with("propertyValueInteger", 0)
}

/// Events at or after `since`.
pub fn event_since(since: DateTime<Utc>) -> Condition {
    Condition::new("eventPropertyCondition")
        .with("propertyName", "timestamp")
        .with("comparisonOperator", "greaterThanOrEqualTo")
        .with("propertyValueDate", since.to_rfc3339())
}

/// Path of a past-event counter inside a profile.
pub fn past_event_path(key: &str) -> String {
    format!("systemProperties.pastEvents.{key}")
}

/// Profiles holding a score or a manual override for `plan_id`.
pub fn has_score(plan_id: &str) -> Condition {
    Condition::or(vec![
        property_exists(&format!("scores.{plan_id}")),
        property_exists(&format!("systemProperties.scoreModifiers.{plan_id}")),
    ])
}
