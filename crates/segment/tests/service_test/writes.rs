use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use cohort_core::config::SegmentConfig;
use cohort_core::{Event, Profile};
use cohort_rules::schema::{Condition, ScoringPlan, Segment, SyntheticCounterRule};
use cohort_rules::ConditionTypeRegistry;
use cohort_segment::{MemoryPersistence, SegmentError, SegmentService};

use crate::helpers::{
    age_below, definitions_dir, event_days_ago, event_type, make_service, members, nested_not,
    past_event, person, stored, test_config,
};

fn newsletter_opened(id: &str, profile_id: &str, list_id: &str) -> Event {
    let mut event = Event::new(id, "newsletterOpened", profile_id, Utc::now());
    event.properties.insert("listId".into(), json!(list_id));
    event
}

async fn rules(service: &SegmentService) -> Vec<SyntheticCounterRule> {
    service.get_synthetic_rules().await.unwrap()
}

#[tokio::test]
async fn test_catalogue_types_are_evaluated_through_parents() {
    let mut registry = ConditionTypeRegistry::builtin();
    registry
        .load_yaml_file(&definitions_dir().join("condition-types.yaml"))
        .unwrap();
    let store = Arc::new(MemoryPersistence::new().with_condition_types(registry.clone()));
    let service = SegmentService::new(store.clone(), test_config()).with_registry(registry);

    for id in ["p1", "p2", "p3"] {
        store
            .insert(&Profile::new(id).with_property("newsletters", json!(["weekly"])))
            .unwrap();
    }
    store.insert(&newsletter_opened("e1", "p1", "weekly")).unwrap();
    store.insert(&newsletter_opened("e2", "p2", "monthly")).unwrap();

    let yaml = std::fs::read_to_string(definitions_dir().join("newsletter-readers.yaml")).unwrap();
    let segment: Segment = serde_yaml::from_str(&yaml).unwrap();
    service.set_segment_definition(segment).await.unwrap();

    assert_eq!(
        members(&store, &["p1", "p2", "p3"], "newsletter-readers"),
        vec!["p1"]
    );
    let rules = rules(&service).await;
    assert_eq!(rules.len(), 1);
    assert!(rules[0].linked_items.contains("newsletter-readers"));
    assert_eq!(stored(&store, "p1").past_event_count(&rules[0].key), 1);
}

#[tokio::test]
async fn test_failed_backfill_leaves_storage_unchanged() {
    let mut registry = ConditionTypeRegistry::builtin();
    registry
        .load_yaml("- id: mysteryEventCondition\n  roleTags: [event-condition]\n")
        .unwrap();
    // The backend only knows the built-in types.
    let (store, service) = make_service();
    let service = service.with_registry(registry);

    store.insert(&person("p1", "female", 20)).unwrap();
    store.insert(&event_days_ago("e1", "purchase", "p1", 1)).unwrap();
    service
        .set_segment_definition(Segment::new("buyers", "Buyers", past_event(event_type("purchase"), Some(7))))
        .await
        .unwrap();
    service
        .set_segment_definition(Segment::new("readers", "Readers", age_below(30)))
        .await
        .unwrap();

    let rules_before = rules(&service).await;
    let readers_before = service.get_segment_definition("readers").await.unwrap();
    let profile_before = stored(&store, "p1");

    let result = service
        .set_segment_definition(Segment::new(
            "readers",
            "Readers",
            past_event(Condition::new("mysteryEventCondition"), Some(30)),
        ))
        .await;
    assert!(matches!(result, Err(SegmentError::Backend(_))));

    assert_eq!(rules(&service).await, rules_before);
    assert_eq!(service.get_segment_definition("readers").await.unwrap(), readers_before);
    assert_eq!(stored(&store, "p1").segments, profile_before.segments);

    // A definition that never existed is not left behind either.
    let result = service
        .set_segment_definition(Segment::new(
            "mystery",
            "Mystery",
            past_event(Condition::new("mysteryEventCondition"), None),
        ))
        .await;
    assert!(result.is_err());
    assert!(service.get_segment_definition("mystery").await.unwrap().is_none());
    assert_eq!(rules(&service).await, rules_before);
}

/// A service validating `depth` levels over a store sized for `store_depth`.
fn depth_limited(depth: usize, store_depth: usize) -> (Arc<MemoryPersistence>, SegmentService) {
    let config = SegmentConfig {
        max_condition_depth: depth,
        ..test_config()
    };
    let types = ConditionTypeRegistry::builtin().with_max_depth(store_depth);
    let store = Arc::new(MemoryPersistence::new().with_condition_types(types));
    let service = SegmentService::new(store.clone(), config);
    (store, service)
}

#[tokio::test]
async fn test_failed_reconciliation_restores_previous_definition() {
    // The service accepts deeper trees than the backend evaluates.
    let (store, service) = depth_limited(20, 10);
    store.insert(&person("p1", "female", 20)).unwrap();
    store.insert(&person("p2", "female", 50)).unwrap();
    store.insert(&event_days_ago("e1", "purchase", "p1", 1)).unwrap();

    let young_buyers = Condition::and(vec![age_below(30), past_event(event_type("purchase"), Some(7))]);
    service
        .set_segment_definition(Segment::new("deep", "Deep", young_buyers))
        .await
        .unwrap();
    assert_eq!(members(&store, &["p1", "p2"], "deep"), vec!["p1"]);

    let rules_before = rules(&service).await;
    assert_eq!(rules_before.len(), 1);
    let deep_before = service.get_segment_definition("deep").await.unwrap();

    // Drops the past-event counter, then fails while reconciling.
    let result = service
        .set_segment_definition(Segment::new("deep", "Deep", nested_not(Condition::match_all(), 16)))
        .await;
    assert!(matches!(result, Err(SegmentError::Backend(_))));

    assert_eq!(rules(&service).await, rules_before);
    assert_eq!(service.get_segment_definition("deep").await.unwrap(), deep_before);
    assert_eq!(members(&store, &["p1", "p2"], "deep"), vec!["p1"]);
}

#[tokio::test]
async fn test_tree_at_configured_depth_is_applied() {
    let (store, service) = depth_limited(12, 12);
    store.insert(&person("p1", "female", 20)).unwrap();

    service
        .set_segment_definition(Segment::new("edge", "Edge", nested_not(Condition::match_all(), 12)))
        .await
        .unwrap();
    assert_eq!(members(&store, &["p1"], "edge"), vec!["p1"]);
    assert!(service.get_segment_definition("edge").await.unwrap().is_some());

    let result = service
        .set_segment_definition(Segment::new("beyond", "Beyond", nested_not(Condition::match_all(), 13)))
        .await;
    assert!(matches!(result, Err(SegmentError::Validation(_))));
    assert!(service.get_segment_definition("beyond").await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_scoring_write_restores_scores() {
    let mut registry = ConditionTypeRegistry::builtin();
    registry
        .load_yaml("- id: mysteryEventCondition\n  roleTags: [event-condition]\n")
        .unwrap();
    let (store, service) = make_service();
    let service = service.with_registry(registry);
    store.insert(&person("p1", "female", 20)).unwrap();
    store.insert(&event_days_ago("e1", "purchase", "p1", 1)).unwrap();

    let plan = ScoringPlan::new("engagement", "Engagement").with_element(age_below(30), 10);
    service.set_scoring_definition(plan).await.unwrap();
    assert_eq!(stored(&store, "p1").scores.get("engagement"), Some(&10));
    let plan_before = service.get_scoring_definition("engagement").await.unwrap();

    let broken = ScoringPlan::new("engagement", "Engagement")
        .with_element(age_below(30), 10)
        .with_element(past_event(Condition::new("mysteryEventCondition"), Some(7)), 5);
    assert!(service.set_scoring_definition(broken).await.is_err());

    assert_eq!(service.get_scoring_definition("engagement").await.unwrap(), plan_before);
    assert!(rules(&service).await.is_empty());
    assert_eq!(stored(&store, "p1").scores.get("engagement"), Some(&10));
}

#[tokio::test]
async fn test_disabled_definitions_hold_no_counters() {
    let (store, service) = make_service();
    store.insert(&Profile::new("p1")).unwrap();
    store.insert(&event_days_ago("e1", "purchase", "p1", 1)).unwrap();

    let mut buyers = Segment::new("buyers", "Buyers", past_event(event_type("purchase"), Some(7)));
    buyers.metadata.enabled = false;
    service.set_segment_definition(buyers.clone()).await.unwrap();
    assert!(rules(&service).await.is_empty());

    buyers.metadata.enabled = true;
    service.set_segment_definition(buyers.clone()).await.unwrap();
    let rules_now = rules(&service).await;
    assert_eq!(rules_now.len(), 1);
    assert_eq!(stored(&store, "p1").past_event_count(&rules_now[0].key), 1);
    assert_eq!(members(&store, &["p1"], "buyers"), vec!["p1"]);

    buyers.metadata.enabled = false;
    service.set_segment_definition(buyers).await.unwrap();
    assert!(rules(&service).await.is_empty());
    assert!(members(&store, &["p1"], "buyers").is_empty());
}
