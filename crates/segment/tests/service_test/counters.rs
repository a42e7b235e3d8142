use cohort_core::Profile;
use cohort_rules::counter_key;
use cohort_rules::schema::{Condition, ScoringPlan, Segment};

use crate::helpers::{event_days_ago, event_type, generated_key, make_service, past_event, prop, stored};

#[tokio::test]
async fn test_past_event_count_scenario() {
    let (store, service) = make_service();
    store.insert(&Profile::new("p1")).unwrap();
    store.insert(&Profile::new("p2")).unwrap();
    store.insert(&event_days_ago("e1", "test-event", "p1", 1)).unwrap();
    store.insert(&event_days_ago("e2", "test-event", "p1", 2)).unwrap();
    store.insert(&event_days_ago("e3", "other-event", "p1", 1)).unwrap();
    store.insert(&event_days_ago("e4", "test-event", "p2", 40)).unwrap();

    service
        .set_segment_definition(Segment::new(
            "testers",
            "Testers",
            past_event(event_type("test-event"), Some(30)),
        ))
        .await
        .unwrap();

    let saved = service.get_segment_definition("testers").await.unwrap().unwrap();
    let key = generated_key(saved.condition.as_ref().unwrap()).expect("key annotated");
    assert_eq!(key, counter_key(&event_type("test-event"), Some(30)).unwrap());
    assert!(key.starts_with("eventTriggered"));

    // Backfilled before membership was reconciled.
    assert_eq!(stored(&store, "p1").past_event_count(&key), 2);
    assert!(stored(&store, "p1").segments.contains("testers"));
    assert_eq!(stored(&store, "p2").past_event_count(&key), 0);
    assert!(!stored(&store, "p2").segments.contains("testers"));

    let summary = service.recalculate_past_event_conditions().await.unwrap();
    assert_eq!(summary.rules, 1);
    assert_eq!(summary.failures, 0);
    assert_eq!(stored(&store, "p1").past_event_count(&key), 2);

    store.insert(&event_days_ago("e5", "test-event", "p1", 0)).unwrap();
    service.recalculate_past_event_conditions().await.unwrap();
    assert_eq!(stored(&store, "p1").past_event_count(&key), 3);
}

#[tokio::test]
async fn test_identical_past_event_conditions_share_one_rule() {
    let (_store, service) = make_service();
    let purchases = || past_event(event_type("purchase"), Some(7));
    service
        .set_segment_definition(Segment::new("buyers", "Buyers", purchases()))
        .await
        .unwrap();
    service
        .set_segment_definition(Segment::new(
            "female-buyers",
            "Female buyers",
            Condition::and(vec![prop("properties.gender", "equals", "female"), purchases()]),
        ))
        .await
        .unwrap();
    service
        .set_segment_definition(Segment::new(
            "lifetime-buyers",
            "Lifetime buyers",
            past_event(event_type("purchase"), None),
        ))
        .await
        .unwrap();

    let rules = service.get_synthetic_rules().await.unwrap();
    assert_eq!(rules.len(), 2);
    let weekly_key = counter_key(&event_type("purchase"), Some(7)).unwrap();
    let weekly = rules.iter().find(|r| r.key == weekly_key).expect("weekly rule");
    assert!(weekly.hidden);
    assert_eq!(weekly.window_days, Some(7));
    assert_eq!(
        weekly.linked_items.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["buyers", "female-buyers"]
    );

    // The last unlink deletes the rule.
    service.remove_segment_definition("buyers", false).await.unwrap();
    let rules = service.get_synthetic_rules().await.unwrap();
    let weekly = rules.iter().find(|r| r.key == weekly_key).expect("still linked");
    assert_eq!(weekly.linked_items.len(), 1);

    service
        .remove_segment_definition("female-buyers", false)
        .await
        .unwrap();
    let rules = service.get_synthetic_rules().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert!(rules[0].linked_items.contains("lifetime-buyers"));
}

#[tokio::test]
async fn test_redefining_segment_relinks_rules() {
    let (_store, service) = make_service();
    service
        .set_segment_definition(Segment::new(
            "active",
            "Active",
            past_event(event_type("login"), Some(7)),
        ))
        .await
        .unwrap();
    service
        .set_segment_definition(Segment::new(
            "active",
            "Active",
            past_event(event_type("login"), Some(30)),
        ))
        .await
        .unwrap();

    let rules = service.get_synthetic_rules().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].window_days, Some(30));
}

#[tokio::test]
async fn test_stale_windowed_counters_reset_to_zero() {
    let (store, service) = make_service();
    let key = counter_key(&event_type("visit"), Some(30)).unwrap();
    let mut p1 = Profile::new("p1");
    p1.system_properties.past_events.insert(key.clone(), 4);
    store.insert(&p1).unwrap();
    store.insert(&Profile::new("p2")).unwrap();
    store.insert(&event_days_ago("e1", "visit", "p2", 1)).unwrap();

    service
        .set_segment_definition(Segment::new(
            "visitors",
            "Visitors",
            past_event(event_type("visit"), Some(30)),
        ))
        .await
        .unwrap();

    assert_eq!(stored(&store, "p1").past_event_count(&key), 0);
    assert_eq!(stored(&store, "p2").past_event_count(&key), 1);
    assert!(!stored(&store, "p1").segments.contains("visitors"));
    assert!(stored(&store, "p2").segments.contains("visitors"));
}

#[tokio::test]
async fn test_recalculation_updates_linked_definitions() {
    let (store, service) = make_service();
    store.insert(&Profile::new("p1")).unwrap();
    store.insert(&event_days_ago("e1", "purchase", "p1", 1)).unwrap();

    let repeat = past_event(event_type("purchase"), Some(30)).with("minimumEventCount", 2);
    service
        .set_segment_definition(Segment::new("repeat-buyers", "Repeat buyers", repeat))
        .await
        .unwrap();
    service
        .set_scoring_definition(
            ScoringPlan::new("buyer-score", "Buyer score")
                .with_element(past_event(event_type("purchase"), Some(30)), 5),
        )
        .await
        .unwrap();
    assert!(!stored(&store, "p1").segments.contains("repeat-buyers"));
    assert_eq!(stored(&store, "p1").scores.get("buyer-score"), Some(&5));

    store.insert(&event_days_ago("e2", "purchase", "p1", 0)).unwrap();
    let summary = service.recalculate_past_event_conditions().await.unwrap();
    assert_eq!(summary.rules, 1);

    let p1 = stored(&store, "p1");
    assert!(p1.segments.contains("repeat-buyers"));
    assert_eq!(p1.scores.get("buyer-score"), Some(&5));
}
