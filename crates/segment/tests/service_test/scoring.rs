use cohort_rules::schema::ScoringPlan;

use crate::helpers::{age_below, make_service, person, prop, stored};

fn engagement() -> ScoringPlan {
    ScoringPlan::new("engagement", "Engagement")
        .with_element(prop("properties.gender", "equals", "female"), 10)
        .with_element(age_below(30), 5)
}

#[tokio::test]
async fn test_scores_are_additive_and_idempotent() {
    let (store, service) = make_service();
    store.insert(&person("a", "female", 20)).unwrap();
    store.insert(&person("b", "male", 40)).unwrap();
    let mut c = person("c", "female", 50);
    c.system_properties
        .score_modifiers
        .insert("engagement".into(), 100);
    store.insert(&c).unwrap();

    service.set_scoring_definition(engagement()).await.unwrap();
    assert_eq!(stored(&store, "a").scores.get("engagement"), Some(&15));
    assert!(stored(&store, "b").scores.get("engagement").is_none());
    assert_eq!(stored(&store, "c").scores.get("engagement"), Some(&110));

    // Saving again does not double count.
    service.set_scoring_definition(engagement()).await.unwrap();
    assert_eq!(stored(&store, "a").scores.get("engagement"), Some(&15));
    assert_eq!(stored(&store, "c").scores.get("engagement"), Some(&110));

    let live = service
        .get_segments_and_scores_for_profile(&stored(&store, "a"))
        .unwrap();
    assert_eq!(live.scores.get("engagement"), Some(&15));
    let live = service
        .get_segments_and_scores_for_profile(&stored(&store, "b"))
        .unwrap();
    assert!(live.scores.is_empty());
}

#[tokio::test]
async fn test_disabled_plan_falls_back_to_modifier() {
    let (store, service) = make_service();
    store.insert(&person("a", "female", 20)).unwrap();
    let mut c = person("c", "female", 50);
    c.system_properties
        .score_modifiers
        .insert("engagement".into(), 100);
    store.insert(&c).unwrap();
    service.set_scoring_definition(engagement()).await.unwrap();

    let mut disabled = engagement();
    disabled.metadata.enabled = false;
    service.set_scoring_definition(disabled).await.unwrap();

    assert!(stored(&store, "a").scores.get("engagement").is_none());
    assert_eq!(stored(&store, "c").scores.get("engagement"), Some(&100));
    assert!(!service.snapshot().scorings.contains_key("engagement"));
}

#[tokio::test]
async fn test_removed_plan_strips_scores() {
    let (store, service) = make_service();
    store.insert(&person("a", "female", 20)).unwrap();
    service.set_scoring_definition(engagement()).await.unwrap();
    assert_eq!(service.list_scoring_definitions().await.unwrap().len(), 1);

    let dm = service
        .remove_scoring_definition("engagement", true)
        .await
        .unwrap();
    assert!(dm.is_empty());
    assert!(stored(&store, "a").scores.is_empty());
    assert!(service.list_scoring_definitions().await.unwrap().is_empty());
}
