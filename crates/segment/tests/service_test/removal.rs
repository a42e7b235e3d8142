use cohort_rules::schema::{Condition, ScoringPlan, Segment};
use cohort_rules::{DependencyAnalyzer, ReferenceKind};
use cohort_segment::SegmentError;

use crate::helpers::{age_below, in_segments, make_service, members, person, prop, stored};

async fn seed_vip(service: &cohort_segment::SegmentService) {
    service
        .set_segment_definition(Segment::new(
            "vip",
            "VIP",
            prop("properties.tier", "equals", "gold"),
        ))
        .await
        .unwrap();
    service
        .set_segment_definition(Segment::new(
            "young-vip",
            "Young VIP",
            Condition::and(vec![in_segments(&["vip"]), age_below(30)]),
        ))
        .await
        .unwrap();
    service
        .set_segment_definition(Segment::new("only-vip", "Only VIP", in_segments(&["vip"])))
        .await
        .unwrap();
    service
        .set_scoring_definition(
            ScoringPlan::new("loyalty", "Loyalty")
                .with_element(in_segments(&["vip"]), 10)
                .with_element(Condition::match_all(), 1),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_validate_only_removal_refuses_and_changes_nothing() {
    let (_store, service) = make_service();
    seed_vip(&service).await;
    let before = service.list_segment_definitions().await.unwrap();
    let plan_before = service.get_scoring_definition("loyalty").await.unwrap();

    let blocked = match service.remove_segment_definition("vip", true).await {
        Err(SegmentError::DependencyConflict(dm)) => dm,
        other => panic!("expected dependency conflict, got {other:?}"),
    };
    assert_eq!(
        blocked.segments.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        vec!["only-vip", "young-vip"]
    );
    assert_eq!(blocked.scorings.len(), 1);
    assert_eq!(blocked.scorings[0].id, "loyalty");

    assert_eq!(service.list_segment_definitions().await.unwrap(), before);
    assert_eq!(service.get_scoring_definition("loyalty").await.unwrap(), plan_before);

    let reported = service.get_segment_dependent_metadata("vip").await.unwrap();
    assert_eq!(reported.segments.len(), 2);
    assert!(service
        .get_segment_dependent_metadata("young-vip")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_validate_only_removal_without_dependents_proceeds() {
    let (_store, service) = make_service();
    service
        .set_segment_definition(Segment::new("lonely", "Lonely", age_below(10)))
        .await
        .unwrap();
    let dm = service.remove_segment_definition("lonely", true).await.unwrap();
    assert!(dm.is_empty());
    assert!(service.get_segment_definition("lonely").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cascading_removal_rewrites_dependents() {
    let (store, service) = make_service();
    let mut gold = person("p1", "female", 20);
    gold.properties.insert("tier".into(), "gold".into());
    store.insert(&gold).unwrap();
    store.insert(&person("p2", "male", 20)).unwrap();
    seed_vip(&service).await;
    assert_eq!(members(&store, &["p1", "p2"], "vip"), vec!["p1"]);
    assert_eq!(members(&store, &["p1", "p2"], "only-vip"), vec!["p1"]);
    assert_eq!(stored(&store, "p1").scores.get("loyalty"), Some(&11));

    let dm = service.remove_segment_definition("vip", false).await.unwrap();
    assert_eq!(dm.segments.len(), 2);
    assert_eq!(dm.scorings.len(), 1);

    assert!(service.get_segment_definition("vip").await.unwrap().is_none());

    let young = service.get_segment_definition("young-vip").await.unwrap().unwrap();
    assert!(young.metadata.enabled);
    assert_eq!(young.condition, Some(age_below(30)));

    let only = service.get_segment_definition("only-vip").await.unwrap().unwrap();
    assert!(!only.metadata.enabled);
    assert!(only.condition.is_none());

    let loyalty = service.get_scoring_definition("loyalty").await.unwrap().unwrap();
    assert_eq!(loyalty.elements.len(), 1);
    assert_eq!(loyalty.elements[0].condition, Condition::match_all());

    // No stored condition still points at the removed segment.
    let analyzer = DependencyAnalyzer::new(service.registry());
    for segment in service.list_segment_definitions().await.unwrap() {
        if let Some(condition) = &segment.condition {
            assert!(!analyzer.impacts(condition, ReferenceKind::Segment, "vip").unwrap());
        }
    }
    for plan in service.list_scoring_definitions().await.unwrap() {
        for element in &plan.elements {
            assert!(!analyzer
                .impacts(&element.condition, ReferenceKind::Segment, "vip")
                .unwrap());
        }
    }

    // Memberships and scores follow the rewritten definitions.
    let p1 = stored(&store, "p1");
    assert!(!p1.segments.contains("vip"));
    assert!(!p1.segments.contains("only-vip"));
    assert!(p1.segments.contains("young-vip"));
    assert_eq!(p1.scores.get("loyalty"), Some(&1));
    assert_eq!(members(&store, &["p1", "p2"], "young-vip"), vec!["p1", "p2"]);
}

#[tokio::test]
async fn test_scoring_removal_respects_references() {
    let (store, service) = make_service();
    store.insert(&person("p1", "female", 20)).unwrap();
    service
        .set_scoring_definition(
            ScoringPlan::new("engagement", "Engagement").with_element(age_below(30), 20),
        )
        .await
        .unwrap();
    service
        .set_segment_definition(Segment::new(
            "engaged",
            "Engaged",
            Condition::new("scoringCondition")
                .with("scoringPlanId", "engagement")
                .with("scoreValue", 10),
        ))
        .await
        .unwrap();
    assert!(stored(&store, "p1").segments.contains("engaged"));

    let dm = service
        .get_scoring_dependent_metadata("engagement")
        .await
        .unwrap();
    assert_eq!(dm.segments[0].id, "engaged");
    assert!(matches!(
        service.remove_scoring_definition("engagement", true).await,
        Err(SegmentError::DependencyConflict(_))
    ));
    assert_eq!(stored(&store, "p1").scores.get("engagement"), Some(&20));

    service
        .remove_scoring_definition("engagement", false)
        .await
        .unwrap();
    assert!(service.get_scoring_definition("engagement").await.unwrap().is_none());
    let engaged = service.get_segment_definition("engaged").await.unwrap().unwrap();
    assert!(!engaged.metadata.enabled);
    let p1 = stored(&store, "p1");
    assert!(p1.scores.get("engagement").is_none());
    assert!(!p1.segments.contains("engaged"));
}

#[tokio::test]
async fn test_removing_unknown_definition_is_not_found() {
    let (_store, service) = make_service();
    assert!(matches!(
        service.remove_segment_definition("ghost", false).await,
        Err(SegmentError::NotFound(id)) if id == "ghost"
    ));
    assert!(matches!(
        service.remove_scoring_definition("ghost", true).await,
        Err(SegmentError::NotFound(_))
    ));
}
