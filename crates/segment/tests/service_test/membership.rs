use cohort_rules::schema::{Condition, Segment};

use crate::helpers::{age_below, make_service, members, person, prop, stored};

#[tokio::test]
async fn test_female_thirty_scenario() {
    let (store, service) = make_service();
    let condition = Condition::and(vec![
        prop("properties.gender", "equals", "female"),
        prop("properties.age", "equals", 30),
    ]);
    store.insert(&person("p1", "female", 30)).unwrap();
    service
        .set_segment_definition(Segment::new("female-30", "Female, 30", condition))
        .await
        .unwrap();

    let profile = stored(&store, "p1");
    assert!(profile.segments.contains("female-30"));
    assert!(service.is_profile_in_segment(&profile, "female-30").unwrap());

    let older = person("p1", "female", 40);
    assert!(!service.is_profile_in_segment(&older, "female-30").unwrap());
}

#[tokio::test]
async fn test_reconciliation_converges() {
    let (store, service) = make_service();
    let ids = ["a", "b", "c", "d", "e"];
    store.insert(&person("a", "female", 20)).unwrap();
    store.insert(&person("b", "male", 40)).unwrap();
    store.insert(&person("e", "male", 21)).unwrap();
    // Flagged by some other writer: c still qualifies, d never did.
    let mut c = person("c", "female", 25);
    c.segments.insert("young".into());
    store.insert(&c).unwrap();
    let mut d = person("d", "male", 50);
    d.segments.insert("young".into());
    d.segments.insert("other".into());
    store.insert(&d).unwrap();

    service
        .set_segment_definition(Segment::new("young", "Young", age_below(30)))
        .await
        .unwrap();
    assert_eq!(members(&store, &ids, "young"), vec!["a", "c", "e"]);
    assert!(stored(&store, "d").segments.contains("other"));
    assert!(stored(&store, "a").system_properties.last_updated.is_some());

    // Population changes, then the definition tightens.
    store.insert(&person("b", "male", 18)).unwrap();
    service
        .set_segment_definition(Segment::new("young", "Young", age_below(22)))
        .await
        .unwrap();
    assert_eq!(members(&store, &ids, "young"), vec!["a", "b", "e"]);
}

#[tokio::test]
async fn test_matching_invariant_over_population() {
    let (store, service) = make_service();
    let population = vec![
        person("p1", "female", 30),
        person("p2", "female", 45),
        person("p3", "male", 30),
        person("p4", "male", 19),
    ];
    for p in &population {
        store.insert(p).unwrap();
    }
    let women = Segment::new("women", "Women", prop("properties.gender", "equals", "female"));
    let mut teens = Segment::new("teens", "Teens", age_below(20));
    teens.metadata.enabled = false;
    service.set_segment_definition(women.clone()).await.unwrap();
    service.set_segment_definition(teens.clone()).await.unwrap();

    for p in &population {
        for segment in [&women, &teens] {
            let expected = segment.metadata.enabled
                && store_match(&service, segment.condition.as_ref().unwrap(), p);
            assert_eq!(
                service.is_profile_in_segment(p, segment.id()).unwrap(),
                expected,
                "{} / {}",
                p.id,
                segment.id()
            );
            assert_eq!(
                stored(&store, &p.id).segments.contains(segment.id()),
                expected
            );
        }
    }
}

fn store_match(
    service: &cohort_segment::SegmentService,
    condition: &Condition,
    profile: &cohort_core::Profile,
) -> bool {
    let doc = serde_json::to_value(profile).unwrap();
    service.persistence().test_match(condition, &doc).unwrap()
}

#[tokio::test]
async fn test_disabling_segment_clears_membership() {
    let (store, service) = make_service();
    for (id, age) in [("a", 20), ("b", 25), ("c", 60)] {
        store.insert(&person(id, "female", age)).unwrap();
    }
    let mut segment = Segment::new("young", "Young", age_below(30));
    service.set_segment_definition(segment.clone()).await.unwrap();
    assert_eq!(members(&store, &["a", "b", "c"], "young"), vec!["a", "b"]);

    segment.metadata.enabled = false;
    service.set_segment_definition(segment).await.unwrap();
    assert!(members(&store, &["a", "b", "c"], "young").is_empty());
    assert!(!service.snapshot().segments.contains_key("young"));
}

#[tokio::test]
async fn test_segment_reference_follows_membership() {
    let (store, service) = make_service();
    store.insert(&person("a", "female", 20)).unwrap();
    store.insert(&person("b", "male", 20)).unwrap();
    service
        .set_segment_definition(Segment::new(
            "women",
            "Women",
            prop("properties.gender", "equals", "female"),
        ))
        .await
        .unwrap();
    service
        .set_segment_definition(Segment::new(
            "young-women",
            "Young women",
            Condition::and(vec![crate::helpers::in_segments(&["women"]), age_below(30)]),
        ))
        .await
        .unwrap();

    assert_eq!(members(&store, &["a", "b"], "young-women"), vec!["a"]);
    let scores = service
        .get_segments_and_scores_for_profile(&stored(&store, "a"))
        .unwrap();
    assert_eq!(
        scores.segments.into_iter().collect::<Vec<_>>(),
        vec!["women".to_string(), "young-women".to_string()]
    );
}
