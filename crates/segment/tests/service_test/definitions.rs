use std::io::Write;

use cohort_rules::schema::{Condition, Segment};
use cohort_rules::ConditionTypeRegistry;
use cohort_segment::{ChangeNotification, SegmentError};

use crate::helpers::{age_below, make_service, prop};

#[tokio::test]
async fn test_segment_round_trip() {
    let (_store, service) = make_service();
    let condition = Condition::and(vec![
        prop("properties.gender", "equals", "female"),
        age_below(30),
    ]);
    let segment = Segment::new("young-women", "Young women", condition.clone());

    service.set_segment_definition(segment.clone()).await.unwrap();

    let loaded = service
        .get_segment_definition("young-women")
        .await
        .unwrap()
        .expect("segment stored");
    assert_eq!(loaded, segment);
    assert_eq!(loaded.condition, Some(condition));
    assert!(service.get_segment_definition("nope").await.unwrap().is_none());

    let listed = service.list_segment_definitions().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(service.snapshot().segments.contains_key("young-women"));
}

#[tokio::test]
async fn test_rejected_definition_is_not_stored() {
    let (_store, service) = make_service();
    let segment = Segment::new(
        "broken",
        "Broken",
        Condition::and(vec![Condition::new("profilePropertyCondtion")]),
    );

    match service.set_segment_definition(segment).await {
        Err(SegmentError::Validation(report)) => {
            assert!(!report.valid);
            assert_eq!(report.errors[0].path, "condition.subConditions[0].typeId");
            assert_eq!(
                report.errors[0].suggestion.as_deref(),
                Some("Did you mean 'profilePropertyCondition'?")
            );
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(service.get_segment_definition("broken").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_required_parameter_is_rejected() {
    let (_store, service) = make_service();
    let segment = Segment::new("no-type", "No type", Condition::new("eventTypeCondition"));
    assert!(matches!(
        service.set_segment_definition(segment).await,
        Err(SegmentError::Validation(_))
    ));
}

#[tokio::test]
async fn test_custom_condition_types_from_yaml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
- id: newsletterCondition
  roleTags: [profile-condition]
  parameters:
    - id: listId
      type: string
      required: true
"#
    )
    .unwrap();

    let mut registry = ConditionTypeRegistry::builtin();
    let yaml = std::fs::read_to_string(file.path()).unwrap();
    assert_eq!(registry.load_yaml(&yaml).unwrap(), 1);

    let (_store, service) = make_service();
    let service = service.with_registry(registry);
    assert!(service.registry().contains("newsletterCondition"));

    let missing_list = Segment::new(
        "subscribers",
        "Subscribers",
        Condition::new("newsletterCondition"),
    );
    assert!(matches!(
        service.set_segment_definition(missing_list).await,
        Err(SegmentError::Validation(_))
    ));

    // Disabled definitions are stored without touching any profile.
    let mut segment = Segment::new(
        "subscribers",
        "Subscribers",
        Condition::new("newsletterCondition").with("listId", "weekly"),
    );
    segment.metadata.enabled = false;
    service.set_segment_definition(segment).await.unwrap();
    assert!(service.get_segment_definition("subscribers").await.unwrap().is_some());
    assert!(service.snapshot().segments.is_empty());
}

#[tokio::test]
async fn test_write_publishes_notifications() {
    let (store, service) = make_service();
    store
        .insert(&crate::helpers::person("p1", "female", 20))
        .unwrap();
    store
        .insert(&crate::helpers::person("p2", "male", 50))
        .unwrap();

    let notifier = std::sync::Arc::new(cohort_segment::BroadcastNotifier::new(16));
    let mut receiver = notifier.subscribe();
    let service = service.with_notifier(notifier);

    service
        .set_segment_definition(Segment::new("young", "Young", age_below(30)))
        .await
        .unwrap();

    let mut received = Vec::new();
    while let Ok(notification) = receiver.try_recv() {
        received.push(notification);
    }
    assert_eq!(
        received,
        vec![
            ChangeNotification::ProfileUpdated {
                profile_id: "p1".into()
            },
            ChangeNotification::SegmentUpdated {
                segment_id: "young".into()
            },
        ]
    );
}
