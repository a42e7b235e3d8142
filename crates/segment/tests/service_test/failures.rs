use std::time::Duration;

use cohort_core::CohortError;
use cohort_rules::schema::Segment;
use cohort_segment::{SegmentError, SegmentService};

use crate::helpers::{age_below, make_service, make_service_with, members, person, test_config};

#[tokio::test]
async fn test_per_profile_failure_does_not_abort() {
    let (store, service) = make_service();
    for id in ["a", "b", "c"] {
        store.insert(&person(id, "female", 20)).unwrap();
    }
    store.fail_updates_for("b");

    service
        .set_segment_definition(Segment::new("young", "Young", age_below(30)))
        .await
        .unwrap();
    assert_eq!(members(&store, &["a", "b", "c"], "young"), vec!["a", "c"]);
}

#[tokio::test]
async fn test_expired_scroll_rolls_back_and_rerun_converges() {
    let config = cohort_core::config::SegmentConfig {
        update_batch_size: 1,
        scroll_validity: Duration::ZERO,
        ..test_config()
    };
    let (store, service) = make_service_with(config);
    let ids = ["a", "b", "c"];
    for id in ids {
        store.insert(&person(id, "female", 20)).unwrap();
    }

    let segment = Segment::new("young", "Young", age_below(30));
    match service.set_segment_definition(segment.clone()).await {
        Err(SegmentError::Backend(CohortError::ScrollExpired(_))) => {}
        other => panic!("expected an expired scroll, got {other:?}"),
    }
    assert!(service.get_segment_definition("young").await.unwrap().is_none());
    assert!(service.get_synthetic_rules().await.unwrap().is_empty());

    let service = SegmentService::new(store.clone(), test_config());
    service.set_segment_definition(segment).await.unwrap();
    assert_eq!(members(&store, &ids, "young"), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_backend_unavailable_is_fatal() {
    let (store, service) = make_service();
    store.insert(&person("a", "female", 20)).unwrap();
    store.set_unavailable(true);

    let result = service
        .set_segment_definition(Segment::new("young", "Young", age_below(30)))
        .await;
    assert!(matches!(
        result,
        Err(SegmentError::Backend(CohortError::Storage(_)))
    ));
    assert!(matches!(
        service.recalculate_past_event_conditions().await,
        Err(SegmentError::Backend(CohortError::Storage(_)))
    ));

    store.set_unavailable(false);
    assert!(service.get_segment_definition("young").await.unwrap().is_none());
}
