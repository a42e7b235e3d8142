use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cohort_core::Profile;
use cohort_rules::scheduler::{ScheduledTask, TaskScheduler};
use cohort_rules::schema::Segment;
use cohort_segment::background::{
    maintenance_tasks, run_due_tasks, spawn_maintenance_loop, spawn_refresh_loop, PAST_EVENTS_TASK,
};
use cohort_segment::SegmentService;
use tokio::sync::watch;

use crate::helpers::{age_below, event_days_ago, event_type, generated_key, make_service, past_event, stored, test_config};

#[tokio::test]
async fn test_refresh_loop_publishes_new_definitions() {
    let (store, service) = make_service_refreshing_every(Duration::from_millis(10));
    store
        .insert(&Segment::new("young", "Young", age_below(30)))
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = spawn_refresh_loop(service.clone(), shutdown_rx);

    let mut published = false;
    for _ in 0..50 {
        if service.snapshot().segments.contains_key("young") {
            published = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(published);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop stopped")
        .unwrap();
}

fn make_service_refreshing_every(
    interval: Duration,
) -> (Arc<cohort_segment::MemoryPersistence>, Arc<SegmentService>) {
    let store = Arc::new(cohort_segment::MemoryPersistence::new());
    let config = cohort_core::config::SegmentConfig {
        refresh_interval: interval,
        ..test_config()
    };
    let service = Arc::new(SegmentService::new(store.clone(), config));
    (store, service)
}

#[tokio::test]
async fn test_due_recalculation_runs_and_is_recorded() {
    let (store, service) = make_service();
    store.insert(&Profile::new("p1")).unwrap();
    service
        .set_segment_definition(Segment::new(
            "viewers",
            "Viewers",
            past_event(event_type("view"), None),
        ))
        .await
        .unwrap();
    let key = generated_key(
        service
            .get_segment_definition("viewers")
            .await
            .unwrap()
            .unwrap()
            .condition
            .as_ref()
            .unwrap(),
    )
    .unwrap();
    store.insert(&event_days_ago("e1", "view", "p1", 3)).unwrap();

    let mut scheduler = TaskScheduler::new();
    scheduler.sync_tasks(&[ScheduledTask::new(PAST_EVENTS_TASK, "* * * * *")]);
    let now = Utc::now();

    let completed = run_due_tasks(&service, &mut scheduler, now).await;
    assert_eq!(completed, vec![PAST_EVENTS_TASK.to_string()]);
    assert_eq!(scheduler.get(PAST_EVENTS_TASK).unwrap().last_run, Some(now));
    assert_eq!(stored(&store, "p1").past_event_count(&key), 1);
    assert!(stored(&store, "p1").segments.contains("viewers"));

    // Nothing new is due at the same instant.
    assert!(run_due_tasks(&service, &mut scheduler, now).await.is_empty());
}

#[tokio::test]
async fn test_failed_task_is_retried() {
    let (store, service) = make_service();
    let mut scheduler = TaskScheduler::new();
    // A daily schedule always has one tick inside the first lookback window.
    scheduler.sync_tasks(&maintenance_tasks(&test_config()));

    store.set_unavailable(true);
    let now = Utc::now();
    assert!(run_due_tasks(&service, &mut scheduler, now).await.is_empty());
    assert!(scheduler.get(PAST_EVENTS_TASK).unwrap().last_run.is_none());

    store.set_unavailable(false);
    assert_eq!(
        run_due_tasks(&service, &mut scheduler, now).await,
        vec![PAST_EVENTS_TASK.to_string()]
    );
}

#[tokio::test]
async fn test_maintenance_loop_stops_on_shutdown() {
    let (_store, service) = make_service();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = spawn_maintenance_loop(Arc::new(service), shutdown_rx);

    drop(shutdown_tx);
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop stopped")
        .unwrap();
}
