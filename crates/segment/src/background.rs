//! Background loops: periodic snapshot refresh and cron-driven maintenance.
//!
//! Both loops stop when the shutdown channel flips to `true` or its sender
//! is dropped. A failed cycle is logged and retried on the next tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cohort_core::config::SegmentConfig;
use cohort_rules::scheduler::{ScheduledTask, TaskScheduler};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::service::SegmentService;

/// Task id of the daily past-event recalculation.
pub const PAST_EVENTS_TASK: &str = "recalculate-past-events";

/// The maintenance tasks implied by `config`.
pub fn maintenance_tasks(config: &SegmentConfig) -> Vec<ScheduledTask> {
    vec![ScheduledTask::new(PAST_EVENTS_TASK, config.past_events_cron.as_str())]
}

/// Rebuild the definition snapshot every `refresh_interval`.
pub fn spawn_refresh_loop(
    service: Arc<SegmentService>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(service.config().refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = service.refresh_definitions().await {
                        warn!(error = %e, "definition refresh failed, keeping previous snapshot");
                    }
                }
                _ = shutdown.changed() => {
                    info!("refresh loop stopped");
                    break;
                }
            }
        }
    })
}

/// Check the maintenance schedule every `task_tick` and run whatever is due.
pub fn spawn_maintenance_loop(
    service: Arc<SegmentService>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut scheduler = TaskScheduler::new();
    scheduler.sync_tasks(&maintenance_tasks(service.config()));

    tokio::spawn(async move {
        let mut ticker = interval(service.config().task_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_due_tasks(&service, &mut scheduler, Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    info!("maintenance loop stopped");
                    break;
                }
            }
        }
    })
}

/// Run every task due at `now`. Only successful runs are recorded, so a
/// failed task is due again on the next tick. Returns the ids that completed.
pub async fn run_due_tasks(
    service: &SegmentService,
    scheduler: &mut TaskScheduler,
    now: DateTime<Utc>,
) -> Vec<String> {
    let due: Vec<String> = scheduler
        .due_tasks(now)
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut completed = Vec::new();
    for task_id in due {
        let outcome = match task_id.as_str() {
            PAST_EVENTS_TASK => service
                .recalculate_past_event_conditions()
                .await
                .map(|summary| debug!(rules = summary.rules, "scheduled recalculation done")),
            other => {
                warn!(task_id = %other, "no handler for scheduled task");
                continue;
            }
        };
        match outcome {
            Ok(()) => {
                scheduler.record_run_at(&task_id, now);
                completed.push(task_id);
            }
            Err(e) => warn!(task_id = %task_id, error = %e, "scheduled task failed, will retry"),
        }
    }
    completed
}
