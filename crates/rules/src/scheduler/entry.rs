//! Per-task schedule entry.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Scheduling state for a single task.
#[derive(Debug, Clone)]
pub struct TaskScheduleEntry {
    pub task_id: String,
    /// Normalized 6-field cron expression (seconds prepended).
    pub cron_expression: String,
    /// Minimum interval between successive runs.
    pub cooldown: Option<Duration>,
    pub last_run: Option<DateTime<Utc>>,
    pub enabled: bool,
}
