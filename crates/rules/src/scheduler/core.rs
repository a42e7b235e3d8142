//! [`TaskScheduler`]: scheduling state for all maintenance tasks.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cohort_core::config::parse_duration;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cron::{is_cron_due, normalize_cron};
use super::entry::TaskScheduleEntry;

/// Declaration of a periodic task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    /// 5- or 6-field cron expression.
    pub cron: String,
    /// Human duration such as `"30m"` or `"1d12h"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<String>,
    #[serde(default = "crate::schema::default_true")]
    pub enabled: bool,
}

impl ScheduledTask {
    pub fn new(id: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cron: cron.into(),
            cooldown: None,
            enabled: true,
        }
    }

    pub fn with_cooldown(mut self, cooldown: impl Into<String>) -> Self {
        self.cooldown = Some(cooldown.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Tracks when each task last ran and which are due.
///
/// Call [`sync_tasks`](TaskScheduler::sync_tasks) whenever the task set
/// changes and [`due_tasks`](TaskScheduler::due_tasks) from the tick loop.
pub struct TaskScheduler {
    entries: HashMap<String, TaskScheduleEntry>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add new tasks, update changed ones (keeping `last_run`), drop missing ones.
    pub fn sync_tasks(&mut self, tasks: &[ScheduledTask]) {
        let current: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        self.entries.retain(|id, _| current.contains(id.as_str()));

        for task in tasks {
            let cron_expression = normalize_cron(&task.cron);
            let cooldown = task.cooldown.as_deref().and_then(parse_duration);

            match self.entries.get_mut(&task.id) {
                Some(entry) => {
                    entry.cron_expression = cron_expression;
                    entry.cooldown = cooldown;
                    entry.enabled = task.enabled;
                }
                None => {
                    self.entries.insert(
                        task.id.clone(),
                        TaskScheduleEntry {
                            task_id: task.id.clone(),
                            cron_expression,
                            cooldown,
                            last_run: None,
                            enabled: task.enabled,
                        },
                    );
                }
            }
        }
    }

    /// Whether `task_id` should run at `now`.
    ///
    /// False for unknown or disabled tasks, invalid cron expressions, a cron
    /// window that has not arrived, or a cooldown that has not elapsed.
    pub fn should_run(&self, task_id: &str, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get(task_id) else {
            return false;
        };
        if !entry.enabled {
            return false;
        }

        if let (Some(cooldown), Some(last)) = (entry.cooldown, entry.last_run) {
            let elapsed = now.signed_duration_since(last);
            if elapsed < chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::zero()) {
                debug!(
                    task_id = %task_id,
                    "task still in cooldown ({:.0}s remaining)",
                    cooldown.as_secs_f64() - elapsed.num_seconds() as f64,
                );
                return false;
            }
        }

        match Schedule::from_str(&entry.cron_expression) {
            Ok(schedule) => is_cron_due(&schedule, now, entry.last_run),
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    cron = %entry.cron_expression,
                    error = %e,
                    "invalid cron expression"
                );
                false
            }
        }
    }

    pub fn record_run(&mut self, task_id: &str) {
        self.record_run_at(task_id, Utc::now());
    }

    pub fn record_run_at(&mut self, task_id: &str, at: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(task_id) {
            entry.last_run = Some(at);
        }
    }

    /// Ids of every task due at `now`, sorted.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Vec<&str> {
        let mut due: Vec<&str> = self
            .entries
            .keys()
            .filter(|id| self.should_run(id, now))
            .map(String::as_str)
            .collect();
        due.sort_unstable();
        due
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskScheduleEntry> {
        self.entries.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}
