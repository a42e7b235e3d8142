//! Cron scheduling for periodic maintenance tasks.
//!
//! Each task has a cron expression and an optional cooldown. The
//! [`TaskScheduler`] tracks when each task last ran and reports which ones are
//! due. It does not run anything itself; the caller's tick loop does.

mod core;
pub(crate) mod cron;
mod entry;


pub use self::core::{ScheduledTask, TaskScheduler};
pub use self::cron::normalize_cron;
pub use self::entry::TaskScheduleEntry;
