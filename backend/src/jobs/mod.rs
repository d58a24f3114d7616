// Background Jobs
//
// Timer-driven sweeps over the workflow engine. Each sweep is an ordinary
// async call, so the cron scheduler, the HTTP job routes and the tests all
// drive the same code.

pub mod due_date;
pub mod recurring;
pub mod scheduler;

use chrono::NaiveTime;

pub use due_date::DueDateJob;
pub use recurring::{should_execute, ScheduledJob};
pub use scheduler::{JobConfig, JobError, JobResult, JobRunLog, JobScheduler, JobStatus, Sweep, SweepResult};

/// Whether `now` lies within `window_minutes` of `slot` on the same day.
/// The window does not wrap around midnight.
pub fn within_window(now: NaiveTime, slot: NaiveTime, window_minutes: i64) -> bool {
    now.signed_duration_since(slot).num_seconds().abs() <= window_minutes * 60
}
