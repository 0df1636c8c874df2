//! Recurring tasks: schedule specs and the scheduler loop that enqueues
//! due tasks as jobs.

mod scheduler;
mod spec;

pub use scheduler::{RecurringTask, TaskScheduler};
pub use spec::ScheduleSpec;
