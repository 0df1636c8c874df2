//! Job queue: the `Job` entity and the worker-pool queue.

pub mod job;
pub mod queue;

pub use job::{Job, JobStatus, Priority};
pub use queue::JobQueue;
