//! Administrative automation engine.
//!
//! A priority job queue with a bounded worker pool, a recurring-task
//! scheduler, and a step-by-step workflow orchestrator, all executing the
//! same task abstraction: shell commands (local or remote), management-API
//! calls, and registered async handlers.
//!
//! [`AutomationEngine`] wires the pieces together; the submodules are
//! usable on their own.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod queue;
pub mod remote;
pub mod schedule;
pub mod store;
pub mod workflow;

pub use api::{HttpManagementApi, ManagementApi};
pub use config::EngineConfig;
pub use engine::AutomationEngine;
pub use error::{Error, Result};
pub use executor::{ActionSpec, FunctionArgs, Handler, HandlerRegistry, TaskExecutor};
pub use queue::{Job, JobStatus, Priority};
pub use remote::{CommandOutput, RemoteExec};
pub use schedule::{RecurringTask, ScheduleSpec};
pub use store::{JsonFileStore, MemoryStore, Store};
pub use workflow::{Workflow, WorkflowExecution, WorkflowStep};
