//! Task execution: action payloads, handler registry, and the executor.
//!
//! Core components:
//! - `action`: `ActionSpec` tagged payloads for the three execution contexts
//! - `handlers`: named in-process handlers for the function context
//! - `runner`: `TaskExecutor` with timeout watchdog and cancellation

pub mod action;
pub mod handlers;
pub mod runner;

pub use action::{ActionSpec, FunctionArgs};
pub use handlers::{FnHandler, Handler, HandlerRegistry};
pub use runner::{RunningTaskInfo, TaskExecutor, TaskOutcome, TaskStatus};
