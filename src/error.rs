//! Error types for the automation engine.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Remote execution error: {0}")]
    Remote(#[from] RemoteError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Task execution errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid task spec: {reason}")]
    InvalidSpec { reason: String },

    #[error("Handler {name} not found")]
    HandlerNotFound { name: String },

    #[error("Task {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Task {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Task {id} was cancelled")]
    Cancelled { id: Uuid },
}

/// Job queue errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },

    #[error("Job queue is not running")]
    QueueStopped,
}

/// Recurring schedule errors.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid schedule '{spec}': {reason}")]
    InvalidSchedule { spec: String, reason: String },

    #[error("Scheduled task '{task_id}' not found")]
    NotFound { task_id: String },
}

/// Workflow orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow {id} not found")]
    NotFound { id: Uuid },

    #[error("Execution {id} not found")]
    ExecutionNotFound { id: Uuid },

    #[error("Invalid workflow step {index}: {reason}")]
    InvalidStep { index: usize, reason: String },

    #[error("Workflow {id} has {count} active executions, cannot modify")]
    ActiveExecutions { id: Uuid, count: usize },

    #[error("Execution {id} is {state}, cannot cancel")]
    NotCancellable { id: Uuid, state: String },

    #[error("Workflow must have at least one step")]
    EmptyWorkflow,
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid store key: {0}")]
    InvalidKey(String),
}

/// Management API collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("API request {method} {path} failed: {reason}")]
    RequestFailed {
        method: String,
        path: String,
        reason: String,
    },

    #[error("API returned status {status} for {method} {path}")]
    Status {
        method: String,
        path: String,
        status: u16,
    },

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

/// Remote command channel errors.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Connection to {target} failed: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("Command failed on {target}: {reason}")]
    CommandFailed { target: String, reason: String },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
