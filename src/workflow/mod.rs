//! Multi-step workflow definitions and their executions.

mod model;
mod orchestrator;

pub use model::{
    ExecutionStatus, StepRecord, StepStatus, Workflow, WorkflowExecution, WorkflowStep,
};
pub use orchestrator::WorkflowOrchestrator;
