//! Workflow orchestrator.
//!
//! Executes definitions step by step. Each execution gets its own driver
//! task; steps within a run are strictly sequential, but independent runs
//! proceed concurrently. A failed step fails the run and skips the rest;
//! completed steps are never rolled back.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::executor::{ActionSpec, TaskExecutor, TaskStatus};
use crate::store::Store;
use crate::workflow::model::{
    ExecutionStatus, StepStatus, Workflow, WorkflowExecution, WorkflowStep,
};

type ExecutionMap = Arc<RwLock<HashMap<Uuid, WorkflowExecution>>>;
type CancelMap = Arc<RwLock<HashMap<Uuid, Arc<AtomicBool>>>>;

/// Defines and runs multi-step workflows.
///
/// Finished runs stay queryable in memory up to `max_history`; older
/// terminal runs are evicted, though their persisted records remain.
pub struct WorkflowOrchestrator {
    executor: Arc<TaskExecutor>,
    store: Option<Arc<dyn Store>>,
    default_step_timeout: Duration,
    max_history: usize,
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    executions: ExecutionMap,
    cancel_flags: CancelMap,
}

impl WorkflowOrchestrator {
    pub fn new(
        executor: Arc<TaskExecutor>,
        store: Option<Arc<dyn Store>>,
        default_step_timeout: Duration,
        max_history: usize,
    ) -> Self {
        Self {
            executor,
            store,
            default_step_timeout,
            max_history,
            workflows: RwLock::new(HashMap::new()),
            executions: Arc::new(RwLock::new(HashMap::new())),
            cancel_flags: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate and store a workflow definition.
    pub async fn define_workflow(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<WorkflowStep>,
    ) -> Result<Workflow, WorkflowError> {
        let workflow = Workflow::new(name, description, steps)?;
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        persist_workflow(self.store.as_deref(), &workflow).await;
        tracing::info!(workflow_id = %workflow.id, workflow = %workflow.name, "Workflow defined");
        Ok(workflow)
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Option<Workflow> {
        self.workflows.read().await.get(&workflow_id).cloned()
    }

    pub async fn list_workflows(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> =
            self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        workflows
    }

    /// Append a step to a definition. Rejected while executions are active.
    pub async fn add_workflow_step(
        &self,
        workflow_id: Uuid,
        step: WorkflowStep,
    ) -> Result<Workflow, WorkflowError> {
        self.mutate_definition(workflow_id, move |workflow| {
            step.validate(workflow.steps.len())?;
            workflow.steps.push(step);
            Ok(())
        })
        .await
    }

    /// Remove a step by index. Rejected while executions are active.
    pub async fn remove_workflow_step(
        &self,
        workflow_id: Uuid,
        index: usize,
    ) -> Result<Workflow, WorkflowError> {
        self.mutate_definition(workflow_id, move |workflow| {
            if index >= workflow.steps.len() {
                return Err(WorkflowError::InvalidStep {
                    index,
                    reason: "index out of range".to_string(),
                });
            }
            if workflow.steps.len() == 1 {
                return Err(WorkflowError::EmptyWorkflow);
            }
            workflow.steps.remove(index);
            Ok(())
        })
        .await
    }

    /// Replace a step by index. Rejected while executions are active.
    pub async fn update_workflow_step(
        &self,
        workflow_id: Uuid,
        index: usize,
        step: WorkflowStep,
    ) -> Result<Workflow, WorkflowError> {
        self.mutate_definition(workflow_id, move |workflow| {
            if index >= workflow.steps.len() {
                return Err(WorkflowError::InvalidStep {
                    index,
                    reason: "index out of range".to_string(),
                });
            }
            step.validate(index)?;
            workflow.steps[index] = step;
            Ok(())
        })
        .await
    }

    async fn mutate_definition<F>(
        &self,
        workflow_id: Uuid,
        mutate: F,
    ) -> Result<Workflow, WorkflowError>
    where
        F: FnOnce(&mut Workflow) -> Result<(), WorkflowError>,
    {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or(WorkflowError::NotFound { id: workflow_id })?;

        // Mutating steps under a live execution would corrupt step indices.
        // Checked while holding the definitions lock; `execute_workflow`
        // registers its execution under the same lock, so a run starting
        // concurrently cannot slip past this guard.
        let active = self.count_active(workflow_id).await;
        if active > 0 {
            return Err(WorkflowError::ActiveExecutions {
                id: workflow_id,
                count: active,
            });
        }

        mutate(workflow)?;
        workflow.updated_at = Utc::now();
        let snapshot = workflow.clone();
        drop(workflows);

        persist_workflow(self.store.as_deref(), &snapshot).await;
        Ok(snapshot)
    }

    async fn count_active(&self, workflow_id: Uuid) -> usize {
        self.executions
            .read()
            .await
            .values()
            .filter(|e| e.workflow_id == workflow_id && !e.status.is_terminal())
            .count()
    }

    /// Start one run of a workflow. Returns the execution id immediately;
    /// steps run on a background driver task.
    pub async fn execute_workflow(
        &self,
        workflow_id: Uuid,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Uuid, WorkflowError> {
        // The definitions read lock is held until the execution record is
        // registered, so definition mutations see it when they re-check
        // their active count.
        let workflows = self.workflows.read().await;
        let workflow = workflows
            .get(&workflow_id)
            .cloned()
            .ok_or(WorkflowError::NotFound { id: workflow_id })?;

        let execution = WorkflowExecution::start(&workflow, params);
        let execution_id = execution.id;
        let cancel = Arc::new(AtomicBool::new(false));

        self.executions
            .write()
            .await
            .insert(execution_id, execution.clone());
        self.cancel_flags
            .write()
            .await
            .insert(execution_id, Arc::clone(&cancel));
        drop(workflows);
        persist_execution(self.store.as_deref(), &execution).await;

        let ctx = DriverContext {
            executor: Arc::clone(&self.executor),
            store: self.store.clone(),
            executions: Arc::clone(&self.executions),
            cancel_flags: Arc::clone(&self.cancel_flags),
            cancel,
            default_step_timeout: self.default_step_timeout,
            max_history: self.max_history,
        };
        tokio::spawn(async move {
            run_execution(ctx, workflow, execution_id).await;
        });

        tracing::info!(workflow_id = %workflow_id, execution_id = %execution_id, "Execution started");
        Ok(execution_id)
    }

    /// Cancel a running execution. The current step finishes; later steps
    /// are skipped.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<(), WorkflowError> {
        let executions = self.executions.read().await;
        let execution = executions
            .get(&execution_id)
            .ok_or(WorkflowError::ExecutionNotFound { id: execution_id })?;
        if execution.status.is_terminal() {
            return Err(WorkflowError::NotCancellable {
                id: execution_id,
                state: execution.status.to_string(),
            });
        }
        drop(executions);

        if let Some(flag) = self.cancel_flags.read().await.get(&execution_id) {
            flag.store(true, Ordering::Relaxed);
        }
        tracing::info!(execution_id = %execution_id, "Execution cancellation requested");
        Ok(())
    }

    /// Read-only snapshot of one execution.
    pub async fn get_execution(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        self.executions.read().await.get(&execution_id).cloned()
    }

    /// Snapshot of executions, newest first, optionally for one workflow.
    pub async fn list_executions(&self, workflow_id: Option<Uuid>) -> Vec<WorkflowExecution> {
        let mut executions: Vec<WorkflowExecution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| workflow_id.is_none_or(|id| e.workflow_id == id))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions
    }

    /// Load persisted definitions into memory (startup).
    pub async fn restore_workflows(&self, workflows: Vec<Workflow>) {
        let mut map = self.workflows.write().await;
        for workflow in workflows {
            map.insert(workflow.id, workflow);
        }
    }

    /// Load persisted execution history into memory (startup).
    pub async fn restore_executions(&self, executions: Vec<WorkflowExecution>) {
        let mut map = self.executions.write().await;
        for execution in executions {
            map.insert(execution.id, execution);
        }
    }
}

/// Everything the background driver needs, cloned out of the orchestrator.
struct DriverContext {
    executor: Arc<TaskExecutor>,
    store: Option<Arc<dyn Store>>,
    executions: ExecutionMap,
    cancel_flags: CancelMap,
    cancel: Arc<AtomicBool>,
    default_step_timeout: Duration,
    max_history: usize,
}

/// Drive one execution through its steps.
async fn run_execution(ctx: DriverContext, workflow: Workflow, execution_id: Uuid) {
    let params = match ctx.executions.read().await.get(&execution_id) {
        Some(e) => e.params.clone(),
        None => return,
    };

    let mut failed = false;
    for (index, step) in workflow.steps.iter().enumerate() {
        if ctx.cancel.load(Ordering::Relaxed) {
            finish_cancelled(&ctx, execution_id, index).await;
            cleanup(&ctx, execution_id).await;
            return;
        }

        update_execution(&ctx, execution_id, |e| {
            e.current_step = index;
            e.steps[index].status = StepStatus::Running;
            e.steps[index].started_at = Some(Utc::now());
        })
        .await;

        let action = merge_params(&step.action, &params);
        let timeout = step.timeout.unwrap_or(ctx.default_step_timeout);
        let outcome = ctx.executor.execute(&step.name, action, timeout).await;

        let (status, result, error) = match outcome {
            Ok(o) => match o.status {
                TaskStatus::Completed | TaskStatus::Running => {
                    (StepStatus::Completed, o.result, None)
                }
                _ => (StepStatus::Failed, None, o.error),
            },
            Err(e) => (StepStatus::Failed, None, Some(e.to_string())),
        };

        let step_failed = status == StepStatus::Failed;
        update_execution(&ctx, execution_id, |e| {
            e.steps[index].status = status;
            e.steps[index].completed_at = Some(Utc::now());
            e.steps[index].result = result.clone();
            e.steps[index].error = error.clone();
            if step_failed {
                // Fail the run; everything after this step never starts.
                for later in e.steps.iter_mut().skip(index + 1) {
                    later.status = StepStatus::Skipped;
                }
                e.status = ExecutionStatus::Failed;
                e.error = Some(format!(
                    "step '{}' failed: {}",
                    e.steps[index].name,
                    error.as_deref().unwrap_or("unknown")
                ));
                e.completed_at = Some(Utc::now());
            }
        })
        .await;

        if step_failed {
            tracing::warn!(
                execution_id = %execution_id,
                step = %step.name,
                "Workflow execution failed"
            );
            failed = true;
            break;
        }
    }

    if !failed {
        if ctx.cancel.load(Ordering::Relaxed) {
            finish_cancelled(&ctx, execution_id, workflow.steps.len()).await;
        } else {
            update_execution(&ctx, execution_id, |e| {
                e.status = ExecutionStatus::Completed;
                e.completed_at = Some(Utc::now());
            })
            .await;
            tracing::info!(execution_id = %execution_id, "Workflow execution completed");
        }
    }
    cleanup(&ctx, execution_id).await;
}

async fn finish_cancelled(ctx: &DriverContext, execution_id: Uuid, from_index: usize) {
    update_execution(ctx, execution_id, |e| {
        for step in e.steps.iter_mut().skip(from_index) {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
            }
        }
        e.status = ExecutionStatus::Cancelled;
        e.completed_at = Some(Utc::now());
    })
    .await;
    tracing::info!(execution_id = %execution_id, "Workflow execution cancelled");
}

async fn cleanup(ctx: &DriverContext, execution_id: Uuid) {
    ctx.cancel_flags.write().await.remove(&execution_id);

    // Evict the oldest terminal runs past the cap. Live runs are never
    // evicted; persisted records survive on disk.
    let mut executions = ctx.executions.write().await;
    let mut terminal: Vec<(Uuid, DateTime<Utc>)> = executions
        .values()
        .filter(|e| e.status.is_terminal())
        .map(|e| (e.id, e.completed_at.unwrap_or(e.started_at)))
        .collect();
    if terminal.len() <= ctx.max_history {
        return;
    }
    let excess = terminal.len() - ctx.max_history;
    terminal.sort_by_key(|&(_, at)| at);
    for (id, _) in terminal.into_iter().take(excess) {
        executions.remove(&id);
    }
}

/// Apply a mutation to the live execution record and persist the result.
async fn update_execution<F>(ctx: &DriverContext, execution_id: Uuid, mutate: F)
where
    F: FnOnce(&mut WorkflowExecution),
{
    let snapshot = {
        let mut executions = ctx.executions.write().await;
        let Some(execution) = executions.get_mut(&execution_id) else {
            return;
        };
        mutate(execution);
        execution.clone()
    };
    persist_execution(ctx.store.as_deref(), &snapshot).await;
}

/// Overlay execution params onto a step action. Execution values win.
fn merge_params(
    action: &ActionSpec,
    params: &serde_json::Map<String, serde_json::Value>,
) -> ActionSpec {
    if params.is_empty() {
        return action.clone();
    }
    match action {
        ActionSpec::Function {
            handler,
            args,
            kwargs,
        } => {
            let mut merged = kwargs.clone();
            for (k, v) in params {
                merged.insert(k.clone(), v.clone());
            }
            ActionSpec::Function {
                handler: handler.clone(),
                args: args.clone(),
                kwargs: merged,
            }
        }
        ActionSpec::ApiCall {
            method,
            path,
            payload,
        } => {
            let mut merged = match payload {
                Some(serde_json::Value::Object(map)) => map.clone(),
                _ => serde_json::Map::new(),
            };
            for (k, v) in params {
                merged.insert(k.clone(), v.clone());
            }
            ActionSpec::ApiCall {
                method: method.clone(),
                path: path.clone(),
                payload: Some(serde_json::Value::Object(merged)),
            }
        }
        // Command templates are out of scope; commands run as defined.
        ActionSpec::Command { .. } => action.clone(),
    }
}

async fn persist_workflow(store: Option<&dyn Store>, workflow: &Workflow) {
    let Some(store) = store else { return };
    match serde_json::to_value(workflow) {
        Ok(record) => {
            let key = format!("workflow:{}", workflow.id);
            if let Err(e) = store.save(&key, &record).await {
                tracing::warn!(workflow_id = %workflow.id, "Failed to persist workflow: {}", e);
            }
        }
        Err(e) => tracing::warn!(workflow_id = %workflow.id, "Failed to encode workflow: {}", e),
    }
}

async fn persist_execution(store: Option<&dyn Store>, execution: &WorkflowExecution) {
    let Some(store) = store else { return };
    match serde_json::to_value(execution) {
        Ok(record) => {
            let key = format!("execution:{}", execution.id);
            if let Err(e) = store.save(&key, &record).await {
                tracing::warn!(execution_id = %execution.id, "Failed to persist execution: {}", e);
            }
        }
        Err(e) => {
            tracing::warn!(execution_id = %execution.id, "Failed to encode execution: {}", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{FunctionArgs, HandlerRegistry};

    async fn orchestrator() -> (WorkflowOrchestrator, Arc<HandlerRegistry>) {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers
            .register_fn("ok", |_| async { Ok(serde_json::json!("ok")) })
            .await;
        handlers
            .register_fn("fail", |_| async { Err("step broke".to_string()) })
            .await;
        let executor = Arc::new(TaskExecutor::new(Arc::clone(&handlers)));
        (
            WorkflowOrchestrator::new(executor, None, Duration::from_secs(5), 100),
            handlers,
        )
    }

    async fn wait_terminal(
        orchestrator: &WorkflowOrchestrator,
        execution_id: Uuid,
    ) -> WorkflowExecution {
        for _ in 0..200 {
            if let Some(e) = orchestrator.get_execution(execution_id).await {
                if e.status.is_terminal() {
                    return e;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("execution {execution_id} never finished");
    }

    #[tokio::test]
    async fn three_steps_complete_in_order() {
        let (orchestrator, _) = orchestrator().await;
        let workflow = orchestrator
            .define_workflow(
                "maintenance",
                "routine maintenance",
                vec![
                    WorkflowStep::new("one", ActionSpec::function("ok")),
                    WorkflowStep::new("two", ActionSpec::function("ok")),
                    WorkflowStep::new("three", ActionSpec::function("ok")),
                ],
            )
            .await
            .unwrap();

        let execution_id = orchestrator
            .execute_workflow(workflow.id, serde_json::Map::new())
            .await
            .unwrap();
        let execution = wait_terminal(&orchestrator, execution_id).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Completed));
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn failing_middle_step_skips_rest() {
        let (orchestrator, _) = orchestrator().await;
        let workflow = orchestrator
            .define_workflow(
                "deploy",
                "",
                vec![
                    WorkflowStep::new("prepare", ActionSpec::function("ok")),
                    WorkflowStep::new("apply", ActionSpec::function("fail")),
                    WorkflowStep::new("verify", ActionSpec::function("ok")),
                ],
            )
            .await
            .unwrap();

        let execution_id = orchestrator
            .execute_workflow(workflow.id, serde_json::Map::new())
            .await
            .unwrap();
        let execution = wait_terminal(&orchestrator, execution_id).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.steps[0].status, StepStatus::Completed);
        assert_eq!(execution.steps[1].status, StepStatus::Failed);
        assert_eq!(execution.steps[2].status, StepStatus::Skipped);
        assert!(execution.error.unwrap().contains("apply"));
    }

    #[tokio::test]
    async fn params_overlay_step_kwargs() {
        let (orchestrator, handlers) = orchestrator().await;
        handlers
            .register_fn("echo_target", |args: FunctionArgs| async move {
                Ok(serde_json::json!(args.kwarg_str("target").unwrap_or("none")))
            })
            .await;

        let mut kwargs = serde_json::Map::new();
        kwargs.insert("target".to_string(), serde_json::json!("default-host"));
        let workflow = orchestrator
            .define_workflow(
                "targeted",
                "",
                vec![WorkflowStep::new(
                    "run",
                    ActionSpec::Function {
                        handler: "echo_target".to_string(),
                        args: vec![],
                        kwargs,
                    },
                )],
            )
            .await
            .unwrap();

        let mut params = serde_json::Map::new();
        params.insert("target".to_string(), serde_json::json!("web-02"));
        let execution_id = orchestrator
            .execute_workflow(workflow.id, params)
            .await
            .unwrap();
        let execution = wait_terminal(&orchestrator, execution_id).await;

        assert_eq!(
            execution.steps[0].result,
            Some(serde_json::json!("web-02"))
        );
    }

    #[tokio::test]
    async fn cancel_skips_unstarted_steps() {
        let (orchestrator, handlers) = orchestrator().await;
        handlers
            .register_fn("slow", |_| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(serde_json::Value::Null)
            })
            .await;

        let workflow = orchestrator
            .define_workflow(
                "long",
                "",
                vec![
                    WorkflowStep::new("a", ActionSpec::function("slow")),
                    WorkflowStep::new("b", ActionSpec::function("slow")),
                    WorkflowStep::new("c", ActionSpec::function("slow")),
                ],
            )
            .await
            .unwrap();

        let execution_id = orchestrator
            .execute_workflow(workflow.id, serde_json::Map::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        orchestrator.cancel_execution(execution_id).await.unwrap();

        let execution = wait_terminal(&orchestrator, execution_id).await;
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        // First step was in flight and finished; later steps never started.
        assert!(execution
            .steps
            .iter()
            .any(|s| s.status == StepStatus::Skipped));
        assert!(execution
            .steps
            .iter()
            .all(|s| s.status != StepStatus::Running));
    }

    #[tokio::test]
    async fn cancel_terminal_execution_rejected() {
        let (orchestrator, _) = orchestrator().await;
        let workflow = orchestrator
            .define_workflow("w", "", vec![WorkflowStep::new("s", ActionSpec::function("ok"))])
            .await
            .unwrap();
        let execution_id = orchestrator
            .execute_workflow(workflow.id, serde_json::Map::new())
            .await
            .unwrap();
        wait_terminal(&orchestrator, execution_id).await;

        assert!(matches!(
            orchestrator.cancel_execution(execution_id).await,
            Err(WorkflowError::NotCancellable { .. })
        ));
    }

    #[tokio::test]
    async fn mutation_rejected_while_running() {
        let (orchestrator, handlers) = orchestrator().await;
        handlers
            .register_fn("slow", |_| async {
                tokio::time::sleep(Duration::from_millis(400)).await;
                Ok(serde_json::Value::Null)
            })
            .await;

        let workflow = orchestrator
            .define_workflow(
                "w",
                "",
                vec![WorkflowStep::new("s", ActionSpec::function("slow"))],
            )
            .await
            .unwrap();
        let execution_id = orchestrator
            .execute_workflow(workflow.id, serde_json::Map::new())
            .await
            .unwrap();

        let result = orchestrator
            .add_workflow_step(
                workflow.id,
                WorkflowStep::new("extra", ActionSpec::function("ok")),
            )
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::ActiveExecutions { .. })
        ));

        // Once the run finishes, mutation is allowed again.
        wait_terminal(&orchestrator, execution_id).await;
        let updated = orchestrator
            .add_workflow_step(
                workflow.id,
                WorkflowStep::new("extra", ActionSpec::function("ok")),
            )
            .await
            .unwrap();
        assert_eq!(updated.steps.len(), 2);
    }

    #[tokio::test]
    async fn step_mutations_bounds_checked() {
        let (orchestrator, _) = orchestrator().await;
        let workflow = orchestrator
            .define_workflow(
                "w",
                "",
                vec![
                    WorkflowStep::new("a", ActionSpec::function("ok")),
                    WorkflowStep::new("b", ActionSpec::function("ok")),
                ],
            )
            .await
            .unwrap();

        assert!(orchestrator
            .update_workflow_step(
                workflow.id,
                5,
                WorkflowStep::new("z", ActionSpec::function("ok"))
            )
            .await
            .is_err());

        let updated = orchestrator
            .remove_workflow_step(workflow.id, 0)
            .await
            .unwrap();
        assert_eq!(updated.steps.len(), 1);
        assert_eq!(updated.steps[0].name, "b");

        // Removing the last remaining step is rejected.
        assert!(matches!(
            orchestrator.remove_workflow_step(workflow.id, 0).await,
            Err(WorkflowError::EmptyWorkflow)
        ));
    }

    #[tokio::test]
    async fn unknown_workflow_rejected() {
        let (orchestrator, _) = orchestrator().await;
        assert!(matches!(
            orchestrator
                .execute_workflow(Uuid::new_v4(), serde_json::Map::new())
                .await,
            Err(WorkflowError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn terminal_executions_evicted_past_cap() {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers
            .register_fn("ok", |_| async { Ok(serde_json::json!("ok")) })
            .await;
        let executor = Arc::new(TaskExecutor::new(handlers));
        let orchestrator = WorkflowOrchestrator::new(executor, None, Duration::from_secs(5), 2);

        let workflow = orchestrator
            .define_workflow("w", "", vec![WorkflowStep::new("s", ActionSpec::function("ok"))])
            .await
            .unwrap();

        let mut last = Uuid::nil();
        for _ in 0..5 {
            last = orchestrator
                .execute_workflow(workflow.id, serde_json::Map::new())
                .await
                .unwrap();
            wait_terminal(&orchestrator, last).await;
        }

        let retained = orchestrator.list_executions(None).await;
        assert!(retained.len() <= 2, "history grew past the cap");
        // The newest run is always retained.
        assert!(retained.iter().any(|e| e.id == last));
    }

    #[tokio::test]
    async fn list_executions_filters_by_workflow() {
        let (orchestrator, _) = orchestrator().await;
        let w1 = orchestrator
            .define_workflow("w1", "", vec![WorkflowStep::new("s", ActionSpec::function("ok"))])
            .await
            .unwrap();
        let w2 = orchestrator
            .define_workflow("w2", "", vec![WorkflowStep::new("s", ActionSpec::function("ok"))])
            .await
            .unwrap();

        let e1 = orchestrator
            .execute_workflow(w1.id, serde_json::Map::new())
            .await
            .unwrap();
        let e2 = orchestrator
            .execute_workflow(w2.id, serde_json::Map::new())
            .await
            .unwrap();
        wait_terminal(&orchestrator, e1).await;
        wait_terminal(&orchestrator, e2).await;

        assert_eq!(orchestrator.list_executions(Some(w1.id)).await.len(), 1);
        assert_eq!(orchestrator.list_executions(None).await.len(), 2);
    }
}
