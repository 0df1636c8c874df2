//! Engine facade wiring the queue, scheduler and orchestrator together.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Result, StoreError};
use crate::executor::{ActionSpec, HandlerRegistry, TaskExecutor};
use crate::queue::{Job, JobQueue, JobStatus, Priority};
use crate::schedule::{RecurringTask, TaskScheduler};
use crate::store::Store;
use crate::workflow::{
    ExecutionStatus, StepStatus, Workflow, WorkflowExecution, WorkflowOrchestrator, WorkflowStep,
};

/// Top-level entry point. Owns the worker pool, the recurring-task
/// scheduler and the workflow orchestrator, all sharing one executor
/// and one store.
pub struct AutomationEngine {
    name: String,
    executor: Arc<TaskExecutor>,
    queue: Arc<JobQueue>,
    scheduler: TaskScheduler,
    orchestrator: WorkflowOrchestrator,
    store: Option<Arc<dyn Store>>,
}

impl AutomationEngine {
    /// Wire up an engine. The executor is built by the caller so API and
    /// remote-exec backends can be attached before handing it over.
    pub fn new(
        config: EngineConfig,
        executor: TaskExecutor,
        store: Option<Arc<dyn Store>>,
    ) -> Self {
        let executor = Arc::new(executor);
        let queue = Arc::new(JobQueue::new(
            &config,
            Arc::clone(&executor),
            store.clone(),
        ));
        let scheduler = TaskScheduler::new(config.tick_interval, Arc::clone(&queue), store.clone());
        let orchestrator = WorkflowOrchestrator::new(
            Arc::clone(&executor),
            store.clone(),
            config.default_step_timeout,
            config.max_history,
        );
        Self {
            name: config.name,
            executor,
            queue,
            scheduler,
            orchestrator,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handler registry shared by jobs, scheduled tasks and workflow steps.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        self.executor.handlers()
    }

    /// Restore persisted state, then start the worker pool and the
    /// scheduler loop.
    pub async fn start(&self) -> Result<()> {
        self.restore_state().await?;
        self.queue.start().await;
        self.scheduler.start().await;
        tracing::info!(engine = %self.name, "Automation engine started");
        Ok(())
    }

    /// Stop the scheduler loop first so nothing new is enqueued, then
    /// drain the worker pool.
    pub async fn stop(&self) {
        self.scheduler.stop().await;
        self.queue.stop().await;
        tracing::info!(engine = %self.name, "Automation engine stopped");
    }

    // --- jobs ---

    pub async fn submit_job(
        &self,
        action: ActionSpec,
        name: impl Into<String>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Uuid> {
        self.queue.submit(action, name, priority, timeout).await
    }

    pub async fn get_job(&self, job_id: Uuid) -> Option<Job> {
        self.queue.get_job(job_id).await
    }

    pub async fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        Ok(self.queue.cancel_job(job_id).await?)
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>, limit: Option<usize>) -> Vec<Job> {
        self.queue.list_jobs(status, limit).await
    }

    pub async fn pending_jobs(&self) -> usize {
        self.queue.pending_count().await
    }

    pub async fn clear_job_history(&self) -> usize {
        self.queue.clear_history().await
    }

    // --- recurring tasks ---

    pub async fn schedule_task(
        &self,
        task_id: impl Into<String>,
        action: ActionSpec,
        interval: &str,
    ) -> Result<()> {
        Ok(self.scheduler.schedule_task(task_id, action, interval).await?)
    }

    pub async fn schedule_at_time(
        &self,
        task_id: impl Into<String>,
        action: ActionSpec,
        time: &str,
    ) -> Result<()> {
        Ok(self.scheduler.schedule_at_time(task_id, action, time).await?)
    }

    pub async fn schedule_cron(
        &self,
        task_id: impl Into<String>,
        action: ActionSpec,
        expression: &str,
    ) -> Result<()> {
        Ok(self
            .scheduler
            .schedule_cron(task_id, action, expression)
            .await?)
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        Ok(self.scheduler.cancel_task(task_id).await?)
    }

    pub async fn get_task(&self, task_id: &str) -> Option<RecurringTask> {
        self.scheduler.get_task(task_id).await
    }

    pub async fn list_tasks(&self) -> Vec<RecurringTask> {
        self.scheduler.list_tasks().await
    }

    // --- workflows ---

    pub async fn define_workflow(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<WorkflowStep>,
    ) -> Result<Workflow> {
        Ok(self
            .orchestrator
            .define_workflow(name, description, steps)
            .await?)
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Option<Workflow> {
        self.orchestrator.get_workflow(workflow_id).await
    }

    pub async fn list_workflows(&self) -> Vec<Workflow> {
        self.orchestrator.list_workflows().await
    }

    pub async fn add_workflow_step(
        &self,
        workflow_id: Uuid,
        step: WorkflowStep,
    ) -> Result<Workflow> {
        Ok(self.orchestrator.add_workflow_step(workflow_id, step).await?)
    }

    pub async fn remove_workflow_step(
        &self,
        workflow_id: Uuid,
        index: usize,
    ) -> Result<Workflow> {
        Ok(self
            .orchestrator
            .remove_workflow_step(workflow_id, index)
            .await?)
    }

    pub async fn update_workflow_step(
        &self,
        workflow_id: Uuid,
        index: usize,
        step: WorkflowStep,
    ) -> Result<Workflow> {
        Ok(self
            .orchestrator
            .update_workflow_step(workflow_id, index, step)
            .await?)
    }

    pub async fn execute_workflow(
        &self,
        workflow_id: Uuid,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Uuid> {
        Ok(self.orchestrator.execute_workflow(workflow_id, params).await?)
    }

    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<()> {
        Ok(self.orchestrator.cancel_execution(execution_id).await?)
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        self.orchestrator.get_execution(execution_id).await
    }

    pub async fn list_executions(&self, workflow_id: Option<Uuid>) -> Vec<WorkflowExecution> {
        self.orchestrator.list_executions(workflow_id).await
    }

    // --- startup restore ---

    /// Reload persisted tasks, workflows and executions. Records that were
    /// mid-flight when the previous process died are marked failed; nothing
    /// is silently re-run.
    async fn restore_state(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let mut tasks = Vec::new();
        for (key, value) in store.list("task:").await? {
            match serde_json::from_value::<RecurringTask>(value) {
                Ok(task) => tasks.push(task),
                Err(e) => tracing::warn!(key = %key, "Skipping unreadable task record: {}", e),
            }
        }
        if !tasks.is_empty() {
            tracing::info!(count = tasks.len(), "Restoring recurring tasks");
            self.scheduler.restore(tasks).await;
        }

        let mut workflows = Vec::new();
        for (key, value) in store.list("workflow:").await? {
            match serde_json::from_value::<Workflow>(value) {
                Ok(workflow) => workflows.push(workflow),
                Err(e) => {
                    tracing::warn!(key = %key, "Skipping unreadable workflow record: {}", e)
                }
            }
        }
        if !workflows.is_empty() {
            tracing::info!(count = workflows.len(), "Restoring workflow definitions");
            self.orchestrator.restore_workflows(workflows).await;
        }

        let mut executions = Vec::new();
        for (key, value) in store.list("execution:").await? {
            match serde_json::from_value::<WorkflowExecution>(value) {
                Ok(mut execution) => {
                    if !execution.status.is_terminal() {
                        reconcile_execution(&mut execution);
                        let record =
                            serde_json::to_value(&execution).map_err(StoreError::from)?;
                        store.save(&key, &record).await?;
                    }
                    executions.push(execution);
                }
                Err(e) => {
                    tracing::warn!(key = %key, "Skipping unreadable execution record: {}", e)
                }
            }
        }
        if !executions.is_empty() {
            self.orchestrator.restore_executions(executions).await;
        }

        for (key, value) in store.list("job:").await? {
            match serde_json::from_value::<Job>(value) {
                Ok(mut job) => {
                    if !job.status.is_terminal() {
                        job.status = JobStatus::Failed;
                        job.error = Some("interrupted by process restart".to_string());
                        job.completed_at = Some(Utc::now());
                        tracing::warn!(job_id = %job.id, "Marking interrupted job failed");
                        let record = serde_json::to_value(&job).map_err(StoreError::from)?;
                        store.save(&key, &record).await?;
                    }
                }
                Err(e) => tracing::warn!(key = %key, "Skipping unreadable job record: {}", e),
            }
        }

        Ok(())
    }
}

fn reconcile_execution(execution: &mut WorkflowExecution) {
    tracing::warn!(
        execution_id = %execution.id,
        "Marking interrupted execution failed"
    );
    for step in &mut execution.steps {
        match step.status {
            StepStatus::Running => {
                step.status = StepStatus::Failed;
                step.completed_at = Some(Utc::now());
                step.error = Some("interrupted by process restart".to_string());
            }
            StepStatus::Pending => step.status = StepStatus::Skipped,
            _ => {}
        }
    }
    execution.status = ExecutionStatus::Failed;
    execution.error = Some("interrupted by process restart".to_string());
    execution.completed_at = Some(Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;

    fn engine_with_store(store: Arc<dyn Store>) -> AutomationEngine {
        let handlers = Arc::new(HandlerRegistry::new());
        let executor = TaskExecutor::new(handlers);
        let config = EngineConfig {
            num_workers: 1,
            ..EngineConfig::default()
        };
        AutomationEngine::new(config, executor, Some(store))
    }

    #[tokio::test]
    async fn restore_marks_interrupted_execution_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());

        // Simulate a process that died mid-execution.
        let workflow = Workflow::new(
            "w",
            "",
            vec![
                WorkflowStep::new("a", ActionSpec::local_command("true")),
                WorkflowStep::new("b", ActionSpec::local_command("true")),
            ],
        )
        .unwrap();
        let mut execution = WorkflowExecution::start(&workflow, serde_json::Map::new());
        execution.steps[0].status = StepStatus::Running;
        store
            .save(
                &format!("execution:{}", execution.id),
                &serde_json::to_value(&execution).unwrap(),
            )
            .await
            .unwrap();

        let engine = engine_with_store(Arc::clone(&store));
        engine.start().await.unwrap();

        let restored = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(restored.status, ExecutionStatus::Failed);
        assert_eq!(restored.steps[0].status, StepStatus::Failed);
        assert_eq!(restored.steps[1].status, StepStatus::Skipped);
        assert!(restored
            .error
            .unwrap()
            .contains("interrupted by process restart"));

        engine.stop().await;
    }

    #[tokio::test]
    async fn restore_reloads_tasks_and_workflows() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());

        {
            let engine = engine_with_store(Arc::clone(&store));
            engine
                .schedule_task("nightly-report", ActionSpec::local_command("true"), "daily")
                .await
                .unwrap();
            engine
                .define_workflow(
                    "cleanup",
                    "",
                    vec![WorkflowStep::new("rm", ActionSpec::local_command("true"))],
                )
                .await
                .unwrap();
        }

        let engine = engine_with_store(store);
        engine.start().await.unwrap();

        assert!(engine.get_task("nightly-report").await.is_some());
        assert_eq!(engine.list_workflows().await.len(), 1);

        engine.stop().await;
    }
}
