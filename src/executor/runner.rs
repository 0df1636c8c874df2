//! Task executor: runs one unit of work in its execution context.
//!
//! Every invocation races the work against a deadline. Command children are
//! spawned with `kill_on_drop`, so a timeout or cancellation dropping the
//! future also reaps the process.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::api::ManagementApi;
use crate::error::{RemoteError, TaskError};
use crate::executor::action::{ActionSpec, FunctionArgs};
use crate::executor::handlers::HandlerRegistry;
use crate::remote::RemoteExec;

/// Status of a task tracked by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Normalized result of one execution.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Snapshot of a currently-running task.
#[derive(Debug, Clone, Serialize)]
pub struct RunningTaskInfo {
    pub task_id: Uuid,
    pub name: String,
    pub context: &'static str,
    pub started_at: DateTime<Utc>,
}

struct RunningTask {
    name: String,
    context: &'static str,
    started_at: DateTime<Utc>,
    cancel: Arc<Notify>,
    /// Command contexts honor the cancel signal; function/api are cooperative.
    cancellable: bool,
}

/// Executes units of work against the configured collaborators.
pub struct TaskExecutor {
    handlers: Arc<HandlerRegistry>,
    api: Option<Arc<dyn ManagementApi>>,
    remote: Option<Arc<dyn RemoteExec>>,
    max_output: usize,
    running: Arc<RwLock<HashMap<Uuid, RunningTask>>>,
}

impl TaskExecutor {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            handlers,
            api: None,
            remote: None,
            max_output: 64 * 1024,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Attach the management API collaborator.
    pub fn with_api(mut self, api: Arc<dyn ManagementApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Attach the remote command channel.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteExec>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Cap captured command output at `bytes`.
    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }

    /// The handler registry used by the function context.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Execute one unit of work, racing it against `timeout`.
    ///
    /// Spec validation failures and unknown handlers are rejected up front;
    /// runtime failures and timeouts are normalized into the outcome.
    pub async fn execute(
        &self,
        name: &str,
        spec: ActionSpec,
        timeout: Duration,
    ) -> Result<TaskOutcome, TaskError> {
        spec.validate()?;

        // Background commands are fire-and-forget: spawn and hand back the id.
        if let ActionSpec::Command {
            background: true, ..
        } = &spec
        {
            return self.spawn_background(name, spec, timeout).await;
        }

        let task_id = Uuid::new_v4();
        let cancel = self.register(task_id, name, &spec).await;
        let start = std::time::Instant::now();

        let raced = if spec.type_tag() == "command" {
            // cancel signal kills the child via drop
            tokio::select! {
                res = tokio::time::timeout(timeout, self.run_spec(&spec)) => Some(res),
                _ = cancel.notified() => None,
            }
        } else {
            Some(tokio::time::timeout(timeout, self.run_spec(&spec)).await)
        };

        self.running.write().await.remove(&task_id);
        let duration = start.elapsed();

        let outcome = match raced {
            None => TaskOutcome {
                task_id,
                status: TaskStatus::Cancelled,
                result: None,
                error: Some(TaskError::Cancelled { id: task_id }.to_string()),
                duration,
            },
            Some(Err(_)) => {
                tracing::warn!(task_id = %task_id, task = %name, ?timeout, "Task timed out");
                TaskOutcome {
                    task_id,
                    status: TaskStatus::TimedOut,
                    result: None,
                    error: Some(
                        TaskError::Timeout {
                            name: name.to_string(),
                            timeout,
                        }
                        .to_string(),
                    ),
                    duration,
                }
            }
            Some(Ok(Err(TaskError::HandlerNotFound { name }))) => {
                return Err(TaskError::HandlerNotFound { name });
            }
            Some(Ok(Err(e))) => TaskOutcome {
                task_id,
                status: TaskStatus::Failed,
                result: None,
                error: Some(e.to_string()),
                duration,
            },
            Some(Ok(Ok(value))) => TaskOutcome {
                task_id,
                status: TaskStatus::Completed,
                result: Some(value),
                error: None,
                duration,
            },
        };

        tracing::debug!(
            task_id = %task_id,
            task = %name,
            status = %outcome.status,
            "Task finished in {:?}", duration
        );
        Ok(outcome)
    }

    /// Spawn a background command and return immediately.
    async fn spawn_background(
        &self,
        name: &str,
        spec: ActionSpec,
        timeout: Duration,
    ) -> Result<TaskOutcome, TaskError> {
        let task_id = Uuid::new_v4();
        let cancel = self.register(task_id, name, &spec).await;

        let running = Arc::clone(&self.running);
        let remote = self.remote.clone();
        let max_output = self.max_output;
        let name_owned = name.to_string();

        tokio::spawn(async move {
            let fut = run_command_spec(&spec, remote.as_deref(), max_output);
            let result = tokio::select! {
                res = tokio::time::timeout(timeout, fut) => res,
                _ = cancel.notified() => {
                    tracing::info!(task_id = %task_id, task = %name_owned, "Background command cancelled");
                    running.write().await.remove(&task_id);
                    return;
                }
            };
            match result {
                Ok(Ok(_)) => {
                    tracing::debug!(task_id = %task_id, task = %name_owned, "Background command completed");
                }
                Ok(Err(e)) => {
                    tracing::warn!(task_id = %task_id, task = %name_owned, "Background command failed: {}", e);
                }
                Err(_) => {
                    tracing::warn!(task_id = %task_id, task = %name_owned, "Background command timed out");
                }
            }
            running.write().await.remove(&task_id);
        });

        Ok(TaskOutcome {
            task_id,
            status: TaskStatus::Running,
            result: Some(serde_json::json!({ "background": true, "task_id": task_id })),
            error: None,
            duration: Duration::ZERO,
        })
    }

    async fn register(&self, task_id: Uuid, name: &str, spec: &ActionSpec) -> Arc<Notify> {
        let cancel = Arc::new(Notify::new());
        self.running.write().await.insert(
            task_id,
            RunningTask {
                name: name.to_string(),
                context: spec.type_tag(),
                started_at: Utc::now(),
                cancel: Arc::clone(&cancel),
                cancellable: matches!(spec, ActionSpec::Command { .. }),
            },
        );
        cancel
    }

    async fn run_spec(&self, spec: &ActionSpec) -> Result<serde_json::Value, TaskError> {
        match spec {
            ActionSpec::Command { .. } => {
                run_command_spec(spec, self.remote.as_deref(), self.max_output).await
            }
            ActionSpec::ApiCall {
                method,
                path,
                payload,
            } => {
                let api = self.api.as_ref().ok_or_else(|| TaskError::ExecutionFailed {
                    name: path.clone(),
                    reason: "no management API collaborator configured".to_string(),
                })?;
                api.request(method, path, payload.as_ref())
                    .await
                    .map_err(|e| TaskError::ExecutionFailed {
                        name: format!("{method} {path}"),
                        reason: e.to_string(),
                    })
            }
            ActionSpec::Function {
                handler,
                args,
                kwargs,
            } => {
                let resolved = self.handlers.get(handler).await?;
                resolved
                    .run(FunctionArgs::new(args.clone(), kwargs.clone()))
                    .await
                    .map_err(|reason| TaskError::ExecutionFailed {
                        name: handler.clone(),
                        reason,
                    })
            }
        }
    }

    /// Status of a tracked task, `None` once it has finished.
    pub async fn get_task_status(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.running
            .read()
            .await
            .get(&task_id)
            .map(|_| TaskStatus::Running)
    }

    /// Snapshot of all currently-running tasks.
    pub async fn list_running_tasks(&self) -> Vec<RunningTaskInfo> {
        self.running
            .read()
            .await
            .iter()
            .map(|(id, t)| RunningTaskInfo {
                task_id: *id,
                name: t.name.clone(),
                context: t.context,
                started_at: t.started_at,
            })
            .collect()
    }

    /// Request cancellation of a running task.
    ///
    /// Command tasks get a termination signal (the child is killed). Function
    /// and API tasks cannot be interrupted mid-flight; returns `false`.
    pub async fn cancel_task(&self, task_id: Uuid) -> bool {
        let running = self.running.read().await;
        match running.get(&task_id) {
            Some(task) if task.cancellable => {
                // notify_one stores a permit, so a cancel landing before the
                // driver first polls its cancel future is not lost.
                task.cancel.notify_one();
                true
            }
            _ => false,
        }
    }
}

/// Run a command spec, locally or through the remote channel.
async fn run_command_spec(
    spec: &ActionSpec,
    remote: Option<&dyn RemoteExec>,
    max_output: usize,
) -> Result<serde_json::Value, TaskError> {
    let ActionSpec::Command {
        command,
        target,
        env,
        ..
    } = spec
    else {
        return Err(TaskError::InvalidSpec {
            reason: "not a command spec".to_string(),
        });
    };

    match target {
        Some(target) => {
            let channel = remote.ok_or_else(|| TaskError::ExecutionFailed {
                name: command.clone(),
                reason: "no remote command channel configured".to_string(),
            })?;
            let output = channel
                .run(target, command)
                .await
                .map_err(|e| TaskError::ExecutionFailed {
                    name: command.clone(),
                    reason: e.to_string(),
                })?;
            if !output.success() {
                let failure = RemoteError::CommandFailed {
                    target: target.clone(),
                    reason: format!(
                        "exit code {}: {}",
                        output.exit_code,
                        truncate(&output.stderr, 512)
                    ),
                };
                return Err(TaskError::ExecutionFailed {
                    name: command.clone(),
                    reason: failure.to_string(),
                });
            }
            Ok(serde_json::json!({
                "stdout": truncate(&output.stdout, max_output),
                "stderr": truncate(&output.stderr, max_output),
                "exit_code": output.exit_code,
                "target": target,
            }))
        }
        None => run_local_command(command, env, max_output).await,
    }
}

/// Run a command on the local host via `sh -c`, capturing output.
async fn run_local_command(
    command: &str,
    env: &std::collections::HashMap<String, String>,
    max_output: usize,
) -> Result<serde_json::Value, TaskError> {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = tokio::process::Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = tokio::process::Command::new("sh");
        c.args(["-c", command]);
        c
    };

    cmd.envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = cmd.output().await.map_err(|e| TaskError::ExecutionFailed {
        name: command.to_string(),
        reason: format!("failed to spawn: {e}"),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    if exit_code != 0 {
        return Err(TaskError::ExecutionFailed {
            name: command.to_string(),
            reason: format!("exit code {}: {}", exit_code, truncate(&stderr, 512)),
        });
    }

    Ok(serde_json::json!({
        "stdout": truncate(&stdout, max_output),
        "stderr": truncate(&stderr, max_output),
        "exit_code": exit_code,
    }))
}

/// Truncate a string to `max` bytes on a char boundary.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated {} bytes]", &s[..end], s.len() - end)
}
