//! Recurring task scheduler.
//!
//! A single cooperative scan loop polls a min-heap of `(next_run_at, task_id)`
//! on a fixed tick. Due tasks are handed to the job queue, never executed
//! inline, so one slow action cannot delay the others. Replaced or cancelled
//! tasks leave stale heap entries that the scan drops by revalidating against
//! the registry.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::error::ScheduleError;
use crate::executor::ActionSpec;
use crate::queue::{JobQueue, Priority};
use crate::schedule::spec::ScheduleSpec;
use crate::store::Store;

/// A named, repeating schedule entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringTask {
    pub task_id: String,
    pub action: ActionSpec,
    pub schedule: ScheduleSpec,
    pub next_run_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct DueEntry {
    at: DateTime<Utc>,
    task_id: String,
}

struct SchedulerState {
    tasks: HashMap<String, RecurringTask>,
    due: BinaryHeap<Reverse<DueEntry>>,
}

/// Fires registered actions on their schedule by submitting jobs.
pub struct TaskScheduler {
    tick: Duration,
    queue: Arc<JobQueue>,
    store: Option<Arc<dyn Store>>,
    state: Arc<Mutex<SchedulerState>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl TaskScheduler {
    pub fn new(tick: Duration, queue: Arc<JobQueue>, store: Option<Arc<dyn Store>>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tick,
            queue,
            store,
            state: Arc::new(Mutex::new(SchedulerState {
                tasks: HashMap::new(),
                due: BinaryHeap::new(),
            })),
            loop_handle: Mutex::new(None),
            shutdown_tx,
        }
    }

    /// Register (or replace) a fixed-interval task. `interval` is `"hourly"`,
    /// `"daily"`, or a number of minutes.
    pub async fn schedule_task(
        &self,
        task_id: impl Into<String>,
        action: ActionSpec,
        interval: &str,
    ) -> Result<(), ScheduleError> {
        self.insert(task_id.into(), action, ScheduleSpec::interval(interval)?)
            .await
    }

    /// Register (or replace) a task firing daily at `"HH:MM"` UTC.
    pub async fn schedule_at_time(
        &self,
        task_id: impl Into<String>,
        action: ActionSpec,
        time: &str,
    ) -> Result<(), ScheduleError> {
        self.insert(task_id.into(), action, ScheduleSpec::daily_at(time)?)
            .await
    }

    /// Register (or replace) a cron-scheduled task.
    pub async fn schedule_cron(
        &self,
        task_id: impl Into<String>,
        action: ActionSpec,
        expression: &str,
    ) -> Result<(), ScheduleError> {
        self.insert(task_id.into(), action, ScheduleSpec::cron(expression)?)
            .await
    }

    async fn insert(
        &self,
        task_id: String,
        action: ActionSpec,
        schedule: ScheduleSpec,
    ) -> Result<(), ScheduleError> {
        let next_run_at = schedule.next_fire(Utc::now())?;
        let task = RecurringTask {
            task_id: task_id.clone(),
            action,
            schedule,
            next_run_at,
            enabled: true,
            last_run_at: None,
            run_count: 0,
            last_error: None,
        };

        let mut state = self.state.lock().await;
        // Replacing drops the old entry; its heap entry goes stale.
        let replaced = state.tasks.insert(task_id.clone(), task.clone()).is_some();
        if let Some(at) = next_run_at {
            state.due.push(Reverse(DueEntry {
                at,
                task_id: task_id.clone(),
            }));
        }
        drop(state);

        tracing::info!(
            task_id = %task_id,
            schedule = %task.schedule.describe(),
            replaced,
            "Recurring task scheduled"
        );
        persist_task(self.store.as_deref(), &task).await;
        Ok(())
    }

    /// Remove a recurring task.
    pub async fn cancel_task(&self, task_id: &str) -> Result<(), ScheduleError> {
        let mut state = self.state.lock().await;
        if state.tasks.remove(task_id).is_none() {
            return Err(ScheduleError::NotFound {
                task_id: task_id.to_string(),
            });
        }
        drop(state);

        if let Some(store) = &self.store {
            if let Err(e) = store.delete(&format!("task:{task_id}")).await {
                tracing::warn!(task_id, "Failed to delete task record: {}", e);
            }
        }
        tracing::info!(task_id, "Recurring task cancelled");
        Ok(())
    }

    /// Snapshot of one task's schedule metadata.
    pub async fn get_task(&self, task_id: &str) -> Option<RecurringTask> {
        self.state.lock().await.tasks.get(task_id).cloned()
    }

    /// Snapshot of all registered tasks, sorted by id.
    pub async fn list_tasks(&self) -> Vec<RecurringTask> {
        let state = self.state.lock().await;
        let mut tasks: Vec<RecurringTask> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        tasks
    }

    /// Rebuild the registry from persisted records; fire times are recomputed
    /// from now rather than replayed.
    pub async fn restore(&self, tasks: Vec<RecurringTask>) {
        let mut state = self.state.lock().await;
        for mut task in tasks {
            match task.schedule.next_fire(Utc::now()) {
                Ok(next) => task.next_run_at = next,
                Err(e) => {
                    tracing::warn!(task_id = %task.task_id, "Disabling restored task: {}", e);
                    task.enabled = false;
                    task.last_error = Some(e.to_string());
                    task.next_run_at = None;
                }
            }
            if let (true, Some(at)) = (task.enabled, task.next_run_at) {
                state.due.push(Reverse(DueEntry {
                    at,
                    task_id: task.task_id.clone(),
                }));
            }
            state.tasks.insert(task.task_id.clone(), task);
        }
    }

    /// Start the scan loop. No-op if already running.
    pub async fn start(&self) {
        let mut handle = self.loop_handle.lock().await;
        if handle.is_some() {
            return;
        }
        let _ = self.shutdown_tx.send(false);

        let state = Arc::clone(&self.state);
        let queue = Arc::clone(&self.queue);
        let store = self.store.clone();
        let tick = self.tick;
        let mut shutdown = self.shutdown_tx.subscribe();

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Skip the immediate first tick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scan_due(&state, &queue, store.as_deref()).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("Scheduler loop stopped");
        }));
        tracing::info!("Scheduler started (tick {:?})", self.tick);
    }

    /// Stop the scan loop.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Scheduler loop join failed: {}", e);
            }
        }
    }
}

/// One scan pass: pop due heap entries, fire current ones, reschedule.
async fn scan_due(state: &Mutex<SchedulerState>, queue: &JobQueue, store: Option<&dyn Store>) {
    let now = Utc::now();
    let mut fired: Vec<RecurringTask> = Vec::new();

    {
        let mut state = state.lock().await;
        loop {
            match state.due.peek() {
                Some(Reverse(entry)) if entry.at <= now => {}
                _ => break,
            }
            let Reverse(entry) = state.due.pop().expect("peeked entry");

            let Some(task) = state.tasks.get_mut(&entry.task_id) else {
                continue; // cancelled, stale entry
            };
            if !task.enabled || task.next_run_at != Some(entry.at) {
                continue; // replaced or disabled, stale entry
            }

            task.last_run_at = Some(now);
            task.run_count += 1;
            match task.schedule.next_fire(now) {
                Ok(Some(next)) => {
                    task.next_run_at = Some(next);
                    fired.push(task.clone());
                    let task_id = entry.task_id.clone();
                    state.due.push(Reverse(DueEntry { at: next, task_id }));
                }
                Ok(None) => {
                    task.next_run_at = None;
                    task.enabled = false;
                    fired.push(task.clone());
                    tracing::info!(task_id = %entry.task_id, "Schedule exhausted, task disabled");
                }
                Err(e) => {
                    // A broken schedule disables this entry only; the loop
                    // keeps serving the other tasks.
                    task.enabled = false;
                    task.next_run_at = None;
                    task.last_error = Some(e.to_string());
                    fired.push(task.clone());
                    tracing::error!(task_id = %entry.task_id, "Disabling task: {}", e);
                }
            }
        }
    }

    for task in fired {
        if task.last_error.is_none() {
            match queue
                .submit(
                    task.action.clone(),
                    task.task_id.clone(),
                    Priority::Normal,
                    None,
                )
                .await
            {
                Ok(job_id) => {
                    tracing::debug!(task_id = %task.task_id, job_id = %job_id, "Recurring task fired");
                }
                Err(e) => {
                    tracing::error!(task_id = %task.task_id, "Failed to submit recurring task: {}", e);
                }
            }
        }
        persist_task(store, &task).await;
    }
}

/// Best-effort persistence of the task registry entry.
async fn persist_task(store: Option<&dyn Store>, task: &RecurringTask) {
    let Some(store) = store else { return };
    match serde_json::to_value(task) {
        Ok(record) => {
            if let Err(e) = store.save(&format!("task:{}", task.task_id), &record).await {
                tracing::warn!(task_id = %task.task_id, "Failed to persist task record: {}", e);
            }
        }
        Err(e) => tracing::warn!(task_id = %task.task_id, "Failed to encode task record: {}", e),
    }
}
