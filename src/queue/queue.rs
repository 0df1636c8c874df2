//! Priority job queue with a bounded worker pool.
//!
//! One shared heap, `num_workers` worker tasks. Claiming a job is the single
//! atomic arbitration point: a worker takes the table lock, pops the
//! highest-priority entry, and flips the job Pending → Running; exactly one
//! worker wins. Cancelled jobs leave stale heap entries which claiming skips.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Error, JobError, TaskError};
use crate::executor::{ActionSpec, TaskExecutor, TaskStatus};
use crate::queue::job::{Job, JobStatus, Priority};
use crate::store::Store;

/// Heap entry: highest priority first, FIFO within a priority tier.
#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
    priority: Priority,
    seq: u64,
    job_id: Uuid,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct JobTable {
    heap: BinaryHeap<QueueEntry>,
    active: HashMap<Uuid, Job>,
    history: VecDeque<Job>,
}

struct QueueState {
    table: Mutex<JobTable>,
    notify: Notify,
    seq: AtomicU64,
    max_history: usize,
}

/// Thread-safe priority queue of jobs consumed by a fixed worker pool.
pub struct JobQueue {
    num_workers: usize,
    default_timeout: Duration,
    executor: Arc<TaskExecutor>,
    store: Option<Arc<dyn Store>>,
    state: Arc<QueueState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl JobQueue {
    pub fn new(
        config: &EngineConfig,
        executor: Arc<TaskExecutor>,
        store: Option<Arc<dyn Store>>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            num_workers: config.num_workers,
            default_timeout: config.default_job_timeout,
            executor,
            store,
            state: Arc::new(QueueState {
                table: Mutex::new(JobTable {
                    heap: BinaryHeap::new(),
                    active: HashMap::new(),
                    history: VecDeque::new(),
                }),
                notify: Notify::new(),
                seq: AtomicU64::new(0),
                max_history: config.max_history,
            }),
            workers: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Submit a job. Validates the spec, enqueues it PENDING, never blocks.
    ///
    /// Jobs may be enqueued before the first `start`; once `stop` has run,
    /// submissions are rejected until a restart.
    pub async fn submit(
        &self,
        action: ActionSpec,
        name: impl Into<String>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Uuid, Error> {
        if *self.shutdown_tx.borrow() {
            return Err(JobError::QueueStopped.into());
        }
        action.validate()?;
        if let ActionSpec::Function { handler, .. } = &action {
            if !self.executor.handlers().has(handler).await {
                return Err(TaskError::HandlerNotFound {
                    name: handler.clone(),
                }
                .into());
            }
        }

        let job = Job::new(
            name,
            action,
            priority,
            timeout.unwrap_or(self.default_timeout),
        );
        let job_id = job.id;
        let seq = self.state.seq.fetch_add(1, AtomicOrdering::Relaxed);

        let mut table = self.state.table.lock().await;
        table.heap.push(QueueEntry {
            priority,
            seq,
            job_id,
        });
        table.active.insert(job_id, job);
        drop(table);

        self.state.notify.notify_one();
        tracing::debug!(job_id = %job_id, priority = %priority, "Job submitted");
        Ok(job_id)
    }

    /// Start exactly `num_workers` background workers. No-op if running.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return;
        }
        let _ = self.shutdown_tx.send(false);

        for worker_id in 0..self.num_workers {
            let ctx = WorkerContext {
                state: Arc::clone(&self.state),
                executor: Arc::clone(&self.executor),
                store: self.store.clone(),
                shutdown: self.shutdown_tx.subscribe(),
            };
            workers.push(tokio::spawn(worker_loop(worker_id, ctx)));
        }
        tracing::info!("Job queue started with {} workers", self.num_workers);
    }

    /// Gracefully stop the workers. In-flight jobs finish (or hit their
    /// timeout); nothing is aborted.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.state.notify.notify_waiters();

        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!("Worker task join failed: {}", e);
            }
        }
        tracing::info!("Job queue stopped");
    }

    /// Cancel a PENDING job. Once a worker has claimed it (or it finished),
    /// the transition is rejected.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<(), JobError> {
        let mut table = self.state.table.lock().await;
        let Some(job) = table.active.get_mut(&job_id) else {
            if let Some(done) = table.history.iter().find(|j| j.id == job_id) {
                return Err(JobError::InvalidTransition {
                    id: job_id,
                    state: done.status.to_string(),
                    target: JobStatus::Cancelled.to_string(),
                });
            }
            return Err(JobError::NotFound { id: job_id });
        };
        // The stale heap entry is skipped at claim time.
        job.transition_to(JobStatus::Cancelled)?;
        let job = table.active.remove(&job_id).expect("job present");
        push_history(&mut table, self.state.max_history, job.clone());
        drop(table);

        persist_job(self.store.as_deref(), &job).await;
        tracing::info!(job_id = %job_id, "Job cancelled");
        Ok(())
    }

    /// Read-only snapshot of a job, active or historical.
    pub async fn get_job(&self, job_id: Uuid) -> Option<Job> {
        let table = self.state.table.lock().await;
        table
            .active
            .get(&job_id)
            .cloned()
            .or_else(|| table.history.iter().find(|j| j.id == job_id).cloned())
    }

    /// Snapshot of jobs, newest first, optionally filtered by status.
    pub async fn list_jobs(&self, status: Option<JobStatus>, limit: Option<usize>) -> Vec<Job> {
        let table = self.state.table.lock().await;
        let mut jobs: Vec<Job> = table
            .active
            .values()
            .chain(table.history.iter())
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        drop(table);

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        jobs
    }

    /// Number of jobs not yet claimed by a worker.
    pub async fn pending_count(&self) -> usize {
        let table = self.state.table.lock().await;
        table
            .active
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count()
    }

    /// Empty the history buffer, returning how many records were dropped.
    pub async fn clear_history(&self) -> usize {
        let mut table = self.state.table.lock().await;
        let count = table.history.len();
        table.history.clear();
        count
    }
}

struct WorkerContext {
    state: Arc<QueueState>,
    executor: Arc<TaskExecutor>,
    store: Option<Arc<dyn Store>>,
    shutdown: watch::Receiver<bool>,
}

async fn worker_loop(worker_id: usize, mut ctx: WorkerContext) {
    tracing::debug!(worker_id, "Worker started");
    loop {
        if *ctx.shutdown.borrow() {
            break;
        }
        match claim_next(&ctx.state).await {
            Some(job) => run_job(&ctx, worker_id, job).await,
            None => {
                tokio::select! {
                    _ = ctx.state.notify.notified() => {}
                    _ = ctx.shutdown.changed() => {}
                }
            }
        }
    }
    tracing::debug!(worker_id, "Worker stopped");
}

/// Pop the highest-priority pending job and claim it.
///
/// Heap entries whose job has been cancelled (or already claimed) are stale
/// and dropped here.
async fn claim_next(state: &QueueState) -> Option<Job> {
    let mut table = state.table.lock().await;
    while let Some(entry) = table.heap.pop() {
        if let Some(job) = table.active.get_mut(&entry.job_id) {
            if job.status == JobStatus::Pending {
                job.transition_to(JobStatus::Running)
                    .expect("pending job claimable");
                return Some(job.clone());
            }
        }
    }
    None
}

async fn run_job(ctx: &WorkerContext, worker_id: usize, job: Job) {
    tracing::info!(
        worker_id,
        job_id = %job.id,
        job = %job.name,
        priority = %job.priority,
        "Job started"
    );

    let execution = ctx
        .executor
        .execute(&job.name, job.action.clone(), job.timeout)
        .await;

    let (status, result, error) = match execution {
        Ok(outcome) => match outcome.status {
            TaskStatus::Completed | TaskStatus::Running => {
                (JobStatus::Completed, outcome.result, None)
            }
            TaskStatus::TimedOut => (JobStatus::TimedOut, None, outcome.error),
            TaskStatus::Failed | TaskStatus::Cancelled => (JobStatus::Failed, None, outcome.error),
        },
        // Admission-style errors surfacing at run time (e.g. a handler
        // unregistered after submission) fail the job, never the worker.
        Err(e) => (JobStatus::Failed, None, Some(e.to_string())),
    };

    let completed = {
        let mut table = ctx.state.table.lock().await;
        let Some(mut stored) = table.active.remove(&job.id) else {
            tracing::warn!(job_id = %job.id, "Running job vanished from the table");
            return;
        };
        if let Err(e) = stored.transition_to(status) {
            tracing::warn!(job_id = %job.id, "Bad terminal transition: {}", e);
        }
        stored.result = result;
        stored.error = error;
        push_history(&mut table, ctx.state.max_history, stored.clone());
        stored
    };

    match completed.status {
        JobStatus::Completed => {
            tracing::info!(worker_id, job_id = %completed.id, "Job completed");
        }
        other => {
            tracing::warn!(
                worker_id,
                job_id = %completed.id,
                status = %other,
                error = completed.error.as_deref().unwrap_or("-"),
                "Job did not complete"
            );
        }
    }

    persist_job(ctx.store.as_deref(), &completed).await;
}

fn push_history(table: &mut JobTable, max_history: usize, job: Job) {
    if table.history.len() >= max_history {
        table.history.pop_front();
    }
    table.history.push_back(job);
}

/// Best-effort persistence of a terminal job record.
async fn persist_job(store: Option<&dyn Store>, job: &Job) {
    let Some(store) = store else { return };
    match serde_json::to_value(job) {
        Ok(record) => {
            if let Err(e) = store.save(&format!("job:{}", job.id), &record).await {
                tracing::warn!(job_id = %job.id, "Failed to persist job record: {}", e);
            }
        }
        Err(e) => tracing::warn!(job_id = %job.id, "Failed to encode job record: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{FunctionArgs, HandlerRegistry};

    fn config(workers: usize) -> EngineConfig {
        EngineConfig {
            num_workers: workers,
            default_job_timeout: Duration::from_secs(5),
            max_history: 10,
            ..EngineConfig::default()
        }
    }

    async fn queue_with_handlers(workers: usize) -> (JobQueue, Arc<HandlerRegistry>) {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers
            .register_fn("noop", |_| async { Ok(serde_json::Value::Null) })
            .await;
        let executor = Arc::new(TaskExecutor::new(Arc::clone(&handlers)));
        (JobQueue::new(&config(workers), executor, None), handlers)
    }

    async fn wait_terminal(queue: &JobQueue, id: Uuid) -> Job {
        for _ in 0..200 {
            if let Some(job) = queue.get_job(id).await {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {id} never reached a terminal status");
    }

    #[test]
    fn heap_orders_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        heap.push(QueueEntry { priority: Priority::Normal, seq: 0, job_id: a });
        heap.push(QueueEntry { priority: Priority::Critical, seq: 2, job_id: b });
        heap.push(QueueEntry { priority: Priority::Normal, seq: 1, job_id: c });

        assert_eq!(heap.pop().unwrap().job_id, b);
        assert_eq!(heap.pop().unwrap().job_id, a);
        assert_eq!(heap.pop().unwrap().job_id, c);
    }

    #[tokio::test]
    async fn submit_validates_spec() {
        let (queue, _) = queue_with_handlers(1).await;
        let result = queue
            .submit(
                ActionSpec::local_command(""),
                "bad",
                Priority::Normal,
                None,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn submit_rejects_unknown_handler() {
        let (queue, _) = queue_with_handlers(1).await;
        let result = queue
            .submit(ActionSpec::function("ghost"), "x", Priority::Normal, None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn single_worker_runs_by_priority_then_fifo() {
        let handlers = Arc::new(HandlerRegistry::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_clone = Arc::clone(&order);
        handlers
            .register_fn("record", move |args: FunctionArgs| {
                let order = Arc::clone(&order_clone);
                async move {
                    let label = args.kwarg_str("label").unwrap_or("?").to_string();
                    order.lock().unwrap().push(label);
                    Ok(serde_json::Value::Null)
                }
            })
            .await;
        let executor = Arc::new(TaskExecutor::new(Arc::clone(&handlers)));
        let queue = JobQueue::new(&config(1), executor, None);

        let submit = |label: &str, priority| {
            let mut kwargs = serde_json::Map::new();
            kwargs.insert("label".to_string(), serde_json::json!(label));
            (
                ActionSpec::Function {
                    handler: "record".to_string(),
                    args: vec![],
                    kwargs,
                },
                label.to_string(),
                priority,
            )
        };

        // Enqueue before starting so ordering is decided purely by the heap.
        let mut ids = Vec::new();
        for (action, name, priority) in [
            submit("low-1", Priority::Low),
            submit("normal-1", Priority::Normal),
            submit("critical-1", Priority::Critical),
            submit("normal-2", Priority::Normal),
            submit("high-1", Priority::High),
        ] {
            ids.push(queue.submit(action, name, priority, None).await.unwrap());
        }

        queue.start().await;
        for id in &ids {
            wait_terminal(&queue, *id).await;
        }
        queue.stop().await;

        let recorded = order.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec!["critical-1", "high-1", "normal-1", "normal-2", "low-1"]
        );
    }

    #[tokio::test]
    async fn cancel_pending_succeeds_once() {
        let (queue, _) = queue_with_handlers(1).await;
        let id = queue
            .submit(ActionSpec::function("noop"), "j", Priority::Normal, None)
            .await
            .unwrap();

        queue.cancel_job(id).await.unwrap();
        // A cancelled job is in history; a second cancel is rejected.
        assert!(matches!(
            queue.cancel_job(id).await,
            Err(JobError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.cancel_job(Uuid::new_v4()).await,
            Err(JobError::NotFound { .. })
        ));

        let job = queue.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        // Workers never pick it up.
        queue.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.stop().await;
        assert_eq!(
            queue.get_job(id).await.unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn submit_rejected_after_stop() {
        let (queue, _) = queue_with_handlers(1).await;
        queue.start().await;
        queue.stop().await;

        let result = queue
            .submit(ActionSpec::function("noop"), "late", Priority::Normal, None)
            .await;
        assert!(matches!(result, Err(Error::Job(JobError::QueueStopped))));

        // A restart accepts submissions again.
        queue.start().await;
        let id = queue
            .submit(ActionSpec::function("noop"), "ok", Priority::Normal, None)
            .await
            .unwrap();
        wait_terminal(&queue, id).await;
        queue.stop().await;
    }

    #[tokio::test]
    async fn failing_action_recorded_and_worker_survives() {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers
            .register_fn("fail", |_| async { Err("deliberate".to_string()) })
            .await;
        handlers
            .register_fn("ok", |_| async { Ok(serde_json::json!("fine")) })
            .await;
        let executor = Arc::new(TaskExecutor::new(Arc::clone(&handlers)));
        let queue = JobQueue::new(&config(1), executor, None);
        queue.start().await;

        let bad = queue
            .submit(ActionSpec::function("fail"), "bad", Priority::Normal, None)
            .await
            .unwrap();
        let good = queue
            .submit(ActionSpec::function("ok"), "good", Priority::Normal, None)
            .await
            .unwrap();

        let bad_job = wait_terminal(&queue, bad).await;
        let good_job = wait_terminal(&queue, good).await;
        queue.stop().await;

        assert_eq!(bad_job.status, JobStatus::Failed);
        assert!(bad_job.error.unwrap().contains("deliberate"));
        assert_eq!(good_job.status, JobStatus::Completed);
        assert_eq!(good_job.result, Some(serde_json::json!("fine")));
    }

    #[tokio::test]
    async fn timeout_job_marked_timed_out() {
        let (queue, handlers) = queue_with_handlers(1).await;
        handlers
            .register_fn("slow", |_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(serde_json::Value::Null)
            })
            .await;
        queue.start().await;

        let id = queue
            .submit(
                ActionSpec::function("slow"),
                "slow",
                Priority::Normal,
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap();

        let job = wait_terminal(&queue, id).await;
        queue.stop().await;
        assert_eq!(job.status, JobStatus::TimedOut);
    }

    #[tokio::test]
    async fn list_jobs_filters_and_limits() {
        let (queue, _) = queue_with_handlers(2).await;
        queue.start().await;

        let mut ids = Vec::new();
        for i in 0..8 {
            ids.push(
                queue
                    .submit(
                        ActionSpec::function("noop"),
                        format!("job-{i}"),
                        Priority::Normal,
                        None,
                    )
                    .await
                    .unwrap(),
            );
        }
        for id in &ids {
            wait_terminal(&queue, *id).await;
        }
        queue.stop().await;

        let completed = queue.list_jobs(Some(JobStatus::Completed), Some(5)).await;
        assert_eq!(completed.len(), 5);
        assert!(completed.iter().all(|j| j.status == JobStatus::Completed));

        let all = queue.list_jobs(None, None).await;
        assert_eq!(all.len(), 8);
        // Newest first.
        for pair in all.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn history_bounded_and_clearable() {
        let (queue, _) = queue_with_handlers(2).await;
        queue.start().await;

        let mut last = Uuid::nil();
        for i in 0..15 {
            last = queue
                .submit(
                    ActionSpec::function("noop"),
                    format!("j{i}"),
                    Priority::Normal,
                    None,
                )
                .await
                .unwrap();
        }
        wait_terminal(&queue, last).await;
        // Wait for everything to drain.
        for _ in 0..100 {
            if queue.pending_count().await == 0
                && queue.list_jobs(Some(JobStatus::Running), None).await.is_empty()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        queue.stop().await;

        // max_history is 10 in the test config.
        let cleared = queue.clear_history().await;
        assert!(cleared <= 10);
        assert_eq!(queue.clear_history().await, 0);
    }

    #[tokio::test]
    async fn stop_lets_inflight_job_finish() {
        let (queue, handlers) = queue_with_handlers(1).await;
        handlers
            .register_fn("slowish", |_| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(serde_json::json!("done"))
            })
            .await;
        queue.start().await;

        let id = queue
            .submit(ActionSpec::function("slowish"), "s", Priority::Normal, None)
            .await
            .unwrap();
        // Give the worker time to claim it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.stop().await;

        let job = queue.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(serde_json::json!("done")));
    }
}
