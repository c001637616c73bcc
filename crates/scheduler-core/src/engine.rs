//! Orchestrates the cron dispatcher, lock service, worker pool, and
//! executor registry into the single engine-level algorithm: lease
//! acquire → execution record → enqueue → worker run → writeback → release.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::cron::CronDispatcher;
use crate::error::{SchedulerError, SchedulerResult};
use crate::execution_store::ExecutionStore;
use crate::executor::{ExecutionContext, ExecutorRegistry};
use crate::lock::LockService;
use crate::metrics::SchedulerMetrics;
use crate::model::{ExecutionStatus, Lease, Task, TaskExecution, TaskId, TaskStatus};
use crate::task_store::TaskStore;
use crate::worker_pool::{WorkItem, WorkerPool};

/// Buffer added on top of a task's own timeout when computing the lease
/// TTL, so a slow-but-alive worker doesn't lose its lease mid-execution.
const LEASE_TTL_BUFFER: Duration = Duration::from_secs(30);

pub struct Engine {
    task_store: Arc<dyn TaskStore>,
    execution_store: Arc<dyn ExecutionStore>,
    lock: Arc<dyn LockService>,
    executors: Arc<ExecutorRegistry>,
    pool: Arc<WorkerPool>,
    cron: Arc<CronDispatcher>,
    metrics: Arc<SchedulerMetrics>,
    running: AtomicBool,
}

impl Engine {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        execution_store: Arc<dyn ExecutionStore>,
        lock: Arc<dyn LockService>,
        executors: Arc<ExecutorRegistry>,
        pool: Arc<WorkerPool>,
        cron: Arc<CronDispatcher>,
    ) -> Self {
        let metrics = Arc::new(SchedulerMetrics::default());
        Self { task_store, execution_store, lock, executors, pool, cron, metrics, running: AtomicBool::new(false) }
    }

    /// The Prometheus registry backing this engine, for a caller to scrape
    /// or embed behind its own `/metrics` route.
    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        self.metrics.clone()
    }

    /// Loads every active task, registers its schedule, and starts the
    /// cron tick loop. Idempotent: a second call is a no-op unless preceded
    /// by `reload`.
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        self.reload().await?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let engine = self.clone();
        self.cron.start(Arc::new(move |task_id: TaskId| {
            let engine = engine.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.run_scheduled(task_id.clone()).await {
                    tracing::warn!(task_id = %task_id, error = %e, "scheduled run did not complete");
                }
            });
        }));
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Rebuilds the dispatcher's registered-entries map from the store,
    /// atomically. Used at startup and by the `/scheduler/reload`
    /// surface.
    pub async fn reload(&self) -> SchedulerResult<()> {
        let active = self.task_store.get_active().await?;
        let schedules = active.into_iter().map(|t| (t.id, t.schedule)).collect();
        self.cron.reload(schedules, Utc::now())
    }

    pub fn stop(&self) {
        self.cron.stop();
        self.pool.cancel_all();
        self.running.store(false, Ordering::SeqCst);
    }

    /// Entry point for a cron-driven tick. Lease contention is expected and
    /// silent: the task simply waits for the next tick.
    async fn run_scheduled(&self, task_id: TaskId) -> SchedulerResult<()> {
        match self.dispatch(&task_id, false).await {
            Ok(()) => Ok(()),
            Err(SchedulerError::LeaseBusy(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Manual trigger from the `/scheduler/tasks/{id}/execute` surface.
    /// Unlike a scheduled tick, lease contention and queue saturation are
    /// surfaced to the caller as errors (409) rather than swallowed.
    pub async fn trigger(&self, task_id: &TaskId) -> SchedulerResult<()> {
        self.dispatch(task_id, true).await
    }

    async fn dispatch(&self, task_id: &TaskId, manual: bool) -> SchedulerResult<()> {
        let task = self.task_store.get(task_id).await?.ok_or_else(|| SchedulerError::NotFound(task_id.clone()))?;
        if !task.is_active() {
            return Ok(());
        }

        let lease_ttl = task.timeout + LEASE_TTL_BUFFER;
        let lease = match self.lock.acquire(task_id, lease_ttl).await? {
            Some(lease) => lease,
            None => return Err(SchedulerError::LeaseBusy(task_id.clone())),
        };

        let mut execution = TaskExecution::new(task_id.clone(), &lease.token);
        if manual {
            execution.metadata.insert(crate::model::METADATA_MANUAL_TRIGGER.to_string(), "true".to_string());
        }
        let execution = self.execution_store.create(execution).await?;
        self.task_store.update_status(task_id, TaskStatus::Running).await?;

        if let Err(e) = self.enqueue(task, execution.clone(), lease.clone()).await {
            if matches!(e, SchedulerError::QueueFull) {
                self.metrics.queue_full_rejections.inc();
            }
            let now = Utc::now();
            let failed = TaskExecution {
                status: ExecutionStatus::Failed,
                completed_at: Some(now),
                duration: Some(Duration::from_secs(0)),
                error: Some(e.to_string()),
                ..execution
            };
            if let Err(update_err) = self.execution_store.update(failed).await {
                tracing::error!(task_id = %task_id, error = %update_err, "failed to mark execution failed after enqueue rejection");
            }
            let _ = self.task_store.update_status(task_id, TaskStatus::Failed).await;
            self.lock.release(&lease).await?;
            return Err(e);
        }
        Ok(())
    }

    async fn enqueue(&self, task: Task, execution: TaskExecution, lease: Lease) -> SchedulerResult<()> {
        let task_store = self.task_store.clone();
        let execution_store = self.execution_store.clone();
        let lock = self.lock.clone();
        let executors = self.executors.clone();
        let pool_for_finish = self.pool.clone();
        let metrics = self.metrics.clone();
        let cron = self.cron.clone();
        let task_id = task.id.clone();
        let execution_id = execution.id.clone();
        let initial_metadata = execution.metadata.clone();
        let stop_requested = Arc::new(AtomicBool::new(false));
        let stop_requested_for_run = stop_requested.clone();

        let item = WorkItem {
            execution_id: execution_id.clone(),
            task: task.clone(),
            run: Box::new(move |cancel: CancellationToken| {
                Box::pin(async move {
                    let ctx = ExecutionContext { cancel };
                    let started = Utc::now();
                    let outcome = tokio::time::timeout(task.timeout, executors.dispatch(ctx, &task)).await;

                    let timed_out = outcome.is_err();
                    let (mut success, mut output, mut error, duration) = match outcome {
                        Ok(Ok(result)) => (result.success, result.output, result.error, result.duration),
                        Ok(Err(SchedulerError::Cancelled)) => (false, String::new(), Some("cancelled".to_string()), Utc::now().signed_duration_since(started).to_std().unwrap_or_default()),
                        Ok(Err(e)) => (false, String::new(), Some(e.to_string()), Utc::now().signed_duration_since(started).to_std().unwrap_or_default()),
                        Err(_) => (false, String::new(), Some("timed out".to_string()), task.timeout),
                    };

                    // A user-initiated `stop_task` always wins over whatever
                    // the executor itself reported, so the writeback matches
                    // the exact cancellation marker regardless of how
                    // promptly the executor observed cancellation.
                    let was_stopped = stop_requested_for_run.load(Ordering::SeqCst);
                    if was_stopped {
                        success = false;
                        error = Some("Task execution was cancelled".to_string());
                        output = "Execution stopped by user request".to_string();
                    }

                    metrics.observe_execution(success, timed_out && !was_stopped, duration.as_secs_f64());

                    let completed_at = Utc::now();
                    let mut finished = TaskExecution {
                        id: execution_id.clone(),
                        task_id: task_id.clone(),
                        status: if success { ExecutionStatus::Completed } else { ExecutionStatus::Failed },
                        started_at: started,
                        completed_at: Some(completed_at),
                        duration: Some(duration),
                        output,
                        error: error.clone(),
                        retry_count: 0,
                        worker_id: None,
                        metadata: initial_metadata.clone(),
                    };
                    if was_stopped {
                        finished.metadata.insert(crate::model::METADATA_STOP_REQUESTED.to_string(), "true".to_string());
                    }

                    if let Err(e) = execution_store.update(finished).await {
                        tracing::error!(task_id = %task_id, error = %e, "failed to write back execution result");
                    }

                    let next_run = if was_stopped {
                        None
                    } else {
                        task_store.get(&task_id).await.ok().flatten().and_then(|t| {
                            crate::cron::next_run_after_tz(&t.schedule, completed_at, cron.timezone()).ok().flatten()
                        })
                    };
                    if let Err(e) = task_store
                        .update_run_with_duration(&task_id, completed_at, next_run, Some(duration), success, error.clone())
                        .await
                    {
                        tracing::error!(task_id = %task_id, error = %e, "failed to write back task run stats");
                    }
                    // `stop_task` already transitioned the task to Paused
                    // before this writeback runs; don't clobber that with
                    // Failed/Pending from the executor's own outcome.
                    if !was_stopped {
                        let status = if success { TaskStatus::Pending } else { TaskStatus::Failed };
                        let _ = task_store.update_status(&task_id, status).await;
                    }

                    if let Err(e) = lock.release(&lease).await {
                        tracing::error!(task_id = %task_id, error = %e, "failed to release lease");
                    }
                    pool_for_finish.mark_finished(&execution_id);
                }) as futures::future::BoxFuture<'static, ()>
            }),
        };

        let cancel = CancellationToken::new();
        self.pool.try_submit(item, cancel, stop_requested)
    }

    pub async fn pause(&self, task_id: &TaskId) -> SchedulerResult<()> {
        self.task_store.update_status(task_id, TaskStatus::Paused).await?;
        self.cron.unregister(task_id);
        Ok(())
    }

    pub async fn resume(&self, task_id: &TaskId) -> SchedulerResult<()> {
        let task = self.task_store.get(task_id).await?.ok_or_else(|| SchedulerError::NotFound(task_id.clone()))?;
        self.task_store.update_status(task_id, TaskStatus::Pending).await?;
        self.cron.register(task_id.clone(), &task.schedule, Utc::now())
    }

    /// Cancels any running execution for `task_id` and pauses it so the
    /// dispatcher stops firing new ticks.
    pub async fn stop_task(&self, task_id: &TaskId) -> SchedulerResult<usize> {
        let stopped = self.pool.stop_task(task_id);
        self.pause(task_id).await?;
        Ok(stopped)
    }

    pub fn status(&self) -> EngineStatus {
        let running_executions = self.pool.running_count();
        let registered_schedules = self.cron.registered_count();
        self.metrics.running_executions.set(running_executions as i64);
        self.metrics.registered_schedules.set(registered_schedules as i64);
        EngineStatus {
            running: self.is_running(),
            worker_count: self.pool.worker_count(),
            queue_capacity: self.pool.queue_capacity(),
            running_executions,
            registered_schedules,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub running: bool,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub running_executions: usize,
    pub registered_schedules: usize,
}
