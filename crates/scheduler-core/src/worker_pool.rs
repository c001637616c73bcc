//! Fixed-size worker pool with a bounded queue and cooperative
//! cancellation. Matches `OpenIntentOS`'s kernel scheduler idiom: a
//! `DashMap` of in-flight work keyed by id, and a `CancellationToken`
//! hierarchy rooted at the pool so pool shutdown cancels everything.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{ExecutionId, Task, TaskId};

/// Default worker count (`SCHEDULER_WORKER_COUNT`).
pub const DEFAULT_WORKER_COUNT: usize = 10;
/// Default bounded queue capacity (`SCHEDULER_QUEUE_SIZE`).
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Bookkeeping for one in-flight execution, enough for `stop_task` to
/// cancel it and for status reporting to describe it.
pub struct RunningExecution {
    pub task_id: TaskId,
    pub cancel: CancellationToken,
    pub stop_requested: Arc<AtomicBool>,
}

/// One unit of work submitted to the pool.
pub struct WorkItem {
    pub execution_id: ExecutionId,
    pub task: Task,
    pub run: Box<dyn FnOnce(CancellationToken) -> futures::future::BoxFuture<'static, ()> + Send>,
}

/// Fixed worker count, bounded queue, `try_send` enqueue. Mirrors the
/// `OpenIntentOS` kernel scheduler's running-work map rather than spawning
/// one task per submission unboundedly.
pub struct WorkerPool {
    sender: mpsc::Sender<WorkItem>,
    running: Arc<DashMap<ExecutionId, RunningExecution>>,
    root_cancel: CancellationToken,
    worker_count: usize,
    queue_size: usize,
}

impl WorkerPool {
    pub fn new(worker_count: usize, queue_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size);
        let running = Arc::new(DashMap::new());
        let root_cancel = CancellationToken::new();

        let pool = Self { sender, running, root_cancel, worker_count, queue_size };
        pool.spawn_workers(receiver);
        pool
    }

    fn spawn_workers(&self, receiver: mpsc::Receiver<WorkItem>) {
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        for worker_id in 0..self.worker_count {
            let receiver = receiver.clone();
            let root_cancel = self.root_cancel.clone();
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(item) = item else {
                        break;
                    };
                    tracing::debug!(worker_id, execution_id = %item.execution_id, "worker picked up execution");
                    let cancel = root_cancel.child_token();
                    (item.run)(cancel).await;
                }
            });
        }
    }

    /// Enqueues `item`, registering its cancellation token and stop flag in
    /// the running-executions map. Returns `QueueFull` immediately if the
    /// bounded channel is saturated; callers are expected to mark the
    /// execution Failed and release its lease on this error.
    pub fn try_submit(
        &self,
        item: WorkItem,
        cancel: CancellationToken,
        stop_requested: Arc<AtomicBool>,
    ) -> SchedulerResult<()> {
        self.running.insert(
            item.execution_id.clone(),
            RunningExecution { task_id: item.task.id.clone(), cancel, stop_requested },
        );
        match self.sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(item)) => {
                self.running.remove(&item.execution_id);
                Err(SchedulerError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(item)) => {
                self.running.remove(&item.execution_id);
                Err(SchedulerError::QueueFull)
            }
        }
    }

    /// Cancels every running execution for `task_id`, marking each with
    /// `stop_requested` so the writeback path can distinguish a user
    /// cancellation from a timeout.
    pub fn stop_task(&self, task_id: &TaskId) -> usize {
        let mut stopped = 0;
        for entry in self.running.iter() {
            if &entry.task_id == task_id {
                entry.stop_requested.store(true, Ordering::SeqCst);
                entry.cancel.cancel();
                stopped += 1;
            }
        }
        stopped
    }

    pub fn mark_finished(&self, execution_id: &ExecutionId) {
        self.running.remove(execution_id);
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_size
    }

    /// Cancels every in-flight execution. Used on engine shutdown; the
    /// channel is left open so in-flight workers can still drain their
    /// current item before observing cancellation.
    pub fn cancel_all(&self) {
        self.root_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, Source, TaskConfig, TaskKind, TaskStatus};
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    fn sample_task() -> Task {
        let now = Utc::now();
        Task {
            id: "t1".into(),
            name: "t1".into(),
            description: String::new(),
            kind: TaskKind::Function,
            schedule: "0 * * * * *".into(),
            priority: Priority::Normal,
            enabled: true,
            status: TaskStatus::Pending,
            config: TaskConfig::Function { function_name: "noop".into(), module: None, parameters: Default::default() },
            tags: vec![],
            max_retries: 0,
            retry_interval: std::time::Duration::from_secs(1),
            timeout: std::time::Duration::from_secs(5),
            is_system: false,
            source: Source::Api,
            version: 1,
            last_error: None,
            success_count: 0,
            failure_count: 0,
            total_runs: 0,
            average_runtime: std::time::Duration::from_secs(0),
            last_run: None,
            last_run_duration: None,
            next_run: None,
            created_at: now,
            updated_at: now,
            created_by: "tester".into(),
            updated_by: "tester".into(),
        }
    }

    #[tokio::test]
    async fn queue_full_is_returned_immediately() {
        let pool = WorkerPool::new(0, 1);
        let counter = Arc::new(AtomicUsize::new(0));

        let make_item = |id: &str| WorkItem {
            execution_id: id.to_string(),
            task: sample_task(),
            run: Box::new(move |_cancel| Box::pin(async {})),
        };

        pool.try_submit(make_item("e1"), CancellationToken::new(), Arc::new(AtomicBool::new(false))).unwrap();
        let second = pool.try_submit(make_item("e2"), CancellationToken::new(), Arc::new(AtomicBool::new(false)));
        assert!(matches!(second, Err(SchedulerError::QueueFull)));
        let _ = counter;
    }

    #[tokio::test]
    async fn stop_task_cancels_matching_executions_only() {
        let pool = WorkerPool::new(1, 10);
        let cancel_a = CancellationToken::new();
        let cancel_b = CancellationToken::new();
        let stop_a = Arc::new(AtomicBool::new(false));
        let stop_b = Arc::new(AtomicBool::new(false));

        pool.running.insert(
            "ea".to_string(),
            RunningExecution { task_id: "task-a".into(), cancel: cancel_a.clone(), stop_requested: stop_a.clone() },
        );
        pool.running.insert(
            "eb".to_string(),
            RunningExecution { task_id: "task-b".into(), cancel: cancel_b.clone(), stop_requested: stop_b.clone() },
        );

        let stopped = pool.stop_task(&"task-a".to_string());
        assert_eq!(stopped, 1);
        assert!(cancel_a.is_cancelled());
        assert!(!cancel_b.is_cancelled());
        assert!(stop_a.load(Ordering::SeqCst));
        assert!(!stop_b.load(Ordering::SeqCst));
    }
}
