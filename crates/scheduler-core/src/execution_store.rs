//! Durable history of task executions.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{ExecutionId, ExecutionStatus, Page, TaskExecution, TaskId};

/// Durable history of task executions, separate from [`crate::task_store::TaskStore`]
/// so retention/cleanup can be tuned independently of task definitions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, execution: TaskExecution) -> SchedulerResult<TaskExecution>;
    async fn update(&self, execution: TaskExecution) -> SchedulerResult<TaskExecution>;
    async fn get(&self, id: &ExecutionId) -> SchedulerResult<Option<TaskExecution>>;
    async fn list_for_task(&self, task_id: &TaskId, page: u32, page_size: u32) -> SchedulerResult<Page<TaskExecution>>;
    async fn list(&self, page: u32, page_size: u32) -> SchedulerResult<Page<TaskExecution>>;

    /// Deletes executions whose `completed_at` is older than `retention`.
    /// Returns the number of rows removed.
    async fn cleanup(&self, retention: Duration) -> SchedulerResult<u64>;

    /// Marks any execution still `Running` with `started_at` older than
    /// `max_age` as `Failed` with `error = "stale timeout"`. Returns the
    /// ids that were swept, mirroring [`crate::task_store::TaskStore::handle_stale_running`].
    async fn sweep_stale_running(&self, max_age: Duration) -> SchedulerResult<Vec<ExecutionId>>;
}

/// In-memory `ExecutionStore` used by engine/worker-pool unit tests.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<ExecutionId, TaskExecution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, execution: TaskExecution) -> SchedulerResult<TaskExecution> {
        let mut executions = self.executions.write().unwrap();
        executions.insert(execution.id.clone(), execution.clone());
        Ok(execution)
    }

    async fn update(&self, execution: TaskExecution) -> SchedulerResult<TaskExecution> {
        let mut executions = self.executions.write().unwrap();
        if !executions.contains_key(&execution.id) {
            return Err(SchedulerError::NotFound(execution.id.clone()));
        }
        executions.insert(execution.id.clone(), execution.clone());
        Ok(execution)
    }

    async fn get(&self, id: &ExecutionId) -> SchedulerResult<Option<TaskExecution>> {
        Ok(self.executions.read().unwrap().get(id).cloned())
    }

    async fn list_for_task(&self, task_id: &TaskId, page: u32, page_size: u32) -> SchedulerResult<Page<TaskExecution>> {
        let executions = self.executions.read().unwrap();
        let mut matching: Vec<TaskExecution> =
            executions.values().filter(|e| &e.task_id == task_id).cloned().collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        page_of(matching, page, page_size)
    }

    async fn list(&self, page: u32, page_size: u32) -> SchedulerResult<Page<TaskExecution>> {
        let executions = self.executions.read().unwrap();
        let mut matching: Vec<TaskExecution> = executions.values().cloned().collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        page_of(matching, page, page_size)
    }

    async fn cleanup(&self, retention: Duration) -> SchedulerResult<u64> {
        let mut executions = self.executions.write().unwrap();
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let before = executions.len();
        executions.retain(|_, e| match e.completed_at {
            Some(completed) => completed > cutoff,
            None => true,
        });
        Ok((before - executions.len()) as u64)
    }

    async fn sweep_stale_running(&self, max_age: Duration) -> SchedulerResult<Vec<ExecutionId>> {
        let mut executions = self.executions.write().unwrap();
        let now = Utc::now();
        let mut swept = Vec::new();
        for execution in executions.values_mut() {
            if execution.status != ExecutionStatus::Running {
                continue;
            }
            let age = now.signed_duration_since(execution.started_at);
            if age.to_std().unwrap_or_default() > max_age {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some("stale running task cleanup".to_string());
                execution.completed_at = Some(now);
                execution.duration = now.signed_duration_since(execution.started_at).to_std().ok();
                swept.push(execution.id.clone());
            }
        }
        Ok(swept)
    }
}

fn page_of(items: Vec<TaskExecution>, page: u32, page_size: u32) -> SchedulerResult<Page<TaskExecution>> {
    let total = items.len() as u64;
    let start = (page.saturating_sub(1) as usize) * page_size as usize;
    let items = items.into_iter().skip(start).take(page_size as usize).collect();
    Ok(Page { items, total, page, page_size })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_execution(task_id: &str) -> TaskExecution {
        TaskExecution::new(task_id.to_string(), "token-1")
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let store = InMemoryExecutionStore::new();
        let execution = sample_execution("t1");
        let id = execution.id.clone();
        store.create(execution).await.unwrap();
        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.task_id, "t1");
    }

    #[tokio::test]
    async fn list_for_task_is_newest_first() {
        let store = InMemoryExecutionStore::new();
        let mut first = sample_execution("t1");
        first.started_at = Utc::now() - chrono::Duration::seconds(10);
        let mut second = sample_execution("t1");
        second.started_at = Utc::now();
        store.create(first.clone()).await.unwrap();
        store.create(second.clone()).await.unwrap();

        let page = store.list_for_task(&"t1".to_string(), 1, 10).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, second.id);
    }

    #[tokio::test]
    async fn cleanup_removes_only_completed_past_retention() {
        let store = InMemoryExecutionStore::new();
        let mut old = sample_execution("t1");
        old.status = ExecutionStatus::Completed;
        old.completed_at = Some(Utc::now() - chrono::Duration::days(10));
        let mut recent = sample_execution("t1");
        recent.status = ExecutionStatus::Completed;
        recent.completed_at = Some(Utc::now());
        let running = sample_execution("t1");

        store.create(old).await.unwrap();
        store.create(recent.clone()).await.unwrap();
        store.create(running.clone()).await.unwrap();

        let removed = store.cleanup(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&recent.id).await.unwrap().is_some());
        assert!(store.get(&running.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_stale_running_marks_failed() {
        let store = InMemoryExecutionStore::new();
        let mut stale = sample_execution("t1");
        stale.started_at = Utc::now() - chrono::Duration::hours(2);
        let id = stale.id.clone();
        store.create(stale).await.unwrap();

        let swept = store.sweep_stale_running(Duration::from_secs(60)).await.unwrap();
        assert_eq!(swept, vec![id.clone()]);
        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Failed);
        assert_eq!(fetched.error.as_deref(), Some("stale running task cleanup"));
    }
}
