//! Durable CRUD for task definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{Page, Task, TaskId, TaskStatus};

/// Filter accepted by [`TaskStore::list`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub kind: Option<crate::model::TaskKind>,
    pub enabled: Option<bool>,
    pub tags: Vec<String>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if task.kind != kind {
                return false;
            }
        }
        if let Some(enabled) = self.enabled {
            if task.enabled != enabled {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| task.tags.contains(t)) {
            return false;
        }
        true
    }
}

/// Durable CRUD for task definitions, plus the run-time/statistics
/// writeback operations the engine uses on the hot path.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: Task) -> SchedulerResult<Task>;
    async fn get(&self, id: &TaskId) -> SchedulerResult<Option<Task>>;
    async fn update(&self, task: Task) -> SchedulerResult<Task>;
    async fn delete(&self, id: &TaskId) -> SchedulerResult<()>;
    async fn list(&self, filter: TaskFilter, page: u32, page_size: u32) -> SchedulerResult<Page<Task>>;

    /// Tasks with `enabled=true` and `status` not in `{Paused, Disabled}`.
    async fn get_active(&self) -> SchedulerResult<Vec<Task>>;

    async fn update_status(&self, id: &TaskId, status: TaskStatus) -> SchedulerResult<()>;
    async fn update_run(
        &self,
        id: &TaskId,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()>;

    /// Updates `last_run`/`next_run`, increments `total_runs` and
    /// `success_count`/`failure_count`, and recomputes `average_runtime`
    /// as a running mean over successful completions:
    /// `(avg * n + d) / (n + 1)` using the pre-update `success_count`.
    /// On success, `last_error` is cleared; on failure it is set to `error`.
    async fn update_run_with_duration(
        &self,
        id: &TaskId,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
        duration: Option<Duration>,
        success: bool,
        error: Option<String>,
    ) -> SchedulerResult<()>;

    /// Forces any task stuck in `Running` with `updated_at` older than
    /// `max_age` to `Failed`, recording `last_error = "stale timeout"`.
    /// Returns the ids that were swept.
    async fn handle_stale_running(&self, max_age: Duration) -> SchedulerResult<Vec<TaskId>>;
}

/// In-memory `TaskStore` used by engine/service unit tests.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: Task) -> SchedulerResult<Task> {
        let mut tasks = self.tasks.write().unwrap();
        if tasks.contains_key(&task.id) {
            return Err(SchedulerError::Validation(format!(
                "task id already exists: {}",
                task.id
            )));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get(&self, id: &TaskId) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.read().unwrap().get(id).cloned())
    }

    async fn update(&self, task: Task) -> SchedulerResult<Task> {
        let mut tasks = self.tasks.write().unwrap();
        if !tasks.contains_key(&task.id) {
            return Err(SchedulerError::NotFound(task.id.clone()));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn delete(&self, id: &TaskId) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().unwrap();
        match tasks.get(id) {
            Some(task) if task.is_system => Err(SchedulerError::Forbidden(id.clone())),
            Some(_) => {
                tasks.remove(id);
                Ok(())
            }
            None => Err(SchedulerError::NotFound(id.clone())),
        }
    }

    async fn list(&self, filter: TaskFilter, page: u32, page_size: u32) -> SchedulerResult<Page<Task>> {
        let tasks = self.tasks.read().unwrap();
        let mut matching: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let total = matching.len() as u64;
        let start = (page.saturating_sub(1) as usize) * page_size as usize;
        let items = matching.into_iter().skip(start).take(page_size as usize).collect();

        Ok(Page { items, total, page, page_size })
    }

    async fn get_active(&self) -> SchedulerResult<Vec<Task>> {
        Ok(self.tasks.read().unwrap().values().filter(|t| t.is_active()).cloned().collect())
    }

    async fn update_status(&self, id: &TaskId, status: TaskStatus) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn update_run(
        &self,
        id: &TaskId,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        if let Some(last_run) = last_run {
            task.last_run = Some(last_run);
        }
        task.next_run = next_run;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn update_run_with_duration(
        &self,
        id: &TaskId,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
        duration: Option<Duration>,
        success: bool,
        error: Option<String>,
    ) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| SchedulerError::NotFound(id.clone()))?;

        task.last_run = Some(last_run);
        task.last_run_duration = duration;
        task.next_run = next_run;
        task.total_runs += 1;

        if success {
            if let Some(d) = duration {
                let n = task.success_count;
                let avg = task.average_runtime.as_secs_f64();
                let new_avg = (avg * n as f64 + d.as_secs_f64()) / (n + 1) as f64;
                task.average_runtime = Duration::from_secs_f64(new_avg.max(0.0));
            }
            task.success_count += 1;
            task.last_error = None;
        } else {
            task.failure_count += 1;
            task.last_error = error;
        }
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn handle_stale_running(&self, max_age: Duration) -> SchedulerResult<Vec<TaskId>> {
        let mut tasks = self.tasks.write().unwrap();
        let now = Utc::now();
        let mut swept = Vec::new();
        for task in tasks.values_mut() {
            if task.status != TaskStatus::Running {
                continue;
            }
            let age = now.signed_duration_since(task.updated_at);
            if age.to_std().unwrap_or_default() > max_age {
                task.status = TaskStatus::Failed;
                task.last_error = Some("stale timeout".to_string());
                task.updated_at = now;
                swept.push(task.id.clone());
            }
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn sample_task(id: &str) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            name: "sample".into(),
            description: String::new(),
            kind: TaskKind::Function,
            schedule: "0 */5 * * * *".into(),
            priority: Priority::Normal,
            enabled: true,
            status: TaskStatus::Pending,
            config: TaskConfig::Function { function_name: "noop".into(), module: None, parameters: Default::default() },
            tags: vec![],
            max_retries: 3,
            retry_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(300),
            is_system: false,
            source: Source::Api,
            version: 1,
            last_error: None,
            success_count: 0,
            failure_count: 0,
            total_runs: 0,
            average_runtime: Duration::from_secs(0),
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
    async fn create_and_get_roundtrip() {
        let store = InMemoryTaskStore::new();
        let task = sample_task("t1");
        store.create(task.clone()).await.unwrap();
        let fetched = store.get(&"t1".to_string()).await.unwrap().unwrap();
        assert_eq!(fetched.id, task.id);
    }

    #[tokio::test]
    async fn delete_is_forbidden_for_system_tasks() {
        let store = InMemoryTaskStore::new();
        let mut task = sample_task("system-x");
        task.is_system = true;
        store.create(task).await.unwrap();

        let err = store.delete(&"system-x".to_string()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn average_runtime_is_running_mean() {
        let store = InMemoryTaskStore::new();
        store.create(sample_task("t1")).await.unwrap();

        store
            .update_run_with_duration(&"t1".to_string(), Utc::now(), None, Some(Duration::from_secs(10)), true, None)
            .await
            .unwrap();
        store
            .update_run_with_duration(&"t1".to_string(), Utc::now(), None, Some(Duration::from_secs(20)), true, None)
            .await
            .unwrap();

        let task = store.get(&"t1".to_string()).await.unwrap().unwrap();
        assert_eq!(task.success_count, 2);
        assert_eq!(task.total_runs, 2);
        assert!((task.average_runtime.as_secs_f64() - 15.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn get_active_excludes_paused_and_disabled() {
        let store = InMemoryTaskStore::new();
        let mut paused = sample_task("paused");
        paused.status = TaskStatus::Paused;
        store.create(paused).await.unwrap();
        store.create(sample_task("active")).await.unwrap();

        let active = store.get_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "active");
    }
}
