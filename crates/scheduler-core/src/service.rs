//! Validation, DTO mapping, system-task seeding, and statistics
//! rollup sitting in front of the [`crate::engine::Engine`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use uuid::Uuid;

use crate::dto::{CreateTaskRequest, PageRequest, StatsDto, TaskFilterRequest, UpdateTaskRequest};
use crate::engine::Engine;
use crate::error::{SchedulerError, SchedulerResult};
use crate::execution_store::ExecutionStore;
use crate::model::{ExecutionStatus, Page, Source, Task, TaskConfig, TaskId, TaskStatus};
use crate::system_tasks::{self, seed_tasks};
use crate::task_store::{TaskFilter, TaskStore};

/// Execution-history retention window for the hourly cleanup job.
const EXECUTION_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);
/// Failure rate above which the 5-minute sample escalates from `info` to
/// a `warn` log.
const FAILURE_RATE_ALERT_THRESHOLD: f64 = 0.1;
/// Threshold for the per-minute stale-running sweep.
const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(2 * 3600);

pub struct SchedulerService {
    task_store: Arc<dyn TaskStore>,
    execution_store: Arc<dyn ExecutionStore>,
    engine: Arc<Engine>,
    stale_timeout: Duration,
    cleanup_interval: Duration,
    timezone: Tz,
}

impl SchedulerService {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        execution_store: Arc<dyn ExecutionStore>,
        engine: Arc<Engine>,
        stale_timeout: Duration,
    ) -> Self {
        Self::with_cleanup_interval(task_store, execution_store, engine, stale_timeout, Duration::from_secs(3600))
    }

    /// As [`Self::new`], but with the execution-retention cleanup cadence
    /// configurable instead of hardcoded to one hour (`SCHEDULER_CLEANUP_INTERVAL`).
    pub fn with_cleanup_interval(
        task_store: Arc<dyn TaskStore>,
        execution_store: Arc<dyn ExecutionStore>,
        engine: Arc<Engine>,
        stale_timeout: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self::with_timezone(task_store, execution_store, engine, stale_timeout, cleanup_interval, chrono_tz::UTC)
    }

    /// As [`Self::with_cleanup_interval`], but schedule validation and
    /// `next_run` computation interpret cron fields in `timezone` instead
    /// of UTC (`SCHEDULER_TIMEZONE`).
    pub fn with_timezone(
        task_store: Arc<dyn TaskStore>,
        execution_store: Arc<dyn ExecutionStore>,
        engine: Arc<Engine>,
        stale_timeout: Duration,
        cleanup_interval: Duration,
        timezone: Tz,
    ) -> Self {
        Self { task_store, execution_store, engine, stale_timeout, cleanup_interval, timezone }
    }

    /// Upserts the 13 well-known system tasks: inserts if absent,
    /// reconciles `schedule`/`kind`/`config` only if present.
    pub async fn seed_system_tasks(&self) -> SchedulerResult<()> {
        for seed in seed_tasks() {
            match self.task_store.get(&seed.id).await? {
                Some(mut existing) => {
                    system_tasks::reconcile(&mut existing, &seed);
                    self.task_store.update(existing).await?;
                }
                None => {
                    self.task_store.create(seed).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        self.seed_system_tasks().await?;
        self.engine.start().await?;
        self.spawn_maintenance_loops();
        Ok(())
    }

    fn spawn_maintenance_loops(self: &Arc<Self>) {
        let hourly = self.clone();
        let cleanup_interval = self.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = hourly.execution_store.cleanup(EXECUTION_RETENTION).await {
                    tracing::warn!(error = %e, "execution history cleanup failed");
                }
            }
        });

        let per_minute = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                if let Err(e) = per_minute.task_store.handle_stale_running(per_minute.stale_timeout).await {
                    tracing::warn!(error = %e, "stale task sweep failed");
                }
                if let Err(e) = per_minute.execution_store.sweep_stale_running(per_minute.stale_timeout).await {
                    tracing::warn!(error = %e, "stale execution sweep failed");
                }
            }
        });

        let five_minute = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                ticker.tick().await;
                if let Err(e) = five_minute.sample_failure_rate().await {
                    tracing::warn!(error = %e, "failure-rate sampling failed");
                }
            }
        });
    }

    /// Logs the current cross-task failure rate, escalating to a warning
    /// once it exceeds [`FAILURE_RATE_ALERT_THRESHOLD`]. The "failure-rate
    /// sampling" job has no further documented consumer in this
    /// deployment beyond observability, so it samples and logs rather than
    /// writing to a dedicated store.
    async fn sample_failure_rate(&self) -> SchedulerResult<()> {
        let page = self.task_store.list(TaskFilter::default(), 1, u32::MAX).await?;
        let total: u64 = page.items.iter().map(|t| t.total_runs).sum();
        let failed: u64 = page.items.iter().map(|t| t.failure_count).sum();
        let rate = if total == 0 { 0.0 } else { failed as f64 / total as f64 };
        if rate > FAILURE_RATE_ALERT_THRESHOLD {
            tracing::warn!(failure_rate = rate, total_runs = total, "scheduler failure rate exceeds 10%");
        } else {
            tracing::info!(failure_rate = rate, total_runs = total, "sampled scheduler failure rate");
        }
        Ok(())
    }

    pub async fn create_task(&self, request: CreateTaskRequest) -> SchedulerResult<Task> {
        self.validate_schedule(&request.schedule)?;
        validate_config(&request.kind, &request.config)?;
        if request.name.trim().is_empty() {
            return Err(SchedulerError::Validation("task name must not be empty".to_string()));
        }

        let now = Utc::now();
        let next_run = crate::cron::next_run_after_tz(&request.schedule, now, self.timezone)?;
        let task = Task {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            kind: request.kind,
            schedule: request.schedule,
            priority: request.priority,
            enabled: request.enabled,
            status: TaskStatus::Pending,
            config: request.config,
            tags: request.tags,
            max_retries: request.max_retries,
            retry_interval: request.retry_interval,
            timeout: request.timeout,
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
            next_run,
            created_at: now,
            updated_at: now,
            created_by: request.created_by.clone(),
            updated_by: request.created_by,
        };

        let task = self.task_store.create(task).await?;
        self.engine.reload().await?;
        Ok(task)
    }

    pub async fn update_task(&self, id: &TaskId, request: UpdateTaskRequest) -> SchedulerResult<Task> {
        let mut task = self.task_store.get(id).await?.ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        if task.is_system {
            return Err(SchedulerError::Forbidden(id.clone()));
        }

        if let Some(schedule) = &request.schedule {
            self.validate_schedule(schedule)?;
            task.schedule = schedule.clone();
            task.next_run = crate::cron::next_run_after_tz(schedule, Utc::now(), self.timezone)?;
        }
        if let Some(config) = request.config {
            validate_config(&task.kind, &config)?;
            task.config = config;
        }
        if let Some(name) = request.name {
            task.name = name;
        }
        if let Some(description) = request.description {
            task.description = description;
        }
        if let Some(priority) = request.priority {
            task.priority = priority;
        }
        if let Some(enabled) = request.enabled {
            task.enabled = enabled;
        }
        if let Some(tags) = request.tags {
            task.tags = tags;
        }
        if let Some(max_retries) = request.max_retries {
            task.max_retries = max_retries;
        }
        if let Some(retry_interval) = request.retry_interval {
            task.retry_interval = retry_interval;
        }
        if let Some(timeout) = request.timeout {
            task.timeout = timeout;
        }
        task.updated_by = request.updated_by;
        task.updated_at = Utc::now();
        task.version += 1;

        let task = self.task_store.update(task).await?;
        self.engine.reload().await?;
        Ok(task)
    }

    pub async fn delete_task(&self, id: &TaskId) -> SchedulerResult<()> {
        self.task_store.delete(id).await?;
        self.engine.reload().await
    }

    pub async fn get_task(&self, id: &TaskId) -> SchedulerResult<Task> {
        self.task_store.get(id).await?.ok_or_else(|| SchedulerError::NotFound(id.clone()))
    }

    pub async fn list_tasks(&self, filter: TaskFilterRequest, page: PageRequest) -> SchedulerResult<Page<Task>> {
        let filter = TaskFilter { status: filter.status, kind: filter.kind, enabled: filter.enabled, tags: filter.tags };
        self.task_store.list(filter, page.page, page.page_size).await
    }

    pub async fn execute_now(&self, id: &TaskId) -> SchedulerResult<()> {
        self.engine.trigger(id).await
    }

    pub async fn pause_task(&self, id: &TaskId) -> SchedulerResult<()> {
        self.engine.pause(id).await
    }

    pub async fn resume_task(&self, id: &TaskId) -> SchedulerResult<()> {
        self.engine.resume(id).await
    }

    pub async fn stop_task(&self, id: &TaskId) -> SchedulerResult<usize> {
        self.engine.stop_task(id).await
    }

    pub async fn history(&self, id: &TaskId, page: PageRequest) -> SchedulerResult<Page<crate::model::TaskExecution>> {
        self.task_store.get(id).await?.ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        self.execution_store.list_for_task(id, page.page, page.page_size).await
    }

    pub async fn executions(&self, page: PageRequest) -> SchedulerResult<Page<crate::model::TaskExecution>> {
        self.execution_store.list(page.page, page.page_size).await
    }

    pub async fn execution(&self, id: &str) -> SchedulerResult<crate::model::TaskExecution> {
        self.execution_store.get(&id.to_string()).await?.ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    pub async fn reload(&self) -> SchedulerResult<()> {
        self.engine.reload().await
    }

    fn validate_schedule(&self, schedule: &str) -> SchedulerResult<()> {
        crate::cron::next_run_after_tz(schedule, Utc::now(), self.timezone)
            .map(|_| ())
            .map_err(|_| SchedulerError::Validation(format!("invalid cron expression: {}", schedule)))
    }

    pub async fn stats(&self) -> SchedulerResult<StatsDto> {
        let all = self.task_store.list(TaskFilter::default(), 1, u32::MAX).await?;
        // "Today" is the operator's configured timezone day, UTC midnight
        // when none is configured.
        let today = Utc::now().with_timezone(&self.timezone).date_naive();

        let enabled_tasks = all.items.iter().filter(|t| t.enabled).count() as u64;
        let running_tasks = all.items.iter().filter(|t| t.status == TaskStatus::Running).count() as u64;

        let executions_today = self.execution_store.list(1, u32::MAX).await?;
        let completed_today = executions_today
            .items
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed && e.started_at.with_timezone(&self.timezone).date_naive() == today)
            .count() as u64;
        let failed_today = executions_today
            .items
            .iter()
            .filter(|e| e.status == ExecutionStatus::Failed && e.started_at.with_timezone(&self.timezone).date_naive() == today)
            .count() as u64;

        let durations: Vec<Duration> = executions_today
            .items
            .iter()
            .filter(|e| e.started_at.with_timezone(&self.timezone).date_naive() == today)
            .filter_map(|e| e.duration)
            .collect();
        let average_runtime_today = if durations.is_empty() {
            Duration::from_secs(0)
        } else {
            let total: Duration = durations.iter().sum();
            total / durations.len() as u32
        };

        let next_scheduled_run = all.items.iter().filter_map(|t| t.next_run).min();
        let status = self.engine.status();

        Ok(StatsDto {
            total_tasks: all.total,
            enabled_tasks,
            running_tasks,
            completed_today,
            failed_today,
            average_runtime_today,
            next_scheduled_run,
            worker_count: status.worker_count,
            queue_capacity: status.queue_capacity,
            running_executions: status.running_executions,
        })
    }
}


fn validate_config(kind: &crate::model::TaskKind, config: &TaskConfig) -> SchedulerResult<()> {
    use crate::model::TaskKind;
    let matches = matches!(
        (kind, config),
        (TaskKind::Http, TaskConfig::Http { .. })
            | (TaskKind::Function, TaskConfig::Function { .. })
            | (TaskKind::System, TaskConfig::System { .. })
            | (TaskKind::Custom, TaskConfig::Custom { .. })
    );
    if !matches {
        return Err(SchedulerError::Validation("task kind does not match its config variant".to_string()));
    }
    if let TaskConfig::Http { url, method, .. } = config {
        if url.trim().is_empty() {
            return Err(SchedulerError::Validation("http config requires a non-empty url".to_string()));
        }
        if method.trim().is_empty() {
            return Err(SchedulerError::Validation("http config requires a non-empty method".to_string()));
        }
    }
    if let TaskConfig::Function { function_name, .. } = config {
        if function_name.trim().is_empty() {
            return Err(SchedulerError::Validation("function config requires a non-empty function_name".to_string()));
        }
    }
    if let TaskConfig::System { task_name, .. } = config {
        if task_name.trim().is_empty() {
            return Err(SchedulerError::Validation("system config requires a non-empty task_name".to_string()));
        }
    }
    Ok(())
}

pub const DEFAULT_STALE_TIMEOUT_SECS: u64 = DEFAULT_STALE_TIMEOUT.as_secs();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::CronDispatcher;
    use crate::dto::CreateTaskRequest;
    use crate::executor::system::{SystemExecutor, SystemSubsystems};
    use crate::executor::{ExecutorRegistry, FunctionExecutor, HttpExecutor};
    use crate::lock::InMemoryLockService;
    use crate::model::{Priority, TaskKind};
    use crate::task_store::InMemoryTaskStore;
    use crate::{InMemoryExecutionStore, WorkerPool};
    use std::collections::HashMap;
    use structure_tracker::InMemoryStore as TrackerInMemoryStore;

    fn build_service(timezone: Tz) -> SchedulerService {
        let task_store = Arc::new(InMemoryTaskStore::new());
        let execution_store = Arc::new(InMemoryExecutionStore::new());
        let lock = Arc::new(InMemoryLockService::new());
        let executors = Arc::new(ExecutorRegistry::new(
            Arc::new(HttpExecutor::new()),
            Arc::new(FunctionExecutor::new()),
            Arc::new(SystemExecutor::new(SystemSubsystems::<TrackerInMemoryStore>::default())),
        ));
        let pool = Arc::new(WorkerPool::new(1, 10));
        let cron = Arc::new(CronDispatcher::with_timezone(timezone));
        let engine = Arc::new(Engine::new(task_store.clone(), execution_store.clone(), lock, executors, pool, cron));
        SchedulerService::with_timezone(task_store, execution_store, engine, Duration::from_secs(3600), Duration::from_secs(3600), timezone)
    }

    /// A task scheduled for "09:00 daily" gets a different `next_run`
    /// instant depending on the service's configured timezone.
    #[tokio::test]
    async fn create_task_next_run_honors_configured_timezone() {
        let utc_service = build_service(chrono_tz::UTC);
        let ny_service = build_service(chrono_tz::America::New_York);

        let request = || CreateTaskRequest {
            name: "daily-report".to_string(),
            description: String::new(),
            kind: TaskKind::Function,
            schedule: "0 0 9 * * *".to_string(),
            priority: Priority::Normal,
            enabled: true,
            config: TaskConfig::Function { function_name: "noop".to_string(), module: None, parameters: HashMap::new() },
            tags: vec![],
            max_retries: 0,
            retry_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            created_by: "tester".to_string(),
        };

        let utc_task = utc_service.create_task(request()).await.unwrap();
        let ny_task = ny_service.create_task(request()).await.unwrap();

        assert_ne!(utc_task.next_run, ny_task.next_run);
    }
}
