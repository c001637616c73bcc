//! Wire-shape types for the `/scheduler/*` surface. The HTTP framework
//! itself is external; these are the payloads a router would deserialize
//! into and serialize out of.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::model::{
    ExecutionId, ExecutionStatus, Page, Priority, Task, TaskConfig, TaskExecution, TaskId, TaskKind, TaskStatus,
};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: TaskKind,
    pub schedule: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub config: TaskConfig,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    pub created_by: String,
}

fn default_enabled() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateTaskRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule: Option<String>,
    pub priority: Option<Priority>,
    pub enabled: Option<bool>,
    pub config: Option<TaskConfig>,
    pub tags: Option<Vec<String>>,
    pub max_retries: Option<u32>,
    #[serde(default, with = "humantime_serde::option")]
    pub retry_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    pub updated_by: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskFilterRequest {
    pub status: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
    pub enabled: Option<bool>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}
fn default_page_size() -> u32 {
    20
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: default_page(), page_size: default_page_size() }
    }
}

/// Durations are serialized as human-readable strings (`"5m"`, `"1h"`) on
/// this external surface rather than raw nanosecond counts, per the
/// design note on durations at system boundaries.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDto {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub kind: TaskKind,
    pub schedule: String,
    pub priority: Priority,
    pub enabled: bool,
    pub status: TaskStatus,
    pub config: TaskConfig,
    pub tags: Vec<String>,
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub is_system: bool,
    pub version: u32,
    pub last_error: Option<String>,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_runs: u64,
    #[serde(with = "humantime_serde")]
    pub average_runtime: Duration,
    pub last_run: Option<chrono::DateTime<chrono::Utc>>,
    pub next_run: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Task> for TaskDto {
    fn from(t: Task) -> Self {
        Self {
            id: t.id,
            name: t.name,
            description: t.description,
            kind: t.kind,
            schedule: t.schedule,
            priority: t.priority,
            enabled: t.enabled,
            status: t.status,
            config: t.config,
            tags: t.tags,
            max_retries: t.max_retries,
            retry_interval: t.retry_interval,
            timeout: t.timeout,
            is_system: t.is_system,
            version: t.version,
            last_error: t.last_error,
            success_count: t.success_count,
            failure_count: t.failure_count,
            total_runs: t.total_runs,
            average_runtime: t.average_runtime,
            last_run: t.last_run,
            next_run: t.next_run,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionDto {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, with = "humantime_serde::option")]
    pub duration: Option<Duration>,
    pub output: String,
    pub error: Option<String>,
    pub retry_count: u32,
    pub metadata: HashMap<String, String>,
}

impl From<TaskExecution> for ExecutionDto {
    fn from(e: TaskExecution) -> Self {
        Self {
            id: e.id,
            task_id: e.task_id,
            status: e.status,
            started_at: e.started_at,
            completed_at: e.completed_at,
            duration: e.duration,
            output: e.output,
            error: e.error,
            retry_count: e.retry_count,
            metadata: e.metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageDto<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T, U: From<T>> From<Page<T>> for PageDto<U> {
    fn from(p: Page<T>) -> Self {
        Self { items: p.items.into_iter().map(U::from).collect(), total: p.total, page: p.page, page_size: p.page_size }
    }
}

/// Aggregates computed by [`crate::service::SchedulerService::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct StatsDto {
    pub total_tasks: u64,
    pub enabled_tasks: u64,
    pub running_tasks: u64,
    pub completed_today: u64,
    pub failed_today: u64,
    #[serde(with = "humantime_serde")]
    pub average_runtime_today: Duration,
    pub next_scheduled_run: Option<chrono::DateTime<chrono::Utc>>,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub running_executions: usize,
}
