//! Core data model: tasks, executions, and the handful of small value types
//! shared across the store, engine, and service layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Opaque task identifier. A UUID for user-created tasks; a stable
/// well-known string (e.g. `"system-eve-token-refresh"`) for system tasks.
pub type TaskId = String;

/// Opaque execution identifier.
pub type ExecutionId = String;

/// What kind of work a task performs; determines which executor runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Http,
    Function,
    System,
    Custom,
}

/// Scheduling priority. Currently advisory (the worker pool is FIFO per
/// queue slot); retained because the task record carries it end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    Disabled,
}

/// Where a task definition came from. System tasks are immutable through
/// the public API; api/import tasks are ordinary user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    System,
    Api,
    Import,
}

/// Kind-dependent configuration payload. A closed sum type, not a bag of
/// optional fields, so validation can be total over the variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskConfig {
    Http {
        url: String,
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<String>,
        #[serde(default = "default_expected_code")]
        expected_code: u16,
        #[serde(default)]
        timeout: Option<Duration>,
        #[serde(default = "default_true")]
        follow_redirect: bool,
        #[serde(default = "default_true")]
        validate_ssl: bool,
    },
    Function {
        function_name: String,
        #[serde(default)]
        module: Option<String>,
        #[serde(default)]
        parameters: HashMap<String, serde_json::Value>,
    },
    System {
        task_name: String,
        #[serde(default)]
        parameters: HashMap<String, serde_json::Value>,
    },
    Custom {
        #[serde(default)]
        parameters: HashMap<String, serde_json::Value>,
    },
}

fn default_true() -> bool {
    true
}

/// Default `expected_code` when the caller omits it; a literal `0`
/// is reserved to mean "any 2xx", so it is not a valid default on its own.
fn default_expected_code() -> u16 {
    200
}

/// Durable definition of scheduled work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub kind: TaskKind,
    /// 6-field cron expression (seconds field included).
    pub schedule: String,
    pub priority: Priority,
    pub enabled: bool,
    pub status: TaskStatus,
    pub config: TaskConfig,
    pub tags: Vec<String>,

    pub max_retries: u32,
    pub retry_interval: Duration,
    pub timeout: Duration,
    /// Immutable-from-API sentinel: never cleared once a task is seeded as
    /// a system task.
    pub is_system: bool,
    pub source: Source,
    pub version: u32,
    pub last_error: Option<String>,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_runs: u64,
    pub average_runtime: Duration,

    pub last_run: Option<DateTime<Utc>>,
    pub last_run_duration: Option<Duration>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_by: String,
}

impl Task {
    /// Whether this task is eligible for the dispatcher: enabled and not
    /// sitting in a paused/disabled state.
    pub fn is_active(&self) -> bool {
        self.enabled && !matches!(self.status, TaskStatus::Paused | TaskStatus::Disabled)
    }
}

/// Lifecycle state of a [`TaskExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One row per attempt to run a task's body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub output: String,
    pub error: Option<String>,
    pub retry_count: u32,
    pub worker_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Key under which a `stop_task` cancellation marker is recorded in
/// [`TaskExecution::metadata`].
pub const METADATA_STOP_REQUESTED: &str = "stop_requested";
/// Key under which the lock service token is recorded while an execution
/// holds its lease.
pub const METADATA_LOCK_TOKEN: &str = "lock_token";
/// Key marking an execution as having been created by a manual trigger
/// rather than a cron tick.
pub const METADATA_MANUAL_TRIGGER: &str = "manual_trigger";

impl TaskExecution {
    pub fn new(task_id: TaskId, lock_token: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(METADATA_LOCK_TOKEN.to_string(), lock_token.to_string());
        Self {
            id: Uuid::new_v4().to_string(),
            task_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration: None,
            output: String::new(),
            error: None,
            retry_count: 0,
            worker_id: None,
            metadata,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Result handed back by an [`crate::executor::Executor`] implementation.
/// The `success` flag is the single source of truth for Completed/Failed
/// mapping; the engine never inspects the output/error contents to decide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
    pub metadata: HashMap<String, String>,
}

/// Lease entry held in the lock service while an execution is in flight.
#[derive(Debug, Clone)]
pub struct Lease {
    pub key: String,
    pub token: String,
    pub ttl: Duration,
}

impl Lease {
    pub fn for_task(task_id: &TaskId) -> String {
        format!("scheduler:lock:{}", task_id)
    }
}

/// A page of results plus the total matching row count, for list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}
