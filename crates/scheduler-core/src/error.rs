//! Error taxonomy for the scheduler: each variant documents what triggers
//! it and what the caller should do about it.

use crate::model::{ExecutionId, TaskId};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Malformed create/update request, bad cron expression, or missing
    /// kind-specific config. Never enqueued; surfaced as 400 by whatever
    /// transport wraps the service.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown task or execution id. Surfaced as 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Attempt to modify or delete an `is_system` task through the public
    /// surface. Surfaced as 403.
    #[error("cannot modify or delete system task: {0}")]
    Forbidden(TaskId),

    /// The task's lease is already held by another execution. For ticks:
    /// logged and dropped. For manual triggers: surfaced as 409.
    #[error("lease busy for task {0}")]
    LeaseBusy(TaskId),

    /// The worker queue was saturated at enqueue time. The execution is
    /// marked Failed and its lease released; the caller should not retry
    /// within the same tick.
    #[error("task queue is full")]
    QueueFull,

    /// The executor returned a non-success result. Recorded as Failed and
    /// counted toward `failure_count`.
    #[error("executor error: {0}")]
    Executor(String),

    /// The per-execution deadline elapsed before the executor returned.
    #[error("task execution timed out")]
    Timeout,

    /// `stop_task` cancelled a running execution.
    #[error("task execution was cancelled")]
    Cancelled,

    /// An execution sat in Running past the stale-timeout without a
    /// writeback and was swept to Failed by maintenance.
    #[error("stale running execution swept: {0}")]
    Stale(ExecutionId),

    /// The daily retry budget tracked by the structure-access tracker is
    /// exhausted; `pick_retries` returns an empty list rather than this
    /// error, but the system task surfaces it when asked to force a retry.
    #[error("daily retry budget exhausted")]
    BudgetExhausted,

    /// Underlying durable store I/O failure (Postgres). Surfaced to the
    /// caller untouched; the next tick or maintenance pass is the recovery
    /// path, not a local retry.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Lock service / structure-tracker backing store failure (Redis).
    #[error("lock service error: {0}")]
    Lock(#[from] redis::RedisError),

    /// Cron expression failed to parse.
    #[error("invalid cron expression: {0}")]
    Cron(#[from] cron::error::Error),

    /// HTTP executor transport failure (distinct from a non-2xx response,
    /// which is a normal `Executor` failure, not a transport error).
    #[error("http executor transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure for a config payload or DTO.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything that should structurally never happen (a Prometheus
    /// metric descriptor rejected at registration time, a UTF-8 failure
    /// decoding an exposition buffer). Not part of the task/execution
    /// control flow, so no caller branches on it.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
