//! Postgres-backed [`ExecutionStore`] implementation.
//!
//! ```sql
//! CREATE TABLE task_executions (
//!     id TEXT PRIMARY KEY,
//!     task_id TEXT NOT NULL REFERENCES tasks(id),
//!     status TEXT NOT NULL,
//!     started_at TIMESTAMPTZ NOT NULL,
//!     completed_at TIMESTAMPTZ,
//!     duration_ns BIGINT,
//!     output TEXT NOT NULL DEFAULT '',
//!     error TEXT,
//!     retry_count INTEGER NOT NULL DEFAULT 0,
//!     worker_id TEXT,
//!     metadata JSONB NOT NULL DEFAULT '{}'
//! );
//!
//! CREATE INDEX idx_executions_task_id ON task_executions (task_id, started_at DESC);
//! CREATE INDEX idx_executions_status ON task_executions (status);
//! CREATE INDEX idx_executions_completed_at ON task_executions (completed_at);
//! ```

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::error::{SchedulerError, SchedulerResult};
use crate::execution_store::ExecutionStore;
use crate::model::{ExecutionId, ExecutionStatus, Page, TaskExecution, TaskId};

#[derive(Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
    }
}
fn parse_status(s: &str) -> ExecutionStatus {
    match s {
        "pending" => ExecutionStatus::Pending,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        _ => ExecutionStatus::Running,
    }
}

fn row_to_execution(row: &sqlx::postgres::PgRow) -> SchedulerResult<TaskExecution> {
    let status: String = row.try_get("status")?;
    let metadata_json: serde_json::Value = row.try_get("metadata")?;
    Ok(TaskExecution {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        status: parse_status(&status),
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        duration: row.try_get::<Option<i64>, _>("duration_ns")?.map(|n| Duration::from_nanos(n as u64)),
        output: row.try_get("output")?,
        error: row.try_get("error")?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        worker_id: row.try_get("worker_id")?,
        metadata: serde_json::from_value(metadata_json)?,
    })
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create(&self, execution: TaskExecution) -> SchedulerResult<TaskExecution> {
        let metadata_json = serde_json::to_value(&execution.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO task_executions (
                id, task_id, status, started_at, completed_at, duration_ns, output, error,
                retry_count, worker_id, metadata
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.task_id)
        .bind(status_str(execution.status))
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration.map(|d| d.as_nanos() as i64))
        .bind(&execution.output)
        .bind(&execution.error)
        .bind(execution.retry_count as i32)
        .bind(&execution.worker_id)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;
        Ok(execution)
    }

    async fn update(&self, execution: TaskExecution) -> SchedulerResult<TaskExecution> {
        let metadata_json = serde_json::to_value(&execution.metadata)?;
        let result = sqlx::query(
            r#"
            UPDATE task_executions SET
                status = $2, completed_at = $3, duration_ns = $4, output = $5, error = $6,
                retry_count = $7, worker_id = $8, metadata = $9
            WHERE id = $1
            "#,
        )
        .bind(&execution.id)
        .bind(status_str(execution.status))
        .bind(execution.completed_at)
        .bind(execution.duration.map(|d| d.as_nanos() as i64))
        .bind(&execution.output)
        .bind(&execution.error)
        .bind(execution.retry_count as i32)
        .bind(&execution.worker_id)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::NotFound(execution.id));
        }
        Ok(execution)
    }

    async fn get(&self, id: &ExecutionId) -> SchedulerResult<Option<TaskExecution>> {
        let row = sqlx::query("SELECT * FROM task_executions WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_execution).transpose()
    }

    async fn list_for_task(&self, task_id: &TaskId, page: u32, page_size: u32) -> SchedulerResult<Page<TaskExecution>> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS c FROM task_executions WHERE task_id = $1")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?
            .try_get("c")?;
        let offset = (page.saturating_sub(1) as i64) * page_size as i64;
        let rows = sqlx::query(
            "SELECT * FROM task_executions WHERE task_id = $1 ORDER BY started_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(task_id)
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let items = rows.iter().map(row_to_execution).collect::<SchedulerResult<Vec<_>>>()?;
        Ok(Page { items, total: total as u64, page, page_size })
    }

    async fn list(&self, page: u32, page_size: u32) -> SchedulerResult<Page<TaskExecution>> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS c FROM task_executions").fetch_one(&self.pool).await?.try_get("c")?;
        let offset = (page.saturating_sub(1) as i64) * page_size as i64;
        let rows = sqlx::query("SELECT * FROM task_executions ORDER BY started_at DESC LIMIT $1 OFFSET $2")
            .bind(page_size as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let items = rows.iter().map(row_to_execution).collect::<SchedulerResult<Vec<_>>>()?;
        Ok(Page { items, total: total as u64, page, page_size })
    }

    async fn cleanup(&self, retention: Duration) -> SchedulerResult<u64> {
        let result = sqlx::query(
            "DELETE FROM task_executions WHERE completed_at IS NOT NULL AND completed_at < NOW() - ($1 || ' seconds')::interval",
        )
        .bind(retention.as_secs() as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn sweep_stale_running(&self, max_age: Duration) -> SchedulerResult<Vec<ExecutionId>> {
        let rows = sqlx::query(
            r#"
            UPDATE task_executions
            SET status = 'failed',
                error = 'stale running task cleanup',
                completed_at = NOW(),
                duration_ns = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000000000)::bigint
            WHERE status = 'running' AND started_at < NOW() - ($1 || ' seconds')::interval
            RETURNING id
            "#,
        )
        .bind(max_age.as_secs() as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| r.try_get::<String, _>("id").map_err(SchedulerError::from)).collect()
    }
}
