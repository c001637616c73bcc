//! Postgres-backed [`TaskStore`] implementation.
//!
//! Schema (see also `pg_execution_store` for the sibling table):
//!
//! ```sql
//! CREATE TABLE tasks (
//!     id TEXT PRIMARY KEY,
//!     name TEXT NOT NULL,
//!     description TEXT NOT NULL DEFAULT '',
//!     kind TEXT NOT NULL,
//!     schedule TEXT NOT NULL,
//!     priority TEXT NOT NULL,
//!     enabled BOOLEAN NOT NULL DEFAULT TRUE,
//!     status TEXT NOT NULL,
//!     config JSONB NOT NULL,
//!     tags TEXT[] NOT NULL DEFAULT '{}',
//!     max_retries INTEGER NOT NULL,
//!     retry_interval_ns BIGINT NOT NULL,
//!     timeout_ns BIGINT NOT NULL,
//!     is_system BOOLEAN NOT NULL DEFAULT FALSE,
//!     source TEXT NOT NULL,
//!     version INTEGER NOT NULL DEFAULT 1,
//!     last_error TEXT,
//!     success_count BIGINT NOT NULL DEFAULT 0,
//!     failure_count BIGINT NOT NULL DEFAULT 0,
//!     total_runs BIGINT NOT NULL DEFAULT 0,
//!     average_runtime_ns BIGINT NOT NULL DEFAULT 0,
//!     last_run TIMESTAMPTZ,
//!     last_run_duration_ns BIGINT,
//!     next_run TIMESTAMPTZ,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     created_by TEXT NOT NULL DEFAULT '',
//!     updated_by TEXT NOT NULL DEFAULT ''
//! );
//!
//! CREATE INDEX idx_tasks_enabled_status ON tasks (enabled, status);
//! CREATE INDEX idx_tasks_next_run ON tasks (next_run);
//! CREATE INDEX idx_tasks_is_system ON tasks (is_system);
//! CREATE INDEX idx_tasks_tags ON tasks USING GIN (tags);
//! CREATE INDEX idx_tasks_updated_at ON tasks (updated_at DESC);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::*;
use crate::task_store::{TaskFilter, TaskStore};

/// Production `TaskStore` backed by a `sqlx::PgPool`.
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_task(row: &sqlx::postgres::PgRow) -> SchedulerResult<Task> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    let source: String = row.try_get("source")?;
    let config_json: serde_json::Value = row.try_get("config")?;

    Ok(Task {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        kind: parse_kind(&kind),
        schedule: row.try_get("schedule")?,
        priority: parse_priority(&priority),
        enabled: row.try_get("enabled")?,
        status: parse_status(&status),
        config: serde_json::from_value(config_json)?,
        tags: row.try_get::<Vec<String>, _>("tags")?,
        max_retries: row.try_get::<i32, _>("max_retries")? as u32,
        retry_interval: Duration::from_nanos(row.try_get::<i64, _>("retry_interval_ns")? as u64),
        timeout: Duration::from_nanos(row.try_get::<i64, _>("timeout_ns")? as u64),
        is_system: row.try_get("is_system")?,
        source: parse_source(&source),
        version: row.try_get::<i32, _>("version")? as u32,
        last_error: row.try_get("last_error")?,
        success_count: row.try_get::<i64, _>("success_count")? as u64,
        failure_count: row.try_get::<i64, _>("failure_count")? as u64,
        total_runs: row.try_get::<i64, _>("total_runs")? as u64,
        average_runtime: Duration::from_nanos(row.try_get::<i64, _>("average_runtime_ns")? as u64),
        last_run: row.try_get("last_run")?,
        last_run_duration: row
            .try_get::<Option<i64>, _>("last_run_duration_ns")?
            .map(|n| Duration::from_nanos(n as u64)),
        next_run: row.try_get("next_run")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        created_by: row.try_get("created_by")?,
        updated_by: row.try_get("updated_by")?,
    })
}

fn kind_str(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Http => "http",
        TaskKind::Function => "function",
        TaskKind::System => "system",
        TaskKind::Custom => "custom",
    }
}
fn parse_kind(s: &str) -> TaskKind {
    match s {
        "http" => TaskKind::Http,
        "function" => TaskKind::Function,
        "system" => TaskKind::System,
        _ => TaskKind::Custom,
    }
}
fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Paused => "paused",
        TaskStatus::Disabled => "disabled",
    }
}
fn parse_status(s: &str) -> TaskStatus {
    match s {
        "running" => TaskStatus::Running,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "paused" => TaskStatus::Paused,
        "disabled" => TaskStatus::Disabled,
        _ => TaskStatus::Pending,
    }
}
fn priority_str(p: Priority) -> &'static str {
    match p {
        Priority::Low => "low",
        Priority::Normal => "normal",
        Priority::High => "high",
        Priority::Critical => "critical",
    }
}
fn parse_priority(s: &str) -> Priority {
    match s {
        "low" => Priority::Low,
        "high" => Priority::High,
        "critical" => Priority::Critical,
        _ => Priority::Normal,
    }
}
fn source_str(s: Source) -> &'static str {
    match s {
        Source::System => "system",
        Source::Api => "api",
        Source::Import => "import",
    }
}
fn parse_source(s: &str) -> Source {
    match s {
        "system" => Source::System,
        "import" => Source::Import,
        _ => Source::Api,
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, task: Task) -> SchedulerResult<Task> {
        let config_json = serde_json::to_value(&task.config)?;
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, name, description, kind, schedule, priority, enabled, status, config, tags,
                max_retries, retry_interval_ns, timeout_ns, is_system, source, version,
                last_error, success_count, failure_count, total_runs, average_runtime_ns,
                last_run, last_run_duration_ns, next_run, created_at, updated_at, created_by, updated_by
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24,$25,$26,$27,$28)
            "#,
        )
        .bind(&task.id)
        .bind(&task.name)
        .bind(&task.description)
        .bind(kind_str(task.kind))
        .bind(&task.schedule)
        .bind(priority_str(task.priority))
        .bind(task.enabled)
        .bind(status_str(task.status))
        .bind(config_json)
        .bind(&task.tags)
        .bind(task.max_retries as i32)
        .bind(task.retry_interval.as_nanos() as i64)
        .bind(task.timeout.as_nanos() as i64)
        .bind(task.is_system)
        .bind(source_str(task.source))
        .bind(task.version as i32)
        .bind(&task.last_error)
        .bind(task.success_count as i64)
        .bind(task.failure_count as i64)
        .bind(task.total_runs as i64)
        .bind(task.average_runtime.as_nanos() as i64)
        .bind(task.last_run)
        .bind(task.last_run_duration.map(|d| d.as_nanos() as i64))
        .bind(task.next_run)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(&task.created_by)
        .bind(&task.updated_by)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.constraint().is_some() => {
                SchedulerError::Validation(format!("task id already exists: {}", task.id))
            }
            other => SchedulerError::Store(other),
        })?;
        Ok(task)
    }

    async fn get(&self, id: &TaskId) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn update(&self, task: Task) -> SchedulerResult<Task> {
        let config_json = serde_json::to_value(&task.config)?;
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                name = $2, description = $3, kind = $4, schedule = $5, priority = $6, enabled = $7,
                status = $8, config = $9, tags = $10, max_retries = $11, retry_interval_ns = $12,
                timeout_ns = $13, source = $14, version = version + 1, last_error = $15,
                next_run = $16, updated_at = $17, updated_by = $18
            WHERE id = $1
            "#,
        )
        .bind(&task.id)
        .bind(&task.name)
        .bind(&task.description)
        .bind(kind_str(task.kind))
        .bind(&task.schedule)
        .bind(priority_str(task.priority))
        .bind(task.enabled)
        .bind(status_str(task.status))
        .bind(config_json)
        .bind(&task.tags)
        .bind(task.max_retries as i32)
        .bind(task.retry_interval.as_nanos() as i64)
        .bind(task.timeout.as_nanos() as i64)
        .bind(source_str(task.source))
        .bind(&task.last_error)
        .bind(task.next_run)
        .bind(Utc::now())
        .bind(&task.updated_by)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::NotFound(task.id));
        }
        self.get(&task.id).await?.ok_or(SchedulerError::NotFound(task.id))
    }

    async fn delete(&self, id: &TaskId) -> SchedulerResult<()> {
        let task = self.get(id).await?.ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        if task.is_system {
            return Err(SchedulerError::Forbidden(id.clone()));
        }
        sqlx::query("DELETE FROM tasks WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn list(&self, filter: TaskFilter, page: u32, page_size: u32) -> SchedulerResult<Page<Task>> {
        // Filtering is applied in-process after a bounded fetch; a
        // production deployment would push status/kind/enabled/tags down
        // into the WHERE clause, but the shape is identical either way.
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY updated_at DESC").fetch_all(&self.pool).await?;
        let mut matching = Vec::new();
        for row in &rows {
            let task = row_to_task(row)?;
            if filter_matches(&filter, &task) {
                matching.push(task);
            }
        }
        let total = matching.len() as u64;
        let start = (page.saturating_sub(1) as usize) * page_size as usize;
        let items = matching.into_iter().skip(start).take(page_size as usize).collect();
        Ok(Page { items, total, page, page_size })
    }

    async fn get_active(&self) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE enabled = TRUE AND status NOT IN ('paused', 'disabled')",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn update_status(&self, id: &TaskId, status: TaskStatus) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE tasks SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status_str(status))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn update_run(
        &self,
        id: &TaskId,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET last_run = COALESCE($2, last_run), next_run = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(last_run)
        .bind(next_run)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::NotFound(id.clone()));
        }
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
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT success_count, average_runtime_ns FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;

        let pre_success_count: i64 = row.try_get("success_count")?;
        let pre_avg_ns: i64 = row.try_get("average_runtime_ns")?;

        let new_avg_ns = if success {
            if let Some(d) = duration {
                let avg = pre_avg_ns as f64;
                let n = pre_success_count as f64;
                ((avg * n + d.as_nanos() as f64) / (n + 1.0)) as i64
            } else {
                pre_avg_ns
            }
        } else {
            pre_avg_ns
        };

        sqlx::query(
            r#"
            UPDATE tasks SET
                last_run = $2,
                last_run_duration_ns = $3,
                next_run = $4,
                total_runs = total_runs + 1,
                success_count = success_count + $5,
                failure_count = failure_count + $6,
                average_runtime_ns = $7,
                last_error = CASE WHEN $5 = 1 THEN NULL ELSE $8 END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(last_run)
        .bind(duration.map(|d| d.as_nanos() as i64))
        .bind(next_run)
        .bind(if success { 1i64 } else { 0i64 })
        .bind(if success { 0i64 } else { 1i64 })
        .bind(new_avg_ns)
        .bind(&error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn handle_stale_running(&self, max_age: Duration) -> SchedulerResult<Vec<TaskId>> {
        let rows = sqlx::query(
            r#"
            UPDATE tasks SET status = 'failed', last_error = 'stale timeout', updated_at = NOW()
            WHERE status = 'running' AND updated_at < NOW() - ($1 || ' seconds')::interval
            RETURNING id
            "#,
        )
        .bind(max_age.as_secs() as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| r.try_get::<String, _>("id").map_err(SchedulerError::from)).collect()
    }
}

fn filter_matches(filter: &TaskFilter, task: &Task) -> bool {
    if let Some(status) = filter.status {
        if task.status != status {
            return false;
        }
    }
    if let Some(kind) = filter.kind {
        if task.kind != kind {
            return false;
        }
    }
    if let Some(enabled) = filter.enabled {
        if task.enabled != enabled {
            return false;
        }
    }
    if !filter.tags.is_empty() && !filter.tags.iter().any(|t| task.tags.contains(t)) {
        return false;
    }
    true
}
