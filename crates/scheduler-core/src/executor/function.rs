//! Function executor: runs a task whose config is
//! [`crate::model::TaskConfig::Function`] against a small built-in table.
//! `module` is accepted but unused by the built-ins; it exists so a future
//! in-process plugin loader has somewhere to look without a config change.

use async_trait::async_trait;
use std::time::Instant;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{Task, TaskConfig, TaskResult};

use super::{ExecutionContext, Executor};

pub struct FunctionExecutor;

impl FunctionExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FunctionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for FunctionExecutor {
    async fn execute(&self, ctx: ExecutionContext, task: &Task) -> SchedulerResult<TaskResult> {
        let TaskConfig::Function { function_name, parameters, .. } = &task.config else {
            return Err(SchedulerError::Executor("function executor received non-function config".into()));
        };

        let started = Instant::now();
        match function_name.as_str() {
            "noop" => Ok(TaskResult {
                success: true,
                output: String::new(),
                error: None,
                duration: started.elapsed(),
                metadata: Default::default(),
            }),
            "echo" => Ok(TaskResult {
                success: true,
                output: serde_json::to_string(parameters).unwrap_or_default(),
                error: None,
                duration: started.elapsed(),
                metadata: Default::default(),
            }),
            "sleep" => {
                let duration_ms = parameters
                    .get("duration_ms")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                let sleep_duration = std::time::Duration::from_millis(duration_ms);

                tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(SchedulerError::Cancelled),
                    _ = tokio::time::sleep(sleep_duration) => Ok(TaskResult {
                        success: true,
                        output: format!("slept {}ms", duration_ms),
                        error: None,
                        duration: started.elapsed(),
                        metadata: Default::default(),
                    }),
                }
            }
            other => Err(SchedulerError::Executor(format!("unknown function: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, Source, TaskKind, TaskStatus};
    use chrono::Utc;
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;

    fn task_with(function_name: &str, parameters: HashMap<String, serde_json::Value>) -> Task {
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
            config: TaskConfig::Function { function_name: function_name.into(), module: None, parameters },
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
    async fn noop_succeeds_immediately() {
        let executor = FunctionExecutor::new();
        let task = task_with("noop", Default::default());
        let result = executor.execute(ExecutionContext { cancel: CancellationToken::new() }, &task).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn unknown_function_fails_without_panicking() {
        let executor = FunctionExecutor::new();
        let task = task_with("does_not_exist", Default::default());
        let err = executor.execute(ExecutionContext { cancel: CancellationToken::new() }, &task).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Executor(_)));
    }

    #[tokio::test]
    async fn sleep_honors_cancellation() {
        let executor = FunctionExecutor::new();
        let mut params = HashMap::new();
        params.insert("duration_ms".to_string(), serde_json::json!(60_000));
        let task = task_with("sleep", params);

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });

        let err = executor.execute(ExecutionContext { cancel }, &task).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Cancelled));
    }
}
