//! Maps a [`crate::model::TaskKind`] to the `Executor` that runs it, with
//! room for `Custom` tasks to register their own handler by name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{Task, TaskConfig, TaskKind, TaskResult};

use super::{ExecutionContext, Executor};

pub struct ExecutorRegistry {
    http: Arc<dyn Executor>,
    function: Arc<dyn Executor>,
    system: Arc<dyn Executor>,
    custom: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new(http: Arc<dyn Executor>, function: Arc<dyn Executor>, system: Arc<dyn Executor>) -> Self {
        Self { http, function, system, custom: HashMap::new() }
    }

    /// Registers an executor for a named custom kind. `TaskConfig::Custom`
    /// carries no discriminant of its own beyond `parameters`, so custom
    /// dispatch keys off a `"handler"` parameter rather than `task.kind`.
    pub fn register_custom(&mut self, handler_name: impl Into<String>, executor: Arc<dyn Executor>) {
        self.custom.insert(handler_name.into(), executor);
    }

    pub async fn dispatch(&self, ctx: ExecutionContext, task: &Task) -> SchedulerResult<TaskResult> {
        match task.kind {
            TaskKind::Http => self.http.execute(ctx, task).await,
            TaskKind::Function => self.function.execute(ctx, task).await,
            TaskKind::System => self.system.execute(ctx, task).await,
            TaskKind::Custom => {
                let TaskConfig::Custom { parameters } = &task.config else {
                    return Err(SchedulerError::Executor("custom task missing custom config".into()));
                };
                let handler_name = parameters
                    .get("handler")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| SchedulerError::Executor("custom task missing 'handler' parameter".into()))?;
                let executor = self
                    .custom
                    .get(handler_name)
                    .ok_or_else(|| SchedulerError::Executor(format!("no custom executor registered for '{}'", handler_name)))?;
                executor.execute(ctx, task).await
            }
        }
    }
}
