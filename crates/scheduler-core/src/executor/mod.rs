//! Pluggable executor registry. Every task kind runs through the same
//! [`Executor`] trait so the worker pool never branches on `TaskKind`.

pub mod function;
pub mod http;
pub mod registry;
pub mod system;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerResult;
use crate::model::{Task, TaskResult};

/// Context handed to an executor for a single execution: the cancellation
/// token to honor and the deadline already encoded in `task.timeout`.
#[derive(Clone)]
pub struct ExecutionContext {
    pub cancel: CancellationToken,
}

/// Uniform interface every task kind runs through.
///
/// Implementations should poll `ctx.cancel` (or pass it down into any
/// cancellable I/O, e.g. `tokio::select!` against `cancel.cancelled()`)
/// rather than ignoring it; the worker pool enforces the timeout
/// externally but relies on the executor to actually stop work promptly
/// on `stop_task`.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, ctx: ExecutionContext, task: &Task) -> SchedulerResult<TaskResult>;
}

pub use function::FunctionExecutor;
pub use http::HttpExecutor;
pub use registry::ExecutorRegistry;
pub use system::SystemExecutor;
