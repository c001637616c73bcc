//! Distributed task scheduler: a durable task registry, cron-driven
//! dispatcher, bounded worker pool, distributed single-execution locking,
//! live cancellation, execution history, and a pluggable executor
//! registry with HTTP/function/system built-ins.

pub mod cron;
pub mod dto;
pub mod engine;
pub mod error;
pub mod execution_store;
pub mod executor;
pub mod lock;
pub mod metrics;
pub mod model;
pub mod pg_execution_store;
pub mod pg_task_store;
pub mod service;
pub mod system_tasks;
pub mod task_store;
pub mod worker_pool;

pub use engine::Engine;
pub use error::{SchedulerError, SchedulerResult};
pub use execution_store::{ExecutionStore, InMemoryExecutionStore};
pub use executor::{Executor, ExecutorRegistry};
pub use lock::{InMemoryLockService, LockService, RedisLockService};
pub use metrics::SchedulerMetrics;
pub use pg_execution_store::PgExecutionStore;
pub use pg_task_store::PgTaskStore;
pub use service::SchedulerService;
pub use task_store::{InMemoryTaskStore, TaskStore};
pub use worker_pool::WorkerPool;
