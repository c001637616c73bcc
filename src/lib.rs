//! Falcon Scheduler - distributed task scheduler for the game-infrastructure
//! backend.
//!
//! This crate wires the [`scheduler_core`] engine/service and the
//! [`structure_tracker`] retry engine onto real Postgres/Redis backends and
//! exposes the process-level bootstrap consumed by `src/bin/scheduler_service.rs`.

pub mod config;

use std::sync::Arc;

use redis::Client;
use scheduler_core::executor::system::SystemSubsystems;
use scheduler_core::executor::{ExecutorRegistry, FunctionExecutor, HttpExecutor, SystemExecutor};
use scheduler_core::{
    Engine, InMemoryExecutionStore, InMemoryLockService, InMemoryTaskStore, PgExecutionStore, PgTaskStore,
    RedisLockService, SchedulerService,
};
use sqlx::postgres::PgPoolOptions;
use structure_tracker::store::RedisStore;
use structure_tracker::StructureAccessTracker;

pub use config::SchedulerProcessConfig;

/// Everything a running process holds: the scheduler service plus the
/// process config it was built from.
pub struct Platform {
    pub config: SchedulerProcessConfig,
    pub service: Arc<SchedulerService>,
}

/// Builds a [`Platform`] wired to real Postgres/Redis backends. Falls back
/// to in-memory stores and an in-process lock service if a connection
/// string can't be reached, so a developer without local Postgres/Redis
/// can still run the binary against synthetic state; every fallback is
/// logged loudly rather than taken silently.
pub async fn init_platform(config: SchedulerProcessConfig) -> Result<Platform, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(&config.log_level).init();
    tracing::info!("starting falcon-scheduler platform");

    let (task_store, execution_store): (Arc<dyn scheduler_core::TaskStore>, Arc<dyn scheduler_core::ExecutionStore>) =
        match PgPoolOptions::new().max_connections(10).connect(&config.database_url).await {
            Ok(pool) => {
                tracing::info!("connected to postgres task/execution store");
                (Arc::new(PgTaskStore::new(pool.clone())), Arc::new(PgExecutionStore::new(pool)))
            }
            Err(e) => {
                tracing::warn!(error = %e, "falling back to in-memory task/execution store");
                (Arc::new(InMemoryTaskStore::new()), Arc::new(InMemoryExecutionStore::new()))
            }
        };

    let lock: Arc<dyn scheduler_core::LockService> = match Client::open(config.redis_url.as_str()) {
        Ok(client) => match client.get_connection_manager().await {
            Ok(conn) => {
                tracing::info!("connected to redis lock service");
                Arc::new(RedisLockService::new(conn))
            }
            Err(e) => {
                tracing::warn!(error = %e, "falling back to in-memory lock service");
                Arc::new(InMemoryLockService::new())
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "falling back to in-memory lock service");
            Arc::new(InMemoryLockService::new())
        }
    };

    let tracker = match RedisStore::connect(&config.redis_url).await {
        Ok(store) => {
            tracing::info!("connected to redis structure-access tracker store");
            Some(Arc::new(StructureAccessTracker::new(Arc::new(store))))
        }
        Err(e) => {
            tracing::warn!(error = %e, "structure-access tracker has no backing store; structure_access_retry system task will be unavailable");
            None
        }
    };

    let executors = Arc::new(ExecutorRegistry::new(
        Arc::new(HttpExecutor::new()),
        Arc::new(FunctionExecutor::new()),
        Arc::new(SystemExecutor::new(SystemSubsystems { structure_tracker: tracker, ..Default::default() })),
    ));

    let timezone: chrono_tz::Tz = config.timezone.parse().unwrap_or_else(|_| {
        tracing::warn!(timezone = %config.timezone, "unrecognized SCHEDULER_TIMEZONE, falling back to UTC");
        chrono_tz::UTC
    });

    let pool = Arc::new(scheduler_core::WorkerPool::new(config.worker_count, config.queue_size));
    let cron = Arc::new(scheduler_core::cron::CronDispatcher::with_timezone(timezone));
    let engine = Arc::new(Engine::new(task_store.clone(), execution_store.clone(), lock, executors, pool, cron));
    let service = Arc::new(SchedulerService::with_timezone(
        task_store,
        execution_store,
        engine,
        config.stale_timeout,
        config.cleanup_interval,
        timezone,
    ));

    Ok(Platform { config, service })
}

impl Platform {
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.service.start().await?;
        tracing::info!(
            worker_count = self.config.worker_count,
            queue_size = self.config.queue_size,
            "falcon-scheduler platform started successfully"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn init_platform_falls_back_without_live_backends() {
        let config = SchedulerProcessConfig {
            database_url: "postgres://nonexistent-host-for-tests/falcon".to_string(),
            redis_url: "redis://nonexistent-host-for-tests:6379".to_string(),
            log_level: "error".to_string(),
            timezone: "UTC".to_string(),
            worker_count: 2,
            queue_size: 10,
            cleanup_interval: Duration::from_secs(3600),
            stale_timeout: Duration::from_secs(3600),
        };

        let platform = init_platform(config).await;
        assert!(platform.is_ok());
    }
}
