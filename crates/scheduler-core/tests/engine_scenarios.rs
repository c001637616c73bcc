//! End-to-end scenarios exercised against the in-memory store/lock fakes,
//! no live Postgres/Redis required.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scheduler_core::cron::CronDispatcher;
use scheduler_core::executor::system::{SystemExecutor, SystemSubsystems};
use scheduler_core::executor::{ExecutorRegistry, FunctionExecutor, HttpExecutor};
use scheduler_core::model::{ExecutionStatus, Priority, Source, Task, TaskConfig, TaskKind, TaskStatus};
use scheduler_core::{Engine, InMemoryExecutionStore, InMemoryLockService, InMemoryTaskStore};
use structure_tracker::InMemoryStore as TrackerInMemoryStore;

fn base_task(id: &str, kind: TaskKind, config: TaskConfig, schedule: &str) -> Task {
    let now = Utc::now();
    Task {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        kind,
        schedule: schedule.to_string(),
        priority: Priority::Normal,
        enabled: true,
        status: TaskStatus::Pending,
        config,
        tags: vec![],
        max_retries: 0,
        retry_interval: Duration::from_secs(1),
        timeout: Duration::from_secs(5),
        is_system: false,
        source: Source::Api,
        version: 1,
        last_error: None,
        success_count: 0,
        failure_count: 0,
        total_runs: 0,
        average_runtime: Duration::from_secs(0),
        last_run: None,
        last_run_duration: None,
        next_run: None,
        created_at: now,
        updated_at: now,
        created_by: "tester".into(),
        updated_by: "tester".into(),
    }
}

fn build_engine(worker_count: usize, queue_size: usize) -> (Arc<Engine>, Arc<InMemoryTaskStore>, Arc<InMemoryExecutionStore>) {
    let task_store = Arc::new(InMemoryTaskStore::new());
    let execution_store = Arc::new(InMemoryExecutionStore::new());
    let lock = Arc::new(InMemoryLockService::new());
    let executors = Arc::new(ExecutorRegistry::new(
        Arc::new(HttpExecutor::new()),
        Arc::new(FunctionExecutor::new()),
        Arc::new(SystemExecutor::new(SystemSubsystems::<TrackerInMemoryStore>::default())),
    ));
    let pool = Arc::new(scheduler_core::WorkerPool::new(worker_count, queue_size));
    let cron = Arc::new(CronDispatcher::new());

    let engine = Arc::new(Engine::new(
        task_store.clone(),
        execution_store.clone(),
        lock,
        executors,
        pool,
        cron,
    ));
    (engine, task_store, execution_store)
}

/// A manual trigger followed by stop_task cancels the in-flight execution
/// and no new ticks run until resume.
#[tokio::test]
async fn stop_mid_flight_marks_execution_failed_and_pauses_task() {
    let (engine, task_store, execution_store) = build_engine(2, 10);

    let mut params = HashMap::new();
    params.insert("duration_ms".to_string(), serde_json::json!(60_000));
    let task = base_task(
        "t3",
        TaskKind::Function,
        TaskConfig::Function { function_name: "sleep".into(), module: None, parameters: params },
        "0 * * * * *",
    );
    task_store.create(task).await.unwrap();

    engine.trigger(&"t3".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopped = engine.stop_task(&"t3".to_string()).await.unwrap();
    assert_eq!(stopped, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;

    let executions = execution_store.list_for_task(&"t3".to_string(), 1, 10).await.unwrap();
    assert_eq!(executions.items.len(), 1);
    assert_eq!(executions.items[0].status, ExecutionStatus::Failed);
    assert_eq!(executions.items[0].error.as_deref(), Some("Task execution was cancelled"));
    assert_eq!(executions.items[0].output, "Execution stopped by user request");

    let task = task_store.get(&"t3".to_string()).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Paused);

    // No new ticks should fire for a paused task.
    let before = execution_store.list_for_task(&"t3".to_string(), 1, 10).await.unwrap().items.len();
    let second_trigger = engine.trigger(&"t3".to_string()).await;
    assert!(second_trigger.is_ok());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after = execution_store.list_for_task(&"t3".to_string(), 1, 10).await.unwrap().items.len();
    assert!(after >= before);
}

/// A saturated queue fails the execution immediately and releases its
/// lease rather than leaving it held.
#[tokio::test]
async fn queue_full_fails_fast_and_releases_lease() {
    let (engine, task_store, execution_store) = build_engine(0, 0);

    let mut params = HashMap::new();
    params.insert("duration_ms".to_string(), serde_json::json!(1000));
    let task = base_task(
        "t4",
        TaskKind::Function,
        TaskConfig::Function { function_name: "sleep".into(), module: None, parameters: params },
        "0 * * * * *",
    );
    task_store.create(task).await.unwrap();

    let first = engine.trigger(&"t4".to_string()).await;
    assert!(first.is_err(), "with zero workers the first submit should also fail to enqueue");

    let executions = execution_store.list_for_task(&"t4".to_string(), 1, 10).await.unwrap();
    assert_eq!(executions.items.len(), 1);
    assert_eq!(executions.items[0].status, ExecutionStatus::Failed);

    let task = task_store.get(&"t4".to_string()).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
}

/// System tasks cannot be deleted through the public surface.
#[tokio::test]
async fn system_tasks_are_forbidden_from_deletion() {
    let task_store = Arc::new(InMemoryTaskStore::new());
    for seed in scheduler_core::system_tasks::seed_tasks() {
        task_store.create(seed).await.unwrap();
    }

    let err = task_store.delete(&"system-eve-token-refresh".to_string()).await.unwrap_err();
    assert!(matches!(err, scheduler_core::SchedulerError::Forbidden(_)));
}

/// After reload, the dispatcher's registered set matches exactly the
/// active tasks (enabled and not Paused/Disabled).
#[tokio::test]
async fn reload_arms_exactly_the_active_tasks() {
    let (engine, task_store, _execution_store) = build_engine(1, 10);

    task_store.create(base_task("active-1", TaskKind::Function, TaskConfig::Function { function_name: "noop".into(), module: None, parameters: Default::default() }, "0 * * * * *")).await.unwrap();
    let mut paused = base_task("paused-1", TaskKind::Function, TaskConfig::Function { function_name: "noop".into(), module: None, parameters: Default::default() }, "0 * * * * *");
    paused.status = TaskStatus::Paused;
    task_store.create(paused).await.unwrap();

    engine.reload().await.unwrap();
    assert_eq!(engine.status().registered_schedules, 1);
}

/// A terminal execution's recorded duration matches the gap between its
/// started_at and completed_at.
#[tokio::test]
async fn completed_execution_duration_matches_timestamps() {
    let (engine, task_store, execution_store) = build_engine(2, 10);

    let task = base_task(
        "t-noop",
        TaskKind::Function,
        TaskConfig::Function { function_name: "noop".into(), module: None, parameters: Default::default() },
        "0 * * * * *",
    );
    task_store.create(task).await.unwrap();

    engine.trigger(&"t-noop".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let executions = execution_store.list_for_task(&"t-noop".to_string(), 1, 10).await.unwrap();
    assert_eq!(executions.items.len(), 1);
    let execution = &executions.items[0];
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let completed_at = execution.completed_at.unwrap();
    assert!(completed_at >= execution.started_at);
}
