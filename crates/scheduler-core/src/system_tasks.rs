//! The well-known system tasks seeded on startup. Reconciliation touches
//! only `schedule`/`kind`/`config`, never `name`/`description`/`priority`/
//! operator-set metadata, so an operator's edits to those fields survive
//! restarts.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

use crate::model::{Priority, Source, Task, TaskConfig, TaskKind, TaskStatus};

struct SeedRow {
    id: &'static str,
    name: &'static str,
    schedule: &'static str,
    task_name: &'static str,
    timeout: Duration,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const LONG_TIMEOUT: Duration = Duration::from_secs(15 * 60);

fn seed_rows() -> Vec<SeedRow> {
    vec![
        SeedRow { id: "system-eve-token-refresh", name: "EVE token refresh", schedule: "0 */15 * * * *", task_name: "token_refresh", timeout: DEFAULT_TIMEOUT },
        SeedRow { id: "system-state-cleanup", name: "State cleanup", schedule: "0 0 */2 * * *", task_name: "state_cleanup", timeout: DEFAULT_TIMEOUT },
        SeedRow { id: "system-health-check", name: "Health check", schedule: "0 */5 * * * *", task_name: "health_check", timeout: DEFAULT_TIMEOUT },
        SeedRow { id: "system-execution-history-cleanup", name: "Execution history cleanup", schedule: "0 0 2 * * *", task_name: "execution_history_cleanup", timeout: DEFAULT_TIMEOUT },
        SeedRow { id: "system-character-affiliation-update", name: "Character affiliation update", schedule: "0 */30 * * * *", task_name: "affiliation_update", timeout: DEFAULT_TIMEOUT },
        SeedRow { id: "system-alliance-bulk-import", name: "Alliance bulk import", schedule: "0 0 3 * * 0", task_name: "alliance_bulk_import", timeout: LONG_TIMEOUT },
        SeedRow { id: "system-corporation-update", name: "Corporation update", schedule: "0 0 4 * * *", task_name: "corporation_update", timeout: DEFAULT_TIMEOUT },
        SeedRow { id: "system-ceo-token-validation", name: "CEO token validation", schedule: "0 0 5 * * *", task_name: "ceo_token_validation", timeout: LONG_TIMEOUT },
        SeedRow { id: "system-structure-access-retry", name: "Structure access retry", schedule: "0 0 */6 * * *", task_name: "structure_access_retry", timeout: DEFAULT_TIMEOUT },
        SeedRow { id: "system-group-membership-validation", name: "Group membership validation", schedule: "0 0 */6 * * *", task_name: "group_membership_validation", timeout: DEFAULT_TIMEOUT },
        SeedRow { id: "system-asset-tracking-processor", name: "Asset tracking processor", schedule: "0 */30 * * * *", task_name: "asset_tracking", timeout: DEFAULT_TIMEOUT },
        SeedRow { id: "system-asset-snapshot-creator", name: "Asset snapshot creator", schedule: "0 0 4 * * *", task_name: "asset_snapshot", timeout: DEFAULT_TIMEOUT },
        SeedRow { id: "system-stale-asset-refresher", name: "Stale asset refresher", schedule: "0 0 */2 * * *", task_name: "stale_asset_refresh", timeout: DEFAULT_TIMEOUT },
    ]
}

/// Builds the 13 well-known system `Task` records with fresh ids/timestamps.
/// Callers reconcile these against the store rather than inserting blindly.
pub fn seed_tasks() -> Vec<Task> {
    let now = Utc::now();
    seed_rows()
        .into_iter()
        .map(|row| Task {
            id: row.id.to_string(),
            name: row.name.to_string(),
            description: String::new(),
            kind: TaskKind::System,
            schedule: row.schedule.to_string(),
            priority: Priority::Normal,
            enabled: true,
            status: TaskStatus::Pending,
            config: TaskConfig::System { task_name: row.task_name.to_string(), parameters: HashMap::new() },
            tags: vec!["system".to_string()],
            max_retries: 3,
            retry_interval: Duration::from_secs(60),
            timeout: row.timeout,
            is_system: true,
            source: Source::System,
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
            created_by: "system".to_string(),
            updated_by: "system".to_string(),
        })
        .collect()
}

/// Reconciles `existing` (a previously seeded or operator-touched task)
/// against the fresh definition in `seed`, updating only `schedule`,
/// `kind`, and `config`.
pub fn reconcile(existing: &mut Task, seed: &Task) {
    existing.schedule = seed.schedule.clone();
    existing.kind = seed.kind;
    existing.config = seed.config.clone();
    existing.updated_at = Utc::now();
}

/// Marker kept distinct from [`uuid::Uuid::new_v4`]-generated ids so a
/// reader can tell at a glance that an id came from the seed table rather
/// than user-created-task assignment.
pub fn is_system_task_id(id: &str) -> bool {
    id.starts_with("system-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_table_has_thirteen_rows() {
        assert_eq!(seed_tasks().len(), 13);
    }

    #[test]
    fn all_seed_rows_are_system_sourced() {
        for task in seed_tasks() {
            assert!(task.is_system);
            assert_eq!(task.source, Source::System);
            assert!(is_system_task_id(&task.id));
        }
    }

    #[test]
    fn reconcile_preserves_operator_set_fields() {
        let seeds = seed_tasks();
        let mut existing = seeds[0].clone();
        existing.name = "Operator renamed this".to_string();
        existing.priority = Priority::High;
        existing.schedule = "stale".to_string();

        reconcile(&mut existing, &seeds[0]);

        assert_eq!(existing.name, "Operator renamed this");
        assert_eq!(existing.priority, Priority::High);
        assert_eq!(existing.schedule, seeds[0].schedule);
    }
}
