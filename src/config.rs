//! Process-level configuration, parsed from the environment the way
//! `ChimeraConfig` and `MonitoringConfig` were before it: a handful of
//! named env vars with sane defaults, no config file format.

use std::time::Duration;

/// Everything the `scheduler-service` binary needs to bootstrap: store
/// connections, worker pool sizing, and the maintenance cadences.
#[derive(Debug, Clone)]
pub struct SchedulerProcessConfig {
    pub database_url: String,
    pub redis_url: String,
    pub log_level: String,
    pub timezone: String,

    pub worker_count: usize,
    pub queue_size: usize,
    pub cleanup_interval: Duration,
    pub stale_timeout: Duration,
}

impl SchedulerProcessConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_string("SCHEDULER_DATABASE_URL", "postgres://localhost/falcon_scheduler"),
            redis_url: env_string("SCHEDULER_REDIS_URL", "redis://localhost:6379"),
            log_level: env_string("SCHEDULER_LOG_LEVEL", "info"),
            timezone: env_string("SCHEDULER_TIMEZONE", "UTC"),

            worker_count: env_parsed("SCHEDULER_WORKER_COUNT", 10),
            queue_size: env_parsed("SCHEDULER_QUEUE_SIZE", 1000),
            cleanup_interval: env_duration("SCHEDULER_CLEANUP_INTERVAL", Duration::from_secs(3600)),
            stale_timeout: env_duration("SCHEDULER_STALE_TIMEOUT", Duration::from_secs(2 * 3600)),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| humantime::parse_duration(&v).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_vars_fall_back_to_defaults() {
        std::env::remove_var("SCHEDULER_WORKER_COUNT_UNSET_TEST");
        assert_eq!(env_parsed::<usize>("SCHEDULER_WORKER_COUNT_UNSET_TEST", 10), 10);
    }

    #[test]
    fn duration_env_vars_parse_human_readable_values() {
        std::env::set_var("SCHEDULER_TEST_DURATION", "5m");
        assert_eq!(env_duration("SCHEDULER_TEST_DURATION", Duration::from_secs(0)), Duration::from_secs(300));
        std::env::remove_var("SCHEDULER_TEST_DURATION");
    }
}
