//! Cron dispatcher. Walks a registered-entries map on a 1s tick and
//! fires a callback for any entry whose computed next occurrence elapsed.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::interval;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::TaskId;

/// One dispatcher entry: a parsed schedule plus the next computed fire time.
#[derive(Clone)]
struct Entry {
    schedule: Schedule,
    next_run: DateTime<Utc>,
}

fn parse_schedule(expression: &str) -> SchedulerResult<Schedule> {
    Schedule::from_str(expression).map_err(SchedulerError::Cron)
}

/// Computes the next fire time strictly after `after` for a 6-field cron
/// expression (seconds field included), interpreting the expression's
/// fields in UTC. Use [`next_run_after_tz`] when a process timezone is
/// configured (`SCHEDULER_TIMEZONE`).
pub fn next_run_after(expression: &str, after: DateTime<Utc>) -> SchedulerResult<Option<DateTime<Utc>>> {
    next_run_after_tz(expression, after, chrono_tz::UTC)
}

/// As [`next_run_after`], but the cron expression's fields are interpreted
/// in `tz` rather than UTC: `after` is converted into `tz`, the next
/// occurrence is computed there, and the result is converted back to UTC.
pub fn next_run_after_tz(expression: &str, after: DateTime<Utc>, tz: Tz) -> SchedulerResult<Option<DateTime<Utc>>> {
    let schedule = parse_schedule(expression)?;
    let after_local = after.with_timezone(&tz);
    Ok(schedule.after(&after_local).next().map(|dt| dt.with_timezone(&Utc)))
}

type TickCallback = Arc<dyn Fn(TaskId) + Send + Sync>;

/// Background cron loop. Holds its registered entries behind a single
/// `parking_lot::RwLock` so `reload` swaps the whole map atomically from
/// an external observer's perspective.
pub struct CronDispatcher {
    entries: Arc<RwLock<HashMap<TaskId, Entry>>>,
    shutdown: Arc<Notify>,
    running: Arc<std::sync::atomic::AtomicBool>,
    tz: Tz,
}

impl CronDispatcher {
    pub fn new() -> Self {
        Self::with_timezone(chrono_tz::UTC)
    }

    /// As [`Self::new`], but cron fields are interpreted in `tz` instead of
    /// UTC (`SCHEDULER_TIMEZONE`).
    pub fn with_timezone(tz: Tz) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            tz,
        }
    }

    fn next_occurrence(&self, schedule: &Schedule, after: DateTime<Utc>) -> DateTime<Utc> {
        schedule
            .after(&after.with_timezone(&self.tz))
            .next()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(after)
    }

    /// Registers or replaces the schedule for `task_id`.
    pub fn register(&self, task_id: TaskId, expression: &str, now: DateTime<Utc>) -> SchedulerResult<()> {
        let schedule = parse_schedule(expression)?;
        let next_run = self.next_occurrence(&schedule, now);
        self.entries.write().insert(task_id, Entry { schedule, next_run });
        Ok(())
    }

    pub fn unregister(&self, task_id: &TaskId) {
        self.entries.write().remove(task_id);
    }

    /// Replaces the entire registered-entries map in one lock acquisition,
    /// so a concurrent tick either sees the whole old set or the whole new
    /// one, never a partial swap.
    pub fn reload(&self, schedules: Vec<(TaskId, String)>, now: DateTime<Utc>) -> SchedulerResult<()> {
        let mut fresh = HashMap::with_capacity(schedules.len());
        for (task_id, expression) in schedules {
            let schedule = parse_schedule(&expression)?;
            let next_run = self.next_occurrence(&schedule, now);
            fresh.insert(task_id, Entry { schedule, next_run });
        }
        *self.entries.write() = fresh;
        Ok(())
    }

    pub fn registered_count(&self) -> usize {
        self.entries.read().len()
    }

    /// The timezone this dispatcher interprets cron fields in.
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Spawns the 1s tick loop. `on_fire` is called (without awaiting) for
    /// each task id whose schedule elapsed; it's expected to hand off to
    /// the engine rather than do real work inline.
    pub fn start(self: &Arc<Self>, on_fire: TickCallback) {
        if self.running.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let entries = self.entries.clone();
        let shutdown = self.shutdown.clone();
        let running = self.running.clone();
        let tz = self.tz;

        tokio::spawn(async move {
            let mut ticker = interval(std::time::Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        running.store(false, std::sync::atomic::Ordering::SeqCst);
                        break;
                    }
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let mut due = Vec::new();
                        {
                            let mut entries = entries.write();
                            for (task_id, entry) in entries.iter_mut() {
                                if entry.next_run <= now {
                                    due.push(task_id.clone());
                                    entry.next_run = entry
                                        .schedule
                                        .after(&now.with_timezone(&tz))
                                        .next()
                                        .map(|dt| dt.with_timezone(&Utc))
                                        .unwrap_or(now);
                                }
                            }
                        }
                        for task_id in due {
                            on_fire(task_id);
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.shutdown.notify_one();
    }
}

impl Default for CronDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_six_field_expression() {
        assert!(parse_schedule("0 */15 * * * *").is_ok());
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(parse_schedule("not a cron expression").is_err());
    }

    #[test]
    fn next_run_after_advances_strictly_forward() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = next_run_after("0 */15 * * * *", now).unwrap().unwrap();
        assert!(next > now);
        assert_eq!(next.timestamp() % 900, 0);
    }

    #[test]
    fn register_computes_initial_next_run() {
        let dispatcher = CronDispatcher::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        dispatcher.register("t1".to_string(), "0 */5 * * * *", now).unwrap();
        assert_eq!(dispatcher.registered_count(), 1);
    }

    #[test]
    fn reload_replaces_entries_atomically() {
        let dispatcher = CronDispatcher::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        dispatcher.register("stale".to_string(), "0 * * * * *", now).unwrap();

        dispatcher
            .reload(vec![("t1".to_string(), "0 */5 * * * *".to_string())], now)
            .unwrap();

        assert_eq!(dispatcher.registered_count(), 1);
        assert!(dispatcher.entries.read().contains_key("t1"));
        assert!(!dispatcher.entries.read().contains_key("stale"));
    }

    #[test]
    fn next_run_after_tz_shifts_with_the_zone() {
        // "at 09:00" lands on different UTC instants in UTC vs. New York.
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let utc_next = next_run_after_tz("0 0 9 * * *", now, chrono_tz::UTC).unwrap().unwrap();
        let ny_next = next_run_after_tz("0 0 9 * * *", now, chrono_tz::America::New_York).unwrap().unwrap();
        assert_ne!(utc_next, ny_next);
        assert_eq!(ny_next - utc_next, chrono::Duration::hours(5));
    }
}
