//! Entities tracked by the structure-access tracker.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Minimum time between retries of the same structure, regardless of tier.
pub const MIN_RETRY_INTERVAL: Duration = Duration::hours(6);

/// Maximum number of retry attempts the tracker will hand out across one UTC day.
pub const DAILY_BUDGET: i64 = 20;

/// TTL applied to `FailedStructure` records and, by the same retention
/// window, to the daily error-budget counter.
pub const ENTRY_TTL: Duration = Duration::days(90);

/// TTL applied to per-day aggregate metrics records.
pub const METRICS_TTL: Duration = Duration::hours(48);

/// A previously denied structure lookup for one character.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedStructure {
    pub character_id: i64,
    pub structure_id: i64,
    pub first_failed: DateTime<Utc>,
    pub last_attempted: DateTime<Utc>,
    pub failure_count: u32,
    pub last_error: String,
    pub tier: u8,
}

impl FailedStructure {
    /// Start a fresh record for a first-ever failure, tier 1.
    pub fn new(character_id: i64, structure_id: i64, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            character_id,
            structure_id,
            first_failed: now,
            last_attempted: now,
            failure_count: 1,
            last_error: reason.into(),
            tier: 1,
        }
    }

    /// Age of this entry (time since it was first observed failing).
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.first_failed)
    }

    /// Redis key this record is stored under.
    pub fn key(character_id: i64, structure_id: i64) -> String {
        format!("failed:{}:{}", character_id, structure_id)
    }

    /// The `character_id:structure_id` member used in `retry_candidates`.
    pub fn candidate_member(&self) -> String {
        format!("{}:{}", self.character_id, self.structure_id)
    }
}

/// Assigns the tier for a record given its current failure count and age,
/// applying the first rule that fires, top to bottom.
pub fn assign_tier(failure_count: u32, age: Duration) -> u8 {
    let age_days = age.num_seconds() as f64 / 86_400.0;
    if failure_count > 20 || age_days > 90.0 {
        5
    } else if failure_count > 10 || age_days > 30.0 {
        4
    } else if failure_count > 5 || age_days > 7.0 {
        3
    } else if failure_count > 2 || age.num_hours() > 24 {
        2
    } else {
        1
    }
}

/// Retry probability for a given tier.
pub fn retry_probability(tier: u8) -> f64 {
    match tier {
        5 => 0.0,
        4 => 0.01,
        3 => 0.02,
        2 => 0.05,
        _ => 0.10,
    }
}

/// Per-day aggregate counters, keyed by UTC date.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub total_checked: u64,
    pub failed_denied: u64,
    pub retry_attempts: u64,
    pub retry_successes: u64,
    pub avg_failure_age_days: f64,
}

/// Aggregate statistics returned by [`crate::tracker::StructureAccessTracker::stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerStats {
    pub counts_by_tier: [u64; 6], // index 0 unused, tiers 1..=5
    pub oldest_failure: Option<DateTime<Utc>>,
    pub newest_failure: Option<DateTime<Utc>>,
    pub average_age_days: f64,
    pub remaining_budget: i64,
}
