//! Error taxonomy for the structure-access tracker.

/// Errors produced by [`crate::tracker::StructureAccessTracker`] operations.
///
/// Mirrors the error-kind policy table used by the scheduler crate: store
/// failures surface to the caller untouched, there is no local retry.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The underlying key/value store failed (Redis connection, command, or
    /// protocol error). The caller's retry pass is the recovery path.
    #[error("structure tracker store error: {0}")]
    Store(#[from] redis::RedisError),

    /// A `FailedStructure` record failed to (de)serialize. Indicates the
    /// stored JSON was written by an incompatible version of this tracker.
    #[error("structure tracker serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The daily retry budget is exhausted; `pick_retries` returns an empty
    /// list rather than producing this error, but callers that want to
    /// distinguish "no candidates" from "no budget" can check
    /// [`crate::tracker::StructureAccessTracker::remaining_budget`] and
    /// construct this error themselves.
    #[error("daily ESI error budget exhausted")]
    BudgetExhausted,
}

/// Result alias for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;
