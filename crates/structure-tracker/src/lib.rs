//! Structure-access tracker: a tiered retry/back-off engine with a daily
//! error budget, used by the assets subsystem to avoid burning an external
//! API's error quota on endpoints that previously denied access.
//!
//! This crate is self-contained: it owns its own key/value namespace
//! (`falcon:assets:*` in the parent deployment's Redis) and has no
//! dependency on the scheduler crate. The scheduler's `structure_access_retry`
//! system task calls [`tracker::StructureAccessTracker::pick_retries`] through
//! the narrow interface the engine's System executor consumes.

pub mod error;
pub mod model;
pub mod store;
pub mod tracker;

pub use error::{TrackerError, TrackerResult};
pub use model::{FailedStructure, TrackerStats, DAILY_BUDGET, ENTRY_TTL, MIN_RETRY_INTERVAL};
pub use store::{InMemoryStore, KvStore, RedisStore};
pub use tracker::StructureAccessTracker;
