//! Shared key/value state used to coordinate workers
//!
//! The exclusivity lock and the status records live here rather than in
//! process memory, so every worker process observes the same values.

mod lock;
mod memory;
mod sqlite;
mod status;

pub use lock::{ExclusivityLock, LockGuard, lock_key};
pub use memory::InMemoryCoordination;
pub use sqlite::SqliteCoordination;
pub use status::{StatusBoard, status_key};

use anyhow::Result;
use std::time::Duration;

/// Minimal key/value interface with expiring keys
pub trait CoordinationStore: Send + Sync {
    /// Current value, or None when missing or expired
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value without expiry, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Store `value` only if `key` is absent (or expired), expiring after `ttl`.
    ///
    /// Returns whether the value was stored. Never blocks waiting for the key.
    fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Remove a key, returning whether it was present
    fn delete(&self, key: &str) -> Result<bool>;
}
