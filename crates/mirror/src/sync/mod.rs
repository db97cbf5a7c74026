//! Incremental sync engine
//!
//! Cursor-driven reads of the provider's change feeds, applied to the local
//! store with idempotent writes so a cycle can always be safely retried.

mod engine;
mod feed;
mod reconcile;
mod upsert;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{CycleOutcome, CycleReport, InitPolicy, SyncEngine};
pub use feed::{FeedBatch, fetch_deleted, fetch_updated};
pub use reconcile::reconcile_deletions;
pub use upsert::{UpsertStats, upsert_records};
