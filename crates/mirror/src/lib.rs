//! Mirror crate - incremental mailbox mirroring
//!
//! This crate keeps a local relational copy of remote mailboxes in sync:
//! - Domain models (Account, Thread, Message, EmailAddress, SyncStatus)
//! - Provider client for cursor-addressed change feeds, over a retrying transport
//! - Storage trait with in-memory and SQLite backends
//! - Coordination store for the per-account lock and status records
//! - Sync engine: feed walking, idempotent upserts, deletion reconciliation
//! - Job dispatcher running cycles on a tokio worker pool
//! - Query API for status and thread listings

pub mod config;
pub mod coordination;
pub mod models;
pub mod provider;
pub mod query;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod worker;

pub use crate::config::Settings;
pub use coordination::{
    CoordinationStore, ExclusivityLock, InMemoryCoordination, LockGuard, SqliteCoordination,
    StatusBoard, lock_key, status_key,
};
pub use models::{
    Account, EmailAddress, EmailLabel, Message, MessageId, SyncState, SyncStatus, Thread, ThreadId,
};
pub use provider::{AurinkoClient, FeedPosition, MailProvider, NormalizeError, normalize_record};
pub use query::{ThreadDetail, ThreadSummary, get_thread_detail, list_threads_for_address};
pub use storage::{ApplyOutcome, InMemoryMailStore, MailStore, SqliteMailStore};
pub use sync::{
    CycleOutcome, CycleReport, FeedBatch, InitPolicy, SyncEngine, UpsertStats, fetch_deleted,
    fetch_updated, reconcile_deletions, upsert_records,
};
pub use transport::{HttpBackend, RetryPolicy, RetryingTransport, TransportError, UreqBackend};
pub use worker::{DispatchStats, Dispatcher, Job};
