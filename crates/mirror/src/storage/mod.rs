//! Storage traits and implementations
//!
//! This module defines the storage abstraction layer for the mirrored
//! address/thread/message graph. The trait-based design allows swapping
//! between in-memory and SQLite storage.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub(crate) use sqlite::run_migrations;
pub use traits::{ApplyOutcome, MailStore};
