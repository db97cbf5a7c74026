//! Read-only queries over the mirrored graph
//!
//! Provides the lookups a status or API surface needs, shaped for display.

mod threads;

pub use threads::{ThreadDetail, ThreadSummary, get_thread_detail, list_threads_for_address};
