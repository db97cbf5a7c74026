//! Domain models for mirrored mail entities

mod account;
mod message;
mod sync_status;
mod thread;

pub use account::{Account, DEFAULT_DAYS_WITHIN};
pub use message::{EmailAddress, EmailLabel, Message, MessageBuilder, MessageId};
pub use sync_status::{SyncState, SyncStatus};
pub use thread::{Thread, ThreadId};
