//! Storage trait definitions

use crate::models::{Account, EmailAddress, Message, MessageId, Thread, ThreadId};
use anyhow::Result;

/// What applying one message did to the graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// The message row was inserted (false on a duplicate sighting)
    pub message_created: bool,
    /// The owning thread did not exist before
    pub thread_created: bool,
    /// An existing thread's metadata or status flags changed
    pub thread_updated: bool,
    /// Addresses that gained access to the thread
    pub members_added: usize,
}

/// Trait for mail storage operations
///
/// This trait abstracts over the in-memory and SQLite backends. Every
/// `apply_message` call is one atomic unit: either all of its writes land
/// or none do.
pub trait MailStore: Send + Sync {
    // === Accounts ===

    /// Insert or update an account, keyed by user id
    fn upsert_account(&self, account: &Account) -> Result<()>;

    /// Get an account by user id
    fn get_account(&self, user_id: &str) -> Result<Option<Account>>;

    /// List all registered accounts, ordered by user id
    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Persist both feed cursors of an account
    fn save_cursors(
        &self,
        user_id: &str,
        updated_cursor: Option<&str>,
        deleted_cursor: Option<&str>,
    ) -> Result<()>;

    // === Graph writes ===

    /// Apply one normalized message to the address/thread/message graph
    ///
    /// 1. resolve or create every participant address, refreshing names
    /// 2. create the thread, or fold the message into it
    /// 3. insert the message unless it already exists
    /// 4. grant every participant access to the thread
    fn apply_message(&self, message: &Message) -> Result<ApplyOutcome>;

    /// Hard-delete messages by id, returning how many rows existed
    ///
    /// Threads and access edges are left alone.
    fn delete_messages(&self, ids: &[MessageId]) -> Result<usize>;

    // === Reads ===

    fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>>;

    /// Get a message by ID, body included
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    fn has_message(&self, id: &MessageId) -> Result<bool>;

    /// Look up an address record
    fn get_address(&self, email: &str) -> Result<Option<EmailAddress>>;

    /// Addresses with access to a thread, ordered by email
    fn thread_members(&self, thread_id: &ThreadId) -> Result<Vec<EmailAddress>>;

    /// Threads visible to an address, newest first
    fn list_threads_for_address(
        &self,
        email: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Thread>>;

    /// Messages of a thread, ordered by received_at ascending
    fn list_messages_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<Message>>;

    fn count_messages(&self) -> Result<usize>;

    fn count_threads(&self) -> Result<usize>;

    fn count_addresses(&self) -> Result<usize>;
}
