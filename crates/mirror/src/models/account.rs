//! Account model representing a mirrored mailbox

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync window used when the provider is asked to initialize a mailbox
pub const DEFAULT_DAYS_WITHIN: u32 = 30;

/// A mailbox registered for mirroring
///
/// Created when the user first authorizes the provider. The orchestrator
/// owns the two cursors and advances them after every successful cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Stable user identity (the job argument and status key)
    pub user_id: String,
    /// Remote account identity at the provider (the lock key)
    pub account_id: String,
    /// Bearer credential for provider calls
    pub access_token: String,
    /// Cursor into the "updated" change feed
    pub updated_cursor: Option<String>,
    /// Cursor into the "deleted" change feed
    pub deleted_cursor: Option<String>,
    /// How many days back the provider should mirror on initialization
    pub days_within: u32,
    /// When the account was registered
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with no cursors
    pub fn new(
        user_id: impl Into<String>,
        account_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            account_id: account_id.into(),
            access_token: access_token.into(),
            updated_cursor: None,
            deleted_cursor: None,
            days_within: DEFAULT_DAYS_WITHIN,
            created_at: Utc::now(),
        }
    }

    /// Set the sync window
    pub fn with_days_within(mut self, days: u32) -> Self {
        self.days_within = days;
        self
    }

    /// Set both cursors
    pub fn with_cursors(
        mut self,
        updated: Option<impl Into<String>>,
        deleted: Option<impl Into<String>>,
    ) -> Self {
        self.updated_cursor = updated.map(Into::into);
        self.deleted_cursor = deleted.map(Into::into);
        self
    }

    /// Whether the provider still has to hand out starting cursors
    pub fn needs_initialization(&self) -> bool {
        self.updated_cursor.is_none() || self.deleted_cursor.is_none()
    }
}
