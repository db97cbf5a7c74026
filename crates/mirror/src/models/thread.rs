//! Thread model representing a conversation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EmailLabel, Message};

/// Unique identifier for a thread (provider thread ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A thread represents a conversation containing one or more messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Provider thread ID
    pub id: ThreadId,
    /// Subject of the most recent message
    pub subject: String,
    /// Received timestamp of the most recent message
    pub last_message_date: DateTime<Utc>,
    /// Preview text of the most recent message
    pub brief: String,
    /// At least one message classified as inbox
    pub inbox_status: bool,
    /// At least one message classified as draft
    pub draft_status: bool,
    /// At least one message classified as sent
    pub sent_status: bool,
}

impl Thread {
    /// Start a thread from its first observed message
    pub fn from_message(message: &Message) -> Self {
        let mut thread = Self {
            id: message.thread_id.clone(),
            subject: message.subject.clone(),
            last_message_date: message.received_at,
            brief: message.preview(),
            inbox_status: false,
            draft_status: false,
            sent_status: false,
        };
        thread.mark(message.email_label);
        thread
    }

    /// Fold another message of this thread into the metadata.
    ///
    /// Subject, brief and `last_message_date` only move forward: a message
    /// that is not strictly newer than the stored date leaves them alone.
    /// Status flags accumulate. Returns whether anything changed.
    pub fn absorb(&mut self, message: &Message) -> bool {
        let mut changed = self.mark(message.email_label);

        if message.received_at > self.last_message_date {
            self.last_message_date = message.received_at;
            self.subject = message.subject.clone();
            self.brief = message.preview();
            changed = true;
        }

        changed
    }

    fn mark(&mut self, label: EmailLabel) -> bool {
        let flag = match label {
            EmailLabel::Inbox => &mut self.inbox_status,
            EmailLabel::Draft => &mut self.draft_status,
            EmailLabel::Sent => &mut self.sent_status,
        };
        let changed = !*flag;
        *flag = true;
        changed
    }
}
