//! Thread query functions

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EmailAddress, Message, Thread, ThreadId};
use crate::storage::MailStore;

/// Summary information for displaying a thread in a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    /// Thread ID
    pub id: ThreadId,
    /// Subject of the most recent message
    pub subject: String,
    /// Preview of the most recent message
    pub brief: String,
    /// Timestamp of the most recent message
    pub last_message_date: DateTime<Utc>,
    pub inbox_status: bool,
    pub draft_status: bool,
    pub sent_status: bool,
}

impl From<Thread> for ThreadSummary {
    fn from(thread: Thread) -> Self {
        Self {
            id: thread.id,
            subject: thread.subject,
            brief: thread.brief,
            last_message_date: thread.last_message_date,
            inbox_status: thread.inbox_status,
            draft_status: thread.draft_status,
            sent_status: thread.sent_status,
        }
    }
}

/// Detailed thread information including all messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadDetail {
    /// The thread metadata
    pub thread: Thread,
    /// All messages in the thread, ordered chronologically
    pub messages: Vec<Message>,
    /// Addresses with access to the thread
    pub members: Vec<EmailAddress>,
}

/// List the threads an address can see, newest first
///
/// # Arguments
/// * `store` - The storage backend
/// * `email` - Address whose access edges are followed (case-insensitive)
/// * `limit` - Maximum number of threads to return
/// * `offset` - Number of threads to skip
pub fn list_threads_for_address(
    store: &dyn MailStore,
    email: &str,
    limit: usize,
    offset: usize,
) -> Result<Vec<ThreadSummary>> {
    let threads = store.list_threads_for_address(email, limit, offset)?;
    Ok(threads.into_iter().map(ThreadSummary::from).collect())
}

/// Get a thread with its messages (bodies included) and members
pub fn get_thread_detail(
    store: &dyn MailStore,
    thread_id: &ThreadId,
) -> Result<Option<ThreadDetail>> {
    let Some(thread) = store.get_thread(thread_id)? else {
        return Ok(None);
    };

    let messages = store.list_messages_for_thread(thread_id)?;
    let members = store.thread_members(thread_id)?;

    Ok(Some(ThreadDetail {
        thread,
        messages,
        members,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageId;
    use crate::storage::InMemoryMailStore;

    fn setup_test_store() -> InMemoryMailStore {
        let store = InMemoryMailStore::new();

        for i in 0..5 {
            for j in 0..2 {
                let msg = Message::builder(
                    MessageId::new(format!("m{}_{}", i, j)),
                    ThreadId::new(format!("t{}", i)),
                )
                .from(EmailAddress::new(format!("sender{}@example.com", j)))
                .to(vec![EmailAddress::new("reader@example.com")])
                .subject(format!("Thread {}", i))
                .body_snippet(Some(format!("Message {} body", j)))
                .received_at(Utc::now() - chrono::Duration::hours(i as i64 * 2 + j as i64))
                .build();
                store.apply_message(&msg).unwrap();
            }
        }

        store
    }

    #[test]
    fn test_list_threads_for_address() {
        let store = setup_test_store();

        let threads = list_threads_for_address(&store, "reader@example.com", 3, 0).unwrap();
        assert_eq!(threads.len(), 3);
        // Should be sorted by last_message_date descending
        assert_eq!(threads[0].id.0, "t0");
        assert_eq!(threads[1].id.0, "t1");
        assert_eq!(threads[2].id.0, "t2");
        assert_eq!(threads[0].brief, "Message 0 body");
    }

    #[test]
    fn test_list_threads_pagination() {
        let store = setup_test_store();

        let page1 = list_threads_for_address(&store, "reader@example.com", 2, 0).unwrap();
        let page2 = list_threads_for_address(&store, "reader@example.com", 2, 2).unwrap();

        assert_eq!(page1.len(), 2);
        assert_eq!(page2.len(), 2);
        assert_ne!(page1[0].id, page2[0].id);
    }

    #[test]
    fn test_get_thread_detail() {
        let store = setup_test_store();

        let detail = get_thread_detail(&store, &ThreadId::new("t0")).unwrap().unwrap();
        assert_eq!(detail.thread.id.0, "t0");
        assert_eq!(detail.messages.len(), 2);
        // chronological: m0_1 is an hour older than m0_0
        assert_eq!(detail.messages[0].id.0, "m0_1");
        assert_eq!(detail.members.len(), 3);
    }

    #[test]
    fn test_get_thread_detail_not_found() {
        let store = setup_test_store();

        let detail = get_thread_detail(&store, &ThreadId::new("nonexistent")).unwrap();
        assert!(detail.is_none());
    }
}
