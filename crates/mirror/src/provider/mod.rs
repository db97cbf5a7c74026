//! Remote mail provider integration
//!
//! This module provides:
//! - Wire types of the provider's change-feed API
//! - The [`MailProvider`] seam the sync engine talks to
//! - An HTTP client implementing it over the retrying transport
//! - Normalization of raw records into domain models

mod client;
mod normalize;

pub use client::AurinkoClient;
pub use normalize::{NormalizeError, body_omitted, normalize_record};

use crate::models::MessageId;
use crate::transport::TransportError;
use api::{DeletedRecord, EmailRecord, FeedPage, SyncStartResponse};

/// Where to read the next page of a change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPosition<'a> {
    /// Start of the page set addressed by a delta token
    Cursor(&'a str),
    /// Continuation inside the current page set
    Page(&'a str),
}

/// Calls the sync engine makes against the provider
///
/// Every call carries the account's bearer credential.
pub trait MailProvider: Send + Sync {
    /// Ask the provider to prepare the mailbox and hand out initial cursors
    fn start_sync(
        &self,
        access_token: &str,
        days_within: u32,
    ) -> Result<SyncStartResponse, TransportError>;

    /// One page of the "updated" feed
    fn fetch_updated(
        &self,
        access_token: &str,
        position: FeedPosition<'_>,
    ) -> Result<FeedPage<EmailRecord>, TransportError>;

    /// One page of the "deleted" feed
    fn fetch_deleted(
        &self,
        access_token: &str,
        position: FeedPosition<'_>,
    ) -> Result<FeedPage<DeletedRecord>, TransportError>;

    /// Full message, used to backfill bodies the feed omitted
    fn fetch_message(
        &self,
        access_token: &str,
        id: &MessageId,
    ) -> Result<EmailRecord, TransportError>;
}

/// Provider API response types
pub mod api {
    use serde::{Deserialize, Deserializer, Serialize};

    use crate::models::{MessageId, ThreadId};

    /// Response from the initialize-sync endpoint
    #[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SyncStartResponse {
        #[serde(default)]
        pub ready: bool,
        pub sync_updated_token: Option<String>,
        pub sync_deleted_token: Option<String>,
    }

    /// One page of a change feed
    #[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FeedPage<T> {
        #[serde(default = "Vec::new")]
        pub records: Vec<T>,
        pub next_page_token: Option<String>,
        pub next_delta_token: Option<String>,
    }

    impl<T> FeedPage<T> {
        pub fn new(records: Vec<T>) -> Self {
            Self {
                records,
                next_page_token: None,
                next_delta_token: None,
            }
        }

        pub fn with_next_page(mut self, token: impl Into<String>) -> Self {
            self.next_page_token = Some(token.into());
            self
        }

        pub fn with_next_delta(mut self, token: impl Into<String>) -> Self {
            self.next_delta_token = Some(token.into());
            self
        }
    }

    /// Provider identifier; the API sends these as strings or numbers
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
    #[serde(transparent)]
    pub struct RemoteId(pub String);

    impl RemoteId {
        pub fn new(id: impl Into<String>) -> Self {
            Self(id.into())
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl<'de> Deserialize<'de> for RemoteId {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            #[derive(Deserialize)]
            #[serde(untagged)]
            enum Raw {
                Text(String),
                Unsigned(u64),
                Signed(i64),
            }

            Ok(match Raw::deserialize(deserializer)? {
                Raw::Text(s) => RemoteId(s.trim().to_string()),
                Raw::Unsigned(n) => RemoteId(n.to_string()),
                Raw::Signed(n) => RemoteId(n.to_string()),
            })
        }
    }

    impl From<RemoteId> for MessageId {
        fn from(id: RemoteId) -> Self {
            MessageId(id.0)
        }
    }

    impl From<RemoteId> for ThreadId {
        fn from(id: RemoteId) -> Self {
            ThreadId(id.0)
        }
    }

    /// Sender or recipient as sent by the provider
    #[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
    pub struct AddressRecord {
        pub name: Option<String>,
        pub address: Option<String>,
    }

    /// Full message record from the "updated" feed or the message endpoint
    #[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EmailRecord {
        pub id: Option<RemoteId>,
        pub thread_id: Option<RemoteId>,
        pub created_time: Option<String>,
        pub last_modified_time: Option<String>,
        pub sent_at: Option<String>,
        pub received_at: Option<String>,
        pub subject: Option<String>,
        #[serde(default)]
        pub sys_labels: Vec<String>,
        pub from: Option<AddressRecord>,
        #[serde(default)]
        pub to: Vec<AddressRecord>,
        #[serde(default)]
        pub cc: Vec<AddressRecord>,
        #[serde(default)]
        pub bcc: Vec<AddressRecord>,
        #[serde(default)]
        pub reply_to: Vec<AddressRecord>,
        pub body: Option<String>,
        pub body_snippet: Option<String>,
        pub in_reply_to: Option<String>,
        pub internet_message_id: Option<String>,
        /// Parts the provider left out of this record (e.g. "body")
        #[serde(default)]
        pub omitted: Vec<String>,
    }

    /// Entry of the "deleted" feed
    #[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
    pub struct DeletedRecord {
        pub id: RemoteId,
    }

}
