//! In-process provider used by the sync unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::models::MessageId;
use crate::provider::api::{
    AddressRecord, DeletedRecord, EmailRecord, FeedPage, RemoteId, SyncStartResponse,
};
use crate::provider::{FeedPosition, MailProvider};
use crate::transport::TransportError;

/// Provider answering from canned pages
///
/// Pages are keyed `delta:<token>` or `page:<token>`; unknown positions
/// answer with an empty, terminal page.
#[derive(Default)]
pub(crate) struct FakeProvider {
    starts: Mutex<VecDeque<SyncStartResponse>>,
    updated: Mutex<HashMap<String, FeedPage<EmailRecord>>>,
    deleted: Mutex<HashMap<String, FeedPage<DeletedRecord>>>,
    messages: Mutex<HashMap<String, EmailRecord>>,
    failing: Mutex<HashMap<String, TransportError>>,
    exploding: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
}

fn key(position: FeedPosition<'_>) -> String {
    match position {
        FeedPosition::Cursor(token) => format!("delta:{}", token),
        FeedPosition::Page(token) => format!("page:{}", token),
    }
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_start(&self, response: SyncStartResponse) {
        self.starts.lock().unwrap().push_back(response);
    }

    pub(crate) fn ready(&self, updated: &str, deleted: &str) {
        self.push_start(SyncStartResponse {
            ready: true,
            sync_updated_token: Some(updated.to_string()),
            sync_deleted_token: Some(deleted.to_string()),
        });
    }

    pub(crate) fn updated(&self, key: &str, page: FeedPage<EmailRecord>) {
        self.updated.lock().unwrap().insert(key.to_string(), page);
    }

    pub(crate) fn deleted(&self, key: &str, page: FeedPage<DeletedRecord>) {
        self.deleted.lock().unwrap().insert(key.to_string(), page);
    }

    pub(crate) fn message(&self, record: EmailRecord) {
        let id = record.id.as_ref().map(|i| i.as_str().to_string()).unwrap_or_default();
        self.messages.lock().unwrap().insert(id, record);
    }

    /// Make every call whose log entry equals `call` fail with `error`
    pub(crate) fn fail(&self, call: &str, error: TransportError) {
        self.failing.lock().unwrap().insert(call.to_string(), error);
    }

    /// Make every call whose log entry equals `call` panic
    pub(crate) fn explode_on(&self, call: &str) {
        self.exploding.lock().unwrap().push(call.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record_call(&self, call: String) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(call.clone());
        let explode = self.exploding.lock().unwrap().contains(&call);
        if explode {
            panic!("provider exploded on {}", call);
        }
        match self.failing.lock().unwrap().get(&call) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl MailProvider for FakeProvider {
    fn start_sync(
        &self,
        _access_token: &str,
        days_within: u32,
    ) -> Result<SyncStartResponse, TransportError> {
        self.record_call(format!("start:{}", days_within))?;
        Ok(self.starts.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn fetch_updated(
        &self,
        _access_token: &str,
        position: FeedPosition<'_>,
    ) -> Result<FeedPage<EmailRecord>, TransportError> {
        let key = key(position);
        self.record_call(format!("updated:{}", key))?;
        Ok(self
            .updated
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| FeedPage::new(Vec::new())))
    }

    fn fetch_deleted(
        &self,
        _access_token: &str,
        position: FeedPosition<'_>,
    ) -> Result<FeedPage<DeletedRecord>, TransportError> {
        let key = key(position);
        self.record_call(format!("deleted:{}", key))?;
        Ok(self
            .deleted
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| FeedPage::new(Vec::new())))
    }

    fn fetch_message(
        &self,
        _access_token: &str,
        id: &MessageId,
    ) -> Result<EmailRecord, TransportError> {
        self.record_call(format!("message:{}", id))?;
        self.messages
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| TransportError::Status {
                status: 404,
                body: "not found".to_string(),
            })
    }
}

/// Feed record with one sender, some recipients and a receive time
pub(crate) fn record(id: &str, thread: &str, from: &str, to: &[&str], received: &str) -> EmailRecord {
    let address = |a: &str| AddressRecord {
        name: None,
        address: Some(a.to_string()),
    };
    EmailRecord {
        id: Some(RemoteId::new(id)),
        thread_id: Some(RemoteId::new(thread)),
        created_time: Some(received.to_string()),
        sent_at: Some(received.to_string()),
        received_at: Some(received.to_string()),
        subject: Some(format!("Subject {}", id)),
        sys_labels: vec!["inbox".to_string()],
        from: Some(address(from)),
        to: to.iter().map(|a| address(a)).collect(),
        body: Some(format!("Body of {}", id)),
        ..Default::default()
    }
}

pub(crate) fn deleted(ids: &[&str]) -> Vec<DeletedRecord> {
    ids.iter()
        .map(|id| DeletedRecord {
            id: RemoteId::new(*id),
        })
        .collect()
}
