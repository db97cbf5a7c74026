//! Applying "updated" feed records to the local graph

use log::{debug, warn};

use crate::models::{Message, MessageId};
use crate::provider::api::EmailRecord;
use crate::provider::{MailProvider, NormalizeError, body_omitted, normalize_record};
use crate::storage::MailStore;

/// Statistics from applying a batch of records
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpsertStats {
    /// Records whose writes were committed (new messages and duplicates)
    pub processed: usize,
    /// Messages inserted
    pub messages_created: usize,
    /// Records for messages already stored
    pub duplicates: usize,
    pub threads_created: usize,
    pub threads_updated: usize,
    /// Omitted bodies fetched from the provider
    pub bodies_fetched: usize,
    /// Records dropped after a normalization, fetch or write failure
    pub skipped: usize,
}

/// Apply records one at a time, in feed order
///
/// A record that fails at any step is logged and skipped; its writes are
/// rolled back by the store and the batch carries on.
pub fn upsert_records(
    provider: &dyn MailProvider,
    store: &dyn MailStore,
    access_token: &str,
    records: Vec<EmailRecord>,
) -> UpsertStats {
    let mut stats = UpsertStats::default();

    for record in records {
        let label = record
            .id
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|| "<no id>".to_string());

        let message = match prepare(provider, store, access_token, record, &mut stats) {
            Ok(message) => message,
            Err(e) => {
                warn!("[SYNC] Skipping record {}: {:#}", label, e);
                stats.skipped += 1;
                continue;
            }
        };

        match store.apply_message(&message) {
            Ok(outcome) => {
                stats.processed += 1;
                if outcome.message_created {
                    stats.messages_created += 1;
                } else {
                    stats.duplicates += 1;
                }
                if outcome.thread_created {
                    stats.threads_created += 1;
                }
                if outcome.thread_updated {
                    stats.threads_updated += 1;
                }
            }
            Err(e) => {
                warn!("[SYNC] Skipping record {}: {:#}", label, e);
                stats.skipped += 1;
            }
        }
    }

    debug!("[SYNC] Upsert finished: {:?}", stats);
    stats
}

/// Build the message candidate, backfilling an omitted body first
fn prepare(
    provider: &dyn MailProvider,
    store: &dyn MailStore,
    access_token: &str,
    mut record: EmailRecord,
    stats: &mut UpsertStats,
) -> anyhow::Result<Message> {
    if body_omitted(&record) {
        let id: MessageId = record
            .id
            .clone()
            .ok_or(NormalizeError::MissingField("id"))?
            .into();

        // a stored message is never rewritten, so its body is not needed
        if !store.has_message(&id)? {
            let full = provider
                .fetch_message(access_token, &id)
                .map_err(|e| NormalizeError::BodyFetch(e.to_string()))?;
            record.body = full.body;
            if record.body_snippet.is_none() {
                record.body_snippet = full.body_snippet;
            }
            stats.bodies_fetched += 1;
        }
    }

    Ok(normalize_record(record)?)
}
