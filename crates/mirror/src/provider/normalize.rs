//! Provider record normalization
//!
//! Converts raw feed records into domain [`Message`]s.

use chrono::{DateTime, NaiveDateTime, Utc};

use super::api::{AddressRecord, EmailRecord};
use crate::models::{EmailAddress, Message, MessageId, ThreadId};

/// Why a single record could not be applied
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` has unparseable timestamp {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("failed to fetch omitted body: {0}")]
    BodyFetch(String),
}

/// Whether the provider withheld the body of this record
pub fn body_omitted(record: &EmailRecord) -> bool {
    record.omitted.iter().any(|part| part.eq_ignore_ascii_case("body"))
}

/// Normalize a provider record to a Message
///
/// Requires an id, a thread id and a sender address. Addresses are trimmed
/// and lowercased; recipients without an address are dropped.
pub fn normalize_record(record: EmailRecord) -> Result<Message, NormalizeError> {
    let id: MessageId = record.id.ok_or(NormalizeError::MissingField("id"))?.into();
    if id.as_str().is_empty() {
        return Err(NormalizeError::MissingField("id"));
    }
    let thread_id: ThreadId = record
        .thread_id
        .ok_or(NormalizeError::MissingField("threadId"))?
        .into();
    if thread_id.as_str().is_empty() {
        return Err(NormalizeError::MissingField("threadId"));
    }

    let from = record
        .from
        .as_ref()
        .and_then(normalize_address)
        .ok_or(NormalizeError::MissingField("from.address"))?;

    let created_time = parse_timestamp("createdTime", record.created_time.as_deref())?;
    let sent_at = parse_timestamp("sentAt", record.sent_at.as_deref())?;
    let received_at = parse_timestamp("receivedAt", record.received_at.as_deref())?;
    let last_modified_time =
        parse_timestamp("lastModifiedTime", record.last_modified_time.as_deref())?;
    // the thread ordering key; an undated record cannot be placed in its thread
    let received_at = received_at
        .or(sent_at)
        .ok_or(NormalizeError::MissingField("receivedAt"))?;

    let mut builder = Message::builder(id, thread_id)
        .subject(record.subject.unwrap_or_default())
        .labels(record.sys_labels)
        .from(from)
        .to(normalize_list(&record.to))
        .cc(normalize_list(&record.cc))
        .bcc(normalize_list(&record.bcc))
        .reply_to(normalize_list(&record.reply_to))
        .body(record.body)
        .body_snippet(record.body_snippet)
        .in_reply_to(record.in_reply_to.filter(|s| !s.trim().is_empty()))
        .internet_message_id(record.internet_message_id)
        .received_at(received_at);

    if let Some(at) = created_time {
        builder = builder.created_time(at);
    }
    if let Some(at) = sent_at {
        builder = builder.sent_at(at);
    }
    // lastModifiedTime falls back to createdTime, then sentAt
    if let Some(at) = last_modified_time.or(created_time).or(sent_at) {
        builder = builder.last_modified_time(at);
    }

    Ok(builder.build())
}

fn normalize_address(record: &AddressRecord) -> Option<EmailAddress> {
    let email = record.address.as_deref()?.trim().to_lowercase();
    if email.is_empty() {
        return None;
    }

    let name = record
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    Some(EmailAddress { name, email })
}

fn normalize_list(records: &[AddressRecord]) -> Vec<EmailAddress> {
    records.iter().filter_map(normalize_address).collect()
}

/// Parse an RFC 3339 timestamp, accepting offset-less values as UTC
fn parse_timestamp(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, NormalizeError> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| NormalizeError::InvalidTimestamp {
            field,
            value: raw.to_string(),
        })
}
