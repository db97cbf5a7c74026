//! Applying the "deleted" feed

use anyhow::Result;
use log::debug;
use std::collections::BTreeSet;

use crate::models::MessageId;
use crate::provider::api::RemoteId;
use crate::storage::MailStore;

/// Hard-delete the messages named by the feed, returning how many existed
///
/// Threads and access edges are left in place.
pub fn reconcile_deletions(store: &dyn MailStore, ids: Vec<RemoteId>) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let unique: BTreeSet<MessageId> = ids
        .into_iter()
        .map(MessageId::from)
        .filter(|id| !id.as_str().is_empty())
        .collect();
    let ids: Vec<MessageId> = unique.into_iter().collect();

    let deleted = store.delete_messages(&ids)?;
    debug!("[SYNC] Reconciled deletions: {} of {} ids removed", deleted, ids.len());
    Ok(deleted)
}
