//! Cursor-driven walking of the change feeds
//!
//! A feed is read in page sets. A page set starts at a cursor and follows
//! `nextPageToken` until it runs out; the last `nextDeltaToken` seen in the
//! set names the next cursor. The walk ends when a page set yields no
//! delta token, or hands back the cursor it started from.

use log::{debug, warn};
use std::collections::HashSet;

use crate::provider::api::{DeletedRecord, EmailRecord, FeedPage, RemoteId};
use crate::provider::{FeedPosition, MailProvider};
use crate::transport::TransportError;

/// Everything read from one feed during a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct FeedBatch<T> {
    /// Records in feed order
    pub records: Vec<T>,
    /// Cursor to resume from next cycle
    pub cursor: String,
    /// Page sets read, one per cursor visited
    pub page_sets: usize,
    /// Pages fetched in total
    pub pages: usize,
}

impl<T> FeedBatch<T> {
    /// Whether the walk moved past the starting cursor
    pub fn advanced_from(&self, start: &str) -> bool {
        self.cursor != start
    }
}

/// Walk the "updated" feed from `cursor`
pub fn fetch_updated(
    provider: &dyn MailProvider,
    access_token: &str,
    cursor: &str,
) -> Result<FeedBatch<EmailRecord>, TransportError> {
    walk("updated", cursor, |position| {
        provider.fetch_updated(access_token, position)
    })
}

/// Walk the "deleted" feed from `cursor`, collecting message ids
pub fn fetch_deleted(
    provider: &dyn MailProvider,
    access_token: &str,
    cursor: &str,
) -> Result<FeedBatch<RemoteId>, TransportError> {
    let batch = walk("deleted", cursor, |position| {
        provider.fetch_deleted(access_token, position)
    })?;

    Ok(FeedBatch {
        records: batch
            .records
            .into_iter()
            .map(|record: DeletedRecord| record.id)
            .collect(),
        cursor: batch.cursor,
        page_sets: batch.page_sets,
        pages: batch.pages,
    })
}

fn non_empty(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.is_empty())
}

fn walk<T>(
    feed: &str,
    start: &str,
    mut fetch: impl FnMut(FeedPosition<'_>) -> Result<FeedPage<T>, TransportError>,
) -> Result<FeedBatch<T>, TransportError> {
    let mut cursor = start.to_string();
    let mut visited = HashSet::from([cursor.clone()]);
    let mut records = Vec::new();
    let mut page_sets = 0;
    let mut pages = 0;

    loop {
        page_sets += 1;
        let mut next_delta = None;
        let mut seen_pages = HashSet::new();
        let mut page = fetch(FeedPosition::Cursor(&cursor))?;

        loop {
            pages += 1;
            records.extend(page.records);
            if let Some(delta) = non_empty(page.next_delta_token) {
                next_delta = Some(delta);
            }

            let Some(token) = non_empty(page.next_page_token) else {
                break;
            };
            if !seen_pages.insert(token.clone()) {
                warn!("[FEED] {} feed repeated page token {:?}, ending page set", feed, token);
                break;
            }
            page = fetch(FeedPosition::Page(&token))?;
        }

        let Some(delta) = next_delta else {
            debug!("[FEED] {} feed exhausted at {:?} (no delta token)", feed, cursor);
            break;
        };
        if delta == cursor {
            debug!("[FEED] {} feed exhausted at {:?} (same token returned)", feed, cursor);
            break;
        }
        if !visited.insert(delta.clone()) {
            // A -> B -> A: stay on the newest cursor rather than spin
            warn!(
                "[FEED] {} feed cycled back to {:?}, stopping at {:?}",
                feed, delta, cursor
            );
            break;
        }

        debug!("[FEED] {} feed advancing {:?} -> {:?}", feed, cursor, delta);
        cursor = delta;
    }

    Ok(FeedBatch {
        records,
        cursor,
        page_sets,
        pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{FakeProvider, deleted, record};

    const T0: &str = "2024-06-20T10:00:00Z";

    #[test]
    fn test_same_delta_token_terminates_without_advancing() {
        let provider = FakeProvider::new();
        provider.updated("delta:X", FeedPage::new(vec![]).with_next_delta("X"));

        let batch = fetch_updated(&provider, "tok", "X").unwrap();
        assert_eq!(batch.cursor, "X");
        assert!(!batch.advanced_from("X"));
        assert_eq!(provider.calls(), vec!["updated:delta:X"]);
    }

    #[test]
    fn test_missing_delta_token_keeps_cursor() {
        let provider = FakeProvider::new();
        provider.updated(
            "delta:A",
            FeedPage::new(vec![record("m1", "t1", "a@x.io", &[], T0)]),
        );

        let batch = fetch_updated(&provider, "tok", "A").unwrap();
        assert_eq!(batch.cursor, "A");
        assert_eq!(batch.records.len(), 1);
    }

    #[test]
    fn test_pages_are_unioned_and_cursor_advances() {
        let provider = FakeProvider::new();
        provider.updated(
            "delta:A",
            FeedPage::new(vec![record("m1", "t1", "a@x.io", &[], T0)]).with_next_page("P2"),
        );
        provider.updated(
            "page:P2",
            FeedPage::new(vec![record("m2", "t1", "b@x.io", &[], T0)]).with_next_delta("B"),
        );
        provider.updated(
            "delta:B",
            FeedPage::new(vec![record("m3", "t2", "c@x.io", &[], T0)]).with_next_delta("B"),
        );

        let batch = fetch_updated(&provider, "tok", "A").unwrap();
        let ids: Vec<&str> = batch
            .records
            .iter()
            .map(|r| r.id.as_ref().unwrap().as_str())
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(batch.cursor, "B");
        assert_eq!(batch.page_sets, 2);
        assert_eq!(batch.pages, 3);
        assert_eq!(
            provider.calls(),
            vec!["updated:delta:A", "updated:page:P2", "updated:delta:B"]
        );
    }

    #[test]
    fn test_delta_token_cycle_terminates() {
        let provider = FakeProvider::new();
        provider.updated("delta:A", FeedPage::new(vec![]).with_next_delta("B"));
        provider.updated("delta:B", FeedPage::new(vec![]).with_next_delta("A"));

        let batch = fetch_updated(&provider, "tok", "A").unwrap();
        assert_eq!(batch.cursor, "B");
        assert_eq!(provider.calls().len(), 2);
    }

    #[test]
    fn test_repeated_page_token_terminates() {
        let provider = FakeProvider::new();
        provider.updated("delta:A", FeedPage::new(vec![]).with_next_page("P"));
        provider.updated("page:P", FeedPage::new(vec![]).with_next_page("P"));

        let batch = fetch_updated(&provider, "tok", "A").unwrap();
        assert_eq!(batch.cursor, "A");
        assert_eq!(provider.calls(), vec!["updated:delta:A", "updated:page:P"]);
    }

    #[test]
    fn test_deleted_feed_collects_ids() {
        let provider = FakeProvider::new();
        provider.deleted(
            "delta:D",
            FeedPage::new(deleted(&["m1", "m2"])).with_next_page("Q"),
        );
        provider.deleted("page:Q", FeedPage::new(deleted(&["m3"])).with_next_delta("E"));

        let batch = fetch_deleted(&provider, "tok", "D").unwrap();
        let ids: Vec<&str> = batch.records.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(batch.cursor, "E");
    }

    #[test]
    fn test_transport_failure_propagates() {
        let provider = FakeProvider::new();
        provider.updated("delta:A", FeedPage::new(vec![]).with_next_page("P"));
        provider.fail(
            "updated:page:P",
            TransportError::Status {
                status: 401,
                body: "expired".to_string(),
            },
        );

        let err = fetch_updated(&provider, "tok", "A").unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn test_resume_from_returned_cursor() {
        let provider = FakeProvider::new();
        provider.updated("delta:A", FeedPage::new(vec![]).with_next_delta("B"));
        provider.updated(
            "delta:B",
            FeedPage::new(vec![record("m9", "t9", "z@x.io", &[], T0)]),
        );

        let first = fetch_updated(&provider, "tok", "A").unwrap();
        let resumed = fetch_updated(&provider, "tok", &first.cursor).unwrap();
        assert_eq!(resumed.cursor, "B");
        assert_eq!(resumed.records.len(), 1);
    }
}
