//! Provider HTTP client
//!
//! Thin mapping of the change-feed endpoints onto [`RetryingTransport`].
//! Retries, timeouts and backoff all live in the transport.

use log::debug;
use serde::de::DeserializeOwned;

use super::api::{DeletedRecord, EmailRecord, FeedPage, SyncStartResponse};
use super::{FeedPosition, MailProvider};
use crate::config::Settings;
use crate::models::MessageId;
use crate::transport::{HttpBackend, HttpRequest, RetryingTransport, TransportError, UreqBackend};

/// Client for an Aurinko-style unified mail API
pub struct AurinkoClient<B = UreqBackend> {
    transport: RetryingTransport<B>,
    base_url: String,
}

impl AurinkoClient<UreqBackend> {
    /// Client configured from the provider and transport settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.provider.base_url,
            RetryingTransport::from_settings(&settings.transport),
        )
    }
}

impl<B: HttpBackend> AurinkoClient<B> {
    pub fn new(base_url: &str, transport: RetryingTransport<B>) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn transport(&self) -> &RetryingTransport<B> {
        &self.transport
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn call<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, TransportError> {
        let response = self.transport.execute(&request)?;
        response.json()
    }

    fn feed<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
        position: FeedPosition<'_>,
    ) -> Result<FeedPage<T>, TransportError> {
        let request = HttpRequest::get(self.url(path)).bearer(access_token);
        let request = match position {
            FeedPosition::Cursor(token) => request.query("deltaToken", token),
            FeedPosition::Page(token) => request.query("pageToken", token),
        };

        let page: FeedPage<T> = self.call(request)?;
        debug!(
            "[HTTP] {} page: {} records, next page {:?}, next delta {:?}",
            path,
            page.records.len(),
            page.next_page_token,
            page.next_delta_token
        );
        Ok(page)
    }
}

impl<B: HttpBackend> MailProvider for AurinkoClient<B> {
    fn start_sync(
        &self,
        access_token: &str,
        days_within: u32,
    ) -> Result<SyncStartResponse, TransportError> {
        let request = HttpRequest::post(self.url("/email/sync"))
            .bearer(access_token)
            .query("daysWithin", days_within.to_string());
        self.call(request)
    }

    fn fetch_updated(
        &self,
        access_token: &str,
        position: FeedPosition<'_>,
    ) -> Result<FeedPage<EmailRecord>, TransportError> {
        self.feed("/email/sync/updated", access_token, position)
    }

    fn fetch_deleted(
        &self,
        access_token: &str,
        position: FeedPosition<'_>,
    ) -> Result<FeedPage<DeletedRecord>, TransportError> {
        self.feed("/email/sync/deleted", access_token, position)
    }

    fn fetch_message(
        &self,
        access_token: &str,
        id: &MessageId,
    ) -> Result<EmailRecord, TransportError> {
        let path = format!("/email/messages/{}", urlencoding::encode(id.as_str()));
        let request = HttpRequest::get(self.url(&path)).bearer(access_token);
        self.call(request)
    }
}
