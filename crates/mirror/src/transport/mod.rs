//! Outbound HTTP to the mail provider
//!
//! Requests are described by [`HttpRequest`] and sent through an
//! [`HttpBackend`]. [`RetryingTransport`] wraps a backend with timeouts from
//! configuration, bounded retries and exponential backoff with jitter.

mod backend;
mod retry;

pub use backend::{HttpBackend, UreqBackend};
pub use retry::{RetryPolicy, RetryingTransport};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// HTTP method of an outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A fully described outbound call
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Query parameters, encoded by the backend
    pub params: Vec<(String, String)>,
    /// JSON body for POST/PUT
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            params: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach `Authorization: Bearer <token>`
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Serialize `body` as the JSON payload
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, TransportError> {
        let value = serde_json::to_value(body)
            .map_err(|e| TransportError::Request(format!("unserializable body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }
}

/// What came back from the provider
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Failure of an outbound call
///
/// `Status` keeps the code and body so callers can turn it into a
/// user-facing error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("invalid request: {0}")]
    Request(String),
    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

impl TransportError {
    /// HTTP status, if the provider answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether `policy` allows another attempt after this error.
    ///
    /// Connection and timeout failures always qualify; statuses only when
    /// configured.
    pub fn is_retryable(&self, policy: &RetryPolicy) -> bool {
        match self {
            TransportError::Connection(_) => true,
            TransportError::Status { status, .. } => policy.retries_status(*status),
            TransportError::Request(_) | TransportError::Decode(_) => false,
        }
    }
}
