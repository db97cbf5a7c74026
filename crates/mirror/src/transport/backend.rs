//! HTTP backends
//!
//! Uses synchronous HTTP (ureq) to stay executor-agnostic; the dispatcher
//! runs sync cycles on blocking threads.

use std::time::Duration;

use super::{HttpRequest, HttpResponse, Method, TransportError};
use crate::config::TransportSettings;

/// Sends a single request, with no retry of its own
pub trait HttpBackend: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// ureq agent configured with the transport timeouts
pub struct UreqBackend {
    agent: ureq::Agent,
}

impl UreqBackend {
    pub fn new(settings: &TransportSettings) -> Self {
        let read = Some(Duration::from_millis(settings.read_timeout_ms));
        let write = Some(Duration::from_millis(settings.write_timeout_ms));

        let config = ureq::Agent::config_builder()
            // Status codes are classified by the retry layer, not by ureq
            .http_status_as_error(false)
            .timeout_connect(Some(Duration::from_millis(settings.connect_timeout_ms)))
            .timeout_send_request(write)
            .timeout_send_body(write)
            .timeout_recv_response(read)
            .timeout_recv_body(read)
            .max_idle_age(Duration::from_millis(settings.pool_timeout_ms))
            .build();

        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl HttpBackend for UreqBackend {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let result = match request.method {
            Method::Get => decorate(self.agent.get(&request.url), request).call(),
            Method::Delete => decorate(self.agent.delete(&request.url), request).call(),
            Method::Post | Method::Put => {
                let builder = if request.method == Method::Post {
                    self.agent.post(&request.url)
                } else {
                    self.agent.put(&request.url)
                };
                let builder = decorate(builder, request);
                match &request.body {
                    Some(body) => builder.send_json(body),
                    None => builder.send_empty(),
                }
            }
        };

        let mut response = result.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.body_mut().read_to_string().map_err(classify)?;

        Ok(HttpResponse { status, body })
    }
}

fn decorate<B>(mut builder: ureq::RequestBuilder<B>, request: &HttpRequest) -> ureq::RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    for (name, value) in &request.params {
        builder = builder.query(name, value);
    }
    builder
}

/// Map ureq failures onto the transport taxonomy
fn classify(err: ureq::Error) -> TransportError {
    match &err {
        ureq::Error::StatusCode(status) => TransportError::Status {
            status: *status,
            body: String::new(),
        },
        ureq::Error::Timeout(_)
        | ureq::Error::Io(_)
        | ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound => TransportError::Connection(err.to_string()),
        _ => TransportError::Request(err.to_string()),
    }
}
