//! Bounded retries with exponential backoff

use log::{debug, warn};
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;

use super::{HttpBackend, HttpRequest, HttpResponse, TransportError, UreqBackend};
use crate::config::TransportSettings;

/// When and how long to wait before trying a call again
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay
    pub jitter: Duration,
    pub retryable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&TransportSettings::default())
    }
}

impl From<&TransportSettings> for RetryPolicy {
    fn from(settings: &TransportSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: Duration::from_millis(settings.jitter_ms),
            retryable_statuses: settings.retryable_statuses.iter().copied().collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately, for tests and local tooling
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn retries_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Deterministic part of the wait after failed attempt `attempt` (0-based):
    /// `min(max_delay, base_delay * 2^attempt)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Full wait: backoff plus a random jitter in `[0, jitter]`
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.backoff(attempt) + jitter
    }
}

/// Transport that retries transient failures
pub struct RetryingTransport<B = UreqBackend> {
    backend: B,
    policy: RetryPolicy,
}

impl RetryingTransport<UreqBackend> {
    /// Transport over ureq with timeouts and retry policy from settings
    pub fn from_settings(settings: &TransportSettings) -> Self {
        Self::new(UreqBackend::new(settings), RetryPolicy::from(settings))
    }
}

impl<B: HttpBackend> RetryingTransport<B> {
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Send `request`, retrying retryable failures.
    ///
    /// Non-retryable errors return immediately. Once the attempt budget is
    /// spent the last error is returned as-is.
    pub fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut attempt = 0u32;

        loop {
            let error = match self.backend.send(request) {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => TransportError::Status {
                    status: response.status,
                    body: response.body,
                },
                Err(e) => e,
            };

            if !error.is_retryable(&self.policy) {
                debug!("[HTTP] {} {} failed permanently: {}", request.method, request.url, error);
                return Err(error);
            }

            if attempt + 1 >= self.policy.max_attempts {
                warn!(
                    "[HTTP] {} {} failed after {} attempts: {}",
                    request.method,
                    request.url,
                    attempt + 1,
                    error
                );
                return Err(error);
            }

            let delay = self.policy.delay(attempt);
            warn!(
                "[HTTP] {} {} failed (attempt {}/{}), retrying in {:?}: {}",
                request.method,
                request.url,
                attempt + 1,
                self.policy.max_attempts,
                delay,
                error
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }
}
