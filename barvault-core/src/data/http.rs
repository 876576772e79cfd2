//! Blocking HTTP client with retry, backoff and circuit breaker handling.
//!
//! Shared by the network sources. Transient failures (timeouts, 429, 5xx) are
//! retried with exponential backoff; bans trip the breaker immediately; other
//! client errors are returned as `Rejected` for the source to interpret.
//! A 429 with `Retry-After` waits at least that long, up to `MAX_RETRY_AFTER`.

use super::circuit_breaker::CircuitBreaker;
use super::provider::SourceError;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Binance answers with 418 once an IP is banned after ignoring 429s.
const IM_A_TEAPOT: u16 = 418;

/// Longest wait honoured from a `Retry-After` header.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Wait before retry number `attempt` (1-based): exponential backoff, raised
/// to the server's `Retry-After` when it asked for longer.
fn retry_delay(base: Duration, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    let backoff = base.saturating_mul(factor);
    match retry_after {
        Some(wait) => backoff.max(wait.min(MAX_RETRY_AFTER)),
        None => backoff,
    }
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpFetcher {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| SourceError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    pub fn with_retry(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    pub fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }

    /// GET `url` and decode the JSON body.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(SourceError::CircuitBreakerTripped);
        }

        let mut last_error = None;
        let mut retry_after = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = retry_delay(self.base_delay, attempt, retry_after.take());
                debug!(attempt, delay_ms = delay.as_millis() as u64, url, "retrying request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(SourceError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(url).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(SourceError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(SourceError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();

            if status == StatusCode::FORBIDDEN || status.as_u16() == IM_A_TEAPOT {
                warn!(status = status.as_u16(), url, "provider ban detected, tripping breaker");
                self.circuit_breaker.trip();
                return Err(SourceError::CircuitBreakerTripped);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let header = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                retry_after = header.map(Duration::from_secs);
                last_error = Some(SourceError::RateLimited {
                    retry_after_secs: header.unwrap_or(60),
                });
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(SourceError::AuthenticationRequired(format!("HTTP 401 for {url}")));
            }

            if status.is_server_error() {
                self.circuit_breaker.record_failure();
                last_error = Some(SourceError::Other(format!("HTTP {status} for {url}")));
                continue;
            }

            if !status.is_success() {
                let body = resp.text().unwrap_or_default();
                return Err(SourceError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            let decoded: T = resp.json().map_err(|e| {
                SourceError::ResponseFormatChanged(format!("failed to parse response: {e}"))
            })?;
            self.circuit_breaker.record_success();
            return Ok(decoded);
        }

        Err(last_error.unwrap_or_else(|| SourceError::Other("max retries exceeded".into())))
    }
}
