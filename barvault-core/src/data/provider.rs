//! Market data source trait and structured error types.
//!
//! The MarketDataSource trait abstracts over providers (Yahoo Finance, Binance,
//! synthetic) so the engine can swap implementations and mock them in tests.
//! Retry and rate-limit handling belong to the source; the engine calls each
//! source at most once per gap.

use crate::domain::{Interval, Row};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Structured error types for source operations.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("{source_name} does not serve {interval} bars")]
    UnsupportedInterval {
        source_name: String,
        interval: Interval,
    },

    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("source error: {0}")]
    Other(String),
}

/// A provider of raw bars.
///
/// Implementations return rows for the requested symbols over `[start, end]`
/// at `interval`. They may return rows slightly outside the range; the fetch
/// gateway trims and validates everything before it reaches a store.
pub trait MarketDataSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    fn download(
        &self,
        symbols: &[&str],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<Row>, SourceError>;

    /// Check if the source is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}
