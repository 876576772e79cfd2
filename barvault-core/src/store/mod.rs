//! Range stores: persisted rows plus the set of ranges known to be complete.
//!
//! A store never fetches. Callers resolve gaps against `cached_ranges`, fetch
//! what is missing, then `upsert` the rows together with the window they
//! cover. Rows land before the range is committed, so an interrupted upsert
//! can leave extra rows behind but never a range without its rows.

pub mod memory;
pub mod parquet;

pub use memory::MemoryRangeStore;
pub use parquet::ParquetRangeStore;

use crate::domain::{CachedRange, Interval, Row, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a range store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt store entry {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("row for '{found}' cannot be stored under '{expected}'")]
    KeyMismatch { expected: String, found: String },
}

/// Per-key summary used by `cache status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStatus {
    pub symbol: String,
    pub interval: Interval,
    pub ranges: Vec<CachedRange>,
    pub row_count: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Persistent, range-addressable storage of rows keyed by `(symbol, interval)`.
pub trait RangeStore: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Disjoint, non-adjacent ranges known to be fully populated, ascending.
    fn cached_ranges(&self, symbol: &str, interval: Interval)
        -> Result<Vec<CachedRange>, StoreError>;

    /// Write rows (overwriting by timestamp), then record `covered` as cached,
    /// coalescing it with touching or overlapping ranges.
    fn upsert(
        &self,
        symbol: &str,
        interval: Interval,
        rows: Vec<Row>,
        covered: TimeWindow,
    ) -> Result<(), StoreError>;

    /// Rows inside `window`, ascending by timestamp.
    fn read(&self, symbol: &str, interval: Interval, window: TimeWindow)
        -> Result<Vec<Row>, StoreError>;

    /// Every key the store holds.
    fn status(&self) -> Result<Vec<KeyStatus>, StoreError>;
}

pub(crate) fn check_keys(symbol: &str, interval: Interval, rows: &[Row]) -> Result<(), StoreError> {
    for row in rows {
        if row.symbol != symbol || row.interval != interval {
            return Err(StoreError::KeyMismatch {
                expected: format!("{symbol}/{interval}"),
                found: format!("{}/{}", row.symbol, row.interval),
            });
        }
    }
    Ok(())
}
