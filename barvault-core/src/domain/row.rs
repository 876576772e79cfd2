//! Row: one timestamped bar of a series.

use super::interval::Interval;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const OPEN: &str = "open";
pub const HIGH: &str = "high";
pub const LOW: &str = "low";
pub const CLOSE: &str = "close";
pub const VOLUME: &str = "volume";

/// Fields every fetched row must carry.
pub const BASE_FIELDS: [&str; 5] = [OPEN, HIGH, LOW, CLOSE, VOLUME];

/// Fields that must be finite on fetched rows.
pub const PRICE_FIELDS: [&str; 4] = [OPEN, HIGH, LOW, CLOSE];

/// Named numeric fields of a row, ordered by name.
pub type Fields = BTreeMap<String, f64>;

/// A single bar for `(symbol, interval, timestamp)`.
///
/// Identity is the triple; a later upsert with the same key replaces the row
/// wholesale. Feature columns are merged into `fields` alongside OHLCV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub symbol: String,
    pub interval: Interval,
    pub timestamp: DateTime<Utc>,
    pub fields: Fields,
}

impl Row {
    pub fn new(symbol: impl Into<String>, interval: Interval, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            timestamp,
            fields: Fields::new(),
        }
    }

    /// Convenience constructor for a full OHLCV bar.
    #[allow(clippy::too_many_arguments)]
    pub fn ohlcv(
        symbol: impl Into<String>,
        interval: Interval,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self::new(symbol, interval, timestamp)
            .with_field(OPEN, open)
            .with_field(HIGH, high)
            .with_field(LOW, low)
            .with_field(CLOSE, close)
            .with_field(VOLUME, volume)
    }

    pub fn with_field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    pub fn close(&self) -> Option<f64> {
        self.get(CLOSE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ohlcv_sets_all_base_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let row = Row::ohlcv("SPY", Interval::D1, ts, 1.0, 2.0, 0.5, 1.5, 100.0);
        for field in BASE_FIELDS {
            assert!(row.get(field).is_some(), "missing {field}");
        }
        assert_eq!(row.close(), Some(1.5));
        assert_eq!(row.get("sma_20"), None);
    }
}
