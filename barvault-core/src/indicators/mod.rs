//! Feature calculators.
//!
//! A calculator is a pure function from a symbol's row history to one or more
//! named numeric columns of the same length. Positions where the output is not
//! defined yet (warmup) hold `f64::NAN`; the pipeline turns those into absent
//! fields, so NaN never reaches a caller.
//!
//! No value at row t may depend on rows after t.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use atr::Atr;
pub use bollinger::Bollinger;
pub use ema::Ema;
pub use macd::Macd;
pub use rsi::Rsi;
pub use sma::Sma;

use crate::domain::{Row, CLOSE};

/// One named output series.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    pub name: String,
    pub values: Vec<f64>,
}

impl FeatureColumn {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

pub trait FeatureCalculator: Send + Sync {
    /// Calculator kind, e.g. "sma".
    fn id(&self) -> &str;

    /// Instance name including parameters, e.g. "sma_20".
    fn name(&self) -> &str;

    /// Field names this instance writes.
    fn outputs(&self) -> Vec<String>;

    /// Rows needed before the first defined output.
    fn lookback(&self) -> usize;

    /// Compute every output over the full series.
    ///
    /// Errors are reported as plain text; the pipeline wraps them with the
    /// calculator and symbol.
    fn compute(&self, rows: &[Row]) -> Result<Vec<FeatureColumn>, String>;
}

/// Extract one field as a dense series. Missing or non-finite values fail.
pub fn field_series(rows: &[Row], field: &str) -> Result<Vec<f64>, String> {
    rows.iter()
        .map(|row| match row.get(field) {
            Some(v) if v.is_finite() => Ok(v),
            Some(v) => Err(format!("non-finite {field} ({v}) at {}", row.timestamp)),
            None => Err(format!("missing {field} at {}", row.timestamp)),
        })
        .collect()
}

pub fn closes(rows: &[Row]) -> Result<Vec<f64>, String> {
    field_series(rows, CLOSE)
}

/// Rows built from close prices for tests.
///
/// open = previous close (or close for the first row), high = max(open, close)
/// + 1, low = min(open, close) - 1, volume = 1000. Daily from 2024-01-02.
#[cfg(test)]
pub fn make_rows(closes: &[f64]) -> Vec<Row> {
    use crate::domain::Interval;
    use chrono::{TimeZone, Utc};

    let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Row::ohlcv(
                "TEST",
                Interval::D1,
                base + chrono::Duration::days(i as i64),
                open,
                open.max(close) + 1.0,
                open.min(close) - 1.0,
                close,
                1000.0,
            )
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for calculator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
