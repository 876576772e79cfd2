//! Exponential Moving Average (EMA).
//!
//! Recursive: EMA[t] = alpha * close[t] + (1 - alpha) * EMA[t-1]
//! Seed: EMA[period-1] = SMA of first `period` close values.
//! Lookback: period - 1.

use super::{closes, FeatureCalculator, FeatureColumn};
use crate::domain::Row;

#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    name: String,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self {
            period,
            name: format!("ema_{period}"),
        }
    }
}

impl FeatureCalculator for Ema {
    fn id(&self) -> &str {
        "ema"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, rows: &[Row]) -> Result<Vec<FeatureColumn>, String> {
        let values = ema_of_series(&closes(rows)?, self.period);
        Ok(vec![FeatureColumn::new(self.name.clone(), values)])
    }
}

/// Compute raw EMA values from a pre-extracted f64 slice.
/// Used by MACD for the EMA of an arbitrary series.
pub fn ema_of_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];

    if n < period || period == 0 {
        return result;
    }

    let alpha = 2.0 / (period as f64 + 1.0);

    // Seed: SMA of first `period` values
    let mut sum = 0.0;
    for &v in values.iter().take(period) {
        if v.is_nan() {
            return result;
        }
        sum += v;
    }
    let seed = sum / period as f64;
    result[period - 1] = seed;

    let mut prev = seed;
    for i in period..n {
        if values[i].is_nan() {
            return result;
        }
        let ema = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = ema;
        prev = ema;
    }

    result
}
