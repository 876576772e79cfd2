//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|)
//! ATR uses Wilder smoothing (EMA with alpha = 1/period).
//! Lookback: period (the first row has no previous close).

use super::{closes, field_series, FeatureCalculator, FeatureColumn};
use crate::domain::{Row, HIGH, LOW};

#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    name: String,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self {
            period,
            name: format!("atr_{period}"),
        }
    }
}

/// True Range per row. TR[0] is NaN: there is no previous close.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let n = high.len().min(low.len()).min(close.len());
    let mut tr = vec![f64::NAN; n];
    for i in 1..n {
        let (h, l, pc) = (high[i], low[i], close[i - 1]);
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }
    tr
}

/// Wilder smoothing with alpha = 1/period.
///
/// Leading NaNs are skipped; the seed is the mean of the first `period`
/// values after them. A NaN after the seed ends the series.
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 {
        return result;
    }

    let Some(seed_start) = values.iter().position(|v| !v.is_nan()) else {
        return result;
    };
    let seed_end = seed_start + period;
    if seed_end > n || values[seed_start..seed_end].iter().any(|v| v.is_nan()) {
        return result;
    }

    let seed = values[seed_start..seed_end].iter().sum::<f64>() / period as f64;
    result[seed_end - 1] = seed;

    let alpha = 1.0 / period as f64;
    let mut prev = seed;
    for i in seed_end..n {
        if values[i].is_nan() {
            return result;
        }
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }

    result
}

impl FeatureCalculator for Atr {
    fn id(&self) -> &str {
        "atr"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, rows: &[Row]) -> Result<Vec<FeatureColumn>, String> {
        let high = field_series(rows, HIGH)?;
        let low = field_series(rows, LOW)?;
        let close = closes(rows)?;
        let values = wilder_smooth(&true_range(&high, &low, &close), self.period);
        Ok(vec![FeatureColumn::new(self.name.clone(), values)])
    }
}
