//! Moving Average Convergence Divergence (MACD).
//!
//! macd = EMA(fast) - EMA(slow), defined from index slow-1.
//! macd_signal = EMA(signal) of macd, seeded at the first full signal window.
//! macd_histogram = macd - macd_signal.
//! Lookback: slow - 1 + signal - 1.

use super::ema::ema_of_series;
use super::{closes, FeatureCalculator, FeatureColumn};
use crate::domain::Row;

pub const MACD: &str = "macd";
pub const MACD_SIGNAL: &str = "macd_signal";
pub const MACD_HISTOGRAM: &str = "macd_histogram";

#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
    name: String,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast >= 1 && signal >= 1, "MACD periods must be >= 1");
        assert!(fast < slow, "MACD fast period must be below slow period");
        Self {
            fast,
            slow,
            signal,
            name: format!("macd_{fast}_{slow}_{signal}"),
        }
    }
}

impl FeatureCalculator for Macd {
    fn id(&self) -> &str {
        "macd"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<String> {
        vec![
            MACD.to_string(),
            MACD_SIGNAL.to_string(),
            MACD_HISTOGRAM.to_string(),
        ]
    }

    fn lookback(&self) -> usize {
        self.slow - 1 + self.signal - 1
    }

    fn compute(&self, rows: &[Row]) -> Result<Vec<FeatureColumn>, String> {
        let closes = closes(rows)?;
        let n = closes.len();
        let fast = ema_of_series(&closes, self.fast);
        let slow = ema_of_series(&closes, self.slow);

        let macd: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();

        let mut signal = vec![f64::NAN; n];
        let start = self.slow - 1;
        if n > start {
            let tail = ema_of_series(&macd[start..], self.signal);
            signal[start..].copy_from_slice(&tail);
        }

        let histogram = macd.iter().zip(&signal).map(|(m, s)| m - s).collect();

        Ok(vec![
            FeatureColumn::new(MACD, macd),
            FeatureColumn::new(MACD_SIGNAL, signal),
            FeatureColumn::new(MACD_HISTOGRAM, histogram),
        ])
    }
}
