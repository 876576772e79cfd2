//! Synthetic source for offline runs and tests.
//!
//! Every bar is a pure function of `(seed, symbol, timestamp)`: a smooth price
//! path with per-bar noise drawn from an RNG seeded by hashing the three. Two
//! overlapping downloads therefore agree bar for bar, which is what makes the
//! source safe to mix with cached data.

use super::provider::{MarketDataSource, SourceError};
use crate::domain::{Interval, Row, TimeWindow};
use chrono::{DateTime, Datelike, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct SyntheticSource {
    seed: u64,
    base_price: f64,
    skip_weekends: bool,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SyntheticSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            base_price: 100.0,
            skip_weekends: false,
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    /// Leave Saturdays and Sundays out, like an equities calendar.
    pub fn with_weekends_skipped(mut self, skip: bool) -> Self {
        self.skip_weekends = skip;
        self
    }

    fn rng_for(&self, symbol: &str, ts: DateTime<Utc>) -> StdRng {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(symbol.as_bytes());
        hasher.update(&ts.timestamp_millis().to_le_bytes());
        StdRng::from_seed(*hasher.finalize().as_bytes())
    }

    /// Deterministic price level at grid index `k`.
    fn level(&self, symbol: &str, k: i64) -> f64 {
        let phase = (blake3::hash(symbol.as_bytes()).as_bytes()[0] as f64) / 16.0;
        let k = k as f64;
        self.base_price * (0.15 * (k / 40.0 + phase).sin() + 0.05 * (k / 7.0).sin()).exp()
    }

    fn bar(&self, symbol: &str, interval: Interval, ts: DateTime<Utc>) -> Row {
        let k = ts.timestamp_millis().div_euclid(interval.step_millis());
        let mut rng = self.rng_for(symbol, ts);

        let open = self.level(symbol, k - 1);
        let close = self.level(symbol, k) * (1.0 + rng.gen_range(-0.005..0.005));
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
        let volume = rng.gen_range(500_000..5_000_000u64) as f64;

        Row::ohlcv(symbol, interval, ts, open, high, low, close, volume)
    }
}

impl MarketDataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn download(
        &self,
        symbols: &[&str],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<Row>, SourceError> {
        let Some(window) = TimeWindow::new(start, end).snap(interval) else {
            return Ok(Vec::new());
        };

        let mut rows = Vec::new();
        for symbol in symbols {
            let mut ts = window.start;
            while ts <= window.end {
                let weekend = matches!(ts.weekday(), Weekday::Sat | Weekday::Sun);
                if !(self.skip_weekends && weekend) {
                    rows.push(self.bar(symbol, interval, ts));
                }
                ts += interval.step();
            }
        }
        Ok(rows)
    }
}
