//! Binance spot klines source.
//!
//! Pages forward through `/api/v3/klines` in batches of at most
//! `MAX_KLINES_PER_REQUEST` candles until the requested range is exhausted.

use super::circuit_breaker::CircuitBreaker;
use super::http::HttpFetcher;
use super::provider::{MarketDataSource, SourceError};
use crate::domain::{Interval, Row, CLOSE, HIGH, LOW, OPEN, VOLUME};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

pub const MAX_KLINES_PER_REQUEST: usize = 1000;

/// One kline as returned by the REST API (positional array).
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct BinanceKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    i64,    // 8: Number of trades
    String, // 9: Taker buy base asset volume
    String, // 10: Taker buy quote asset volume
    String, // 11: Ignore
);

pub struct BinanceSource {
    http: HttpFetcher,
    base_url: String,
    batch_size: usize,
}

impl BinanceSource {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, SourceError> {
        Ok(Self {
            http: HttpFetcher::new(circuit_breaker)?,
            base_url: "https://api.binance.com".to_string(),
            batch_size: MAX_KLINES_PER_REQUEST,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_KLINES_PER_REQUEST);
        self
    }

    fn klines_url(&self, symbol: &str, interval: Interval, start_ms: i64, end_ms: i64) -> String {
        format!(
            "{}/api/v3/klines?symbol={}&interval={interval}&startTime={start_ms}&endTime={end_ms}&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            self.batch_size
        )
    }

    fn parse_price(raw: &str, field: &str) -> Result<f64, SourceError> {
        raw.parse::<f64>().map_err(|e| {
            SourceError::ResponseFormatChanged(format!("bad {field} value '{raw}': {e}"))
        })
    }

    fn kline_to_row(symbol: &str, interval: Interval, k: &BinanceKline) -> Result<Row, SourceError> {
        let timestamp = DateTime::from_timestamp_millis(k.0).ok_or_else(|| {
            SourceError::ResponseFormatChanged(format!("invalid open time: {}", k.0))
        })?;
        Ok(Row::new(symbol, interval, timestamp)
            .with_field(OPEN, Self::parse_price(&k.1, OPEN)?)
            .with_field(HIGH, Self::parse_price(&k.2, HIGH)?)
            .with_field(LOW, Self::parse_price(&k.3, LOW)?)
            .with_field(CLOSE, Self::parse_price(&k.4, CLOSE)?)
            .with_field(VOLUME, Self::parse_price(&k.5, VOLUME)?)
            .with_field("quote_volume", Self::parse_price(&k.7, "quote_volume")?)
            .with_field("trades", k.8 as f64))
    }

    fn fetch_symbol(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<Row>, SourceError> {
        let end_ms = end.timestamp_millis();
        let mut cursor = start.timestamp_millis();
        let mut rows = Vec::new();

        while cursor <= end_ms {
            let url = self.klines_url(symbol, interval, cursor, end_ms);
            let batch: Vec<BinanceKline> = self.http.get_json(&url).map_err(|e| match e {
                // -1121: Invalid symbol.
                SourceError::Rejected { status: 400, ref body } if body.contains("-1121") => {
                    SourceError::SymbolNotFound {
                        symbol: symbol.to_string(),
                    }
                }
                other => other,
            })?;

            let Some(last) = batch.last() else {
                break;
            };
            let next_cursor = last.0 + interval.step_millis();
            let full_batch = batch.len() >= self.batch_size;

            for kline in &batch {
                rows.push(Self::kline_to_row(symbol, interval, kline)?);
            }
            debug!(symbol, batch = batch.len(), cursor, "fetched kline batch");

            if !full_batch || next_cursor <= cursor {
                break;
            }
            cursor = next_cursor;
        }

        Ok(rows)
    }
}

impl MarketDataSource for BinanceSource {
    fn name(&self) -> &str {
        "binance"
    }

    fn download(
        &self,
        symbols: &[&str],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<Row>, SourceError> {
        let mut rows = Vec::new();
        for symbol in symbols {
            rows.extend(self.fetch_symbol(symbol, start, end, interval)?);
        }
        Ok(rows)
    }

    fn is_available(&self) -> bool {
        self.http.is_available()
    }
}
