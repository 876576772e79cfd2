//! Yahoo Finance data source.
//!
//! Fetches OHLCV bars from Yahoo's v8 chart API. Yahoo has no official API and
//! is subject to unannounced format changes, so every parse failure surfaces as
//! `ResponseFormatChanged` instead of guessing.

use super::circuit_breaker::CircuitBreaker;
use super::http::HttpFetcher;
use super::provider::{MarketDataSource, SourceError};
use crate::domain::{Interval, Row, CLOSE, HIGH, LOW, OPEN, VOLUME};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance data source.
pub struct YahooSource {
    http: HttpFetcher,
    base_url: String,
}

impl YahooSource {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, SourceError> {
        Ok(Self {
            http: HttpFetcher::new(circuit_breaker)?,
            base_url: "https://query2.finance.yahoo.com".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Yahoo's name for an interval, if it serves it.
    fn yahoo_interval(interval: Interval) -> Option<&'static str> {
        match interval {
            Interval::M1 => Some("1m"),
            Interval::M5 => Some("5m"),
            Interval::M15 => Some("15m"),
            Interval::M30 => Some("30m"),
            Interval::H1 => Some("60m"),
            Interval::D1 => Some("1d"),
            Interval::W1 => Some("1wk"),
            _ => None,
        }
    }

    /// Build the chart API URL for a symbol and time range.
    fn chart_url(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>, interval: &str) -> String {
        // period2 is exclusive on Yahoo's side.
        let start_ts = start.timestamp();
        let end_ts = end.timestamp() + 1;
        format!(
            "{}/v8/finance/chart/{symbol}\
             ?period1={start_ts}&period2={end_ts}&interval={interval}\
             &includeAdjustedClose=true",
            self.base_url
        )
    }

    /// Parse the chart API response into rows.
    fn parse_response(
        symbol: &str,
        interval: Interval,
        resp: ChartResponse,
    ) -> Result<Vec<Row>, SourceError> {
        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => SourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            Some(err) => {
                SourceError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
            }
            None => SourceError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::ResponseFormatChanged("result array is empty".into()))?;

        // No timestamps means no trading in the range, not a broken response.
        let Some(timestamps) = data.timestamp else {
            return Ok(Vec::new());
        };

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::ResponseFormatChanged("no quote data".into()))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let mut rows = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let timestamp = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
                SourceError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
            })?;

            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            // Holidays and halted sessions come back with null prices.
            let (Some(open), Some(high), Some(low), Some(close)) = (open, high, low, close) else {
                debug!(symbol, ts, "skipping bar with null prices");
                continue;
            };

            let mut row = Row::new(symbol, interval, timestamp)
                .with_field(OPEN, open)
                .with_field(HIGH, high)
                .with_field(LOW, low)
                .with_field(CLOSE, close)
                .with_field(VOLUME, volume.unwrap_or(0.0));
            if let Some(adj) = adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten()) {
                row = row.with_field("adj_close", adj);
            }
            rows.push(row);
        }

        Ok(rows)
    }

    fn fetch_symbol(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<Row>, SourceError> {
        let yahoo_interval =
            Self::yahoo_interval(interval).ok_or_else(|| SourceError::UnsupportedInterval {
                source_name: self.name().to_string(),
                interval,
            })?;

        let url = self.chart_url(symbol, start, end, yahoo_interval);
        let chart: ChartResponse = self.http.get_json(&url).map_err(|e| match e {
            SourceError::Rejected { status: 404, .. } => SourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            other => other,
        })?;
        Self::parse_response(symbol, interval, chart)
    }
}

impl MarketDataSource for YahooSource {
    fn name(&self) -> &str {
        "yahoo"
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
