//! Source registry and fetch gateway.
//!
//! The gateway is the only code that talks to a `MarketDataSource`. It asks
//! for exactly one gap at a time and turns whatever comes back into clean,
//! grid-aligned, de-duplicated rows:
//!
//! - timestamps must not decrease in the order the source returned them
//! - every row must belong to the requested symbol
//! - open/high/low/close/volume must be present and finite
//! - timestamps are snapped down to the interval grid
//! - rows outside the gap are dropped
//! - duplicate timestamps collapse, last write wins

use super::provider::{MarketDataSource, SourceError};
use crate::domain::{Interval, Row, TimeWindow, BASE_FIELDS};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Named sources plus the gap-only fetch path.
#[derive(Default)]
pub struct FetchGateway {
    sources: HashMap<String, Arc<dyn MarketDataSource>>,
}

impl FetchGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a source under `name`.
    pub fn register(&mut self, name: impl Into<String>, source: Arc<dyn MarketDataSource>) {
        self.sources.insert(name.into(), source);
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn MarketDataSource>> {
        self.sources
            .get(name)
            .ok_or_else(|| EngineError::UnknownSource(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Registered source names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fetch every gap in order. Fails on the first gap that fails.
    pub fn fetch(
        &self,
        source_name: &str,
        symbol: &str,
        interval: Interval,
        gaps: &[TimeWindow],
    ) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for gap in gaps {
            rows.extend(self.fetch_gap(source_name, symbol, interval, *gap)?);
        }
        Ok(rows)
    }

    /// Fetch a single gap.
    ///
    /// The source is asked for `[gap.start, gap.end + step)`: the bar that opens
    /// at `gap.end` is part of the gap, nothing after it is.
    pub fn fetch_gap(
        &self,
        source_name: &str,
        symbol: &str,
        interval: Interval,
        gap: TimeWindow,
    ) -> Result<Vec<Row>> {
        let source = self.get(source_name)?;
        let request_end = gap.end + interval.step() - Duration::milliseconds(1);

        debug!(source = source_name, symbol, gap = %gap, "fetching gap");
        let raw = source
            .download(&[symbol], gap.start, request_end, interval)
            .map_err(|cause| match cause {
                SourceError::ResponseFormatChanged(reason) => EngineError::MalformedResponse {
                    symbol: symbol.to_string(),
                    window: gap,
                    reason,
                },
                cause => EngineError::UpstreamUnavailable {
                    source_name: source_name.to_string(),
                    symbol: symbol.to_string(),
                    window: gap,
                    cause,
                },
            })?;

        let received = raw.len();
        let rows = normalize(symbol, interval, gap, raw).map_err(|reason| {
            warn!(source = source_name, symbol, gap = %gap, %reason, "rejecting malformed response");
            EngineError::MalformedResponse {
                symbol: symbol.to_string(),
                window: gap,
                reason,
            }
        })?;
        debug!(
            source = source_name,
            symbol,
            received,
            kept = rows.len(),
            "gap normalized"
        );
        Ok(rows)
    }
}

/// Validate and normalize raw source rows for one gap.
pub fn normalize(
    symbol: &str,
    interval: Interval,
    gap: TimeWindow,
    raw: Vec<Row>,
) -> std::result::Result<Vec<Row>, String> {
    let mut previous: Option<DateTime<Utc>> = None;
    let mut by_ts: BTreeMap<DateTime<Utc>, Row> = BTreeMap::new();

    for mut row in raw {
        if row.symbol != symbol {
            return Err(format!("row for unexpected symbol '{}'", row.symbol));
        }
        if let Some(prev) = previous {
            if row.timestamp < prev {
                return Err(format!(
                    "timestamps decrease: {} after {}",
                    row.timestamp, prev
                ));
            }
        }
        previous = Some(row.timestamp);

        for field in BASE_FIELDS {
            match row.get(field) {
                None => return Err(format!("missing field '{field}' at {}", row.timestamp)),
                Some(v) if !v.is_finite() => {
                    return Err(format!("non-finite {field} ({v}) at {}", row.timestamp))
                }
                Some(_) => {}
            }
        }

        let ts = interval.align_down(row.timestamp);
        if !gap.contains(ts) {
            continue;
        }
        row.timestamp = ts;
        row.interval = interval;
        by_ts.insert(ts, row);
    }

    Ok(by_ts.into_values().collect())
}
