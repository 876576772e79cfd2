//! The data manager: registration plus the `get_data` entry point.
//!
//! A request runs, per symbol and in parallel: gap resolution against the
//! store, fetch of the gaps only, merge, generation of derived instruments in
//! dependency order, and the feature pass. Failures are collected per symbol;
//! one bad symbol never hides the others.

use crate::data::{FetchGateway, MarketDataSource};
use crate::domain::{Interval, Row, TimeWindow};
use crate::error::{EngineError, Result};
use crate::features::{FeaturePipeline, FeatureSpec, LookbackPolicy};
use crate::graph::{InstrumentGraph, InstrumentSpec};
use crate::store::RangeStore;
use crate::sync::{KeyLocks, SyncContext};
use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, instrument, warn};

/// What to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub symbols: Vec<String>,
    pub window: TimeWindow,
    pub interval: Interval,
    pub source: String,
    pub include_features: bool,
    pub include_generated: bool,
}

impl DataRequest {
    /// Daily bars from the `yahoo` source, no features or generated extras.
    pub fn new<S: Into<String>>(
        symbols: impl IntoIterator<Item = S>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            window: TimeWindow::new(start, end),
            interval: Interval::D1,
            source: "yahoo".to_string(),
            include_features: false,
            include_generated: false,
        }
    }

    pub fn interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    /// Source for the gaps. Already cached rows are served regardless of the
    /// source that fetched them.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_features(mut self, include: bool) -> Self {
        self.include_features = include;
        self
    }

    pub fn with_generated(mut self, include: bool) -> Self {
        self.include_generated = include;
        self
    }
}

/// Per-symbol outcome of `get_data`.
///
/// A symbol lands in `series` or in `failures`, never both. A symbol in
/// `feature_failures` still has its base rows in `series`.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub series: BTreeMap<String, Vec<Row>>,
    pub failures: BTreeMap<String, EngineError>,
    pub feature_failures: BTreeMap<String, EngineError>,
}

impl QueryResult {
    pub fn rows(&self, symbol: &str) -> Option<&[Row]> {
        self.series.get(symbol).map(Vec::as_slice)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.feature_failures.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManagerOptions {
    pub lookback_policy: LookbackPolicy,
    /// Multiplier on `lookback × step` when widening the fetch for features.
    pub lookback_padding: f64,
    /// Process the symbols of a request on the rayon pool.
    pub parallel: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            lookback_policy: LookbackPolicy::Truncate,
            lookback_padding: 1.0,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub records: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub features: Vec<String>,
}

/// Overview of the last materialized view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSummary {
    pub store: String,
    pub interval: Option<Interval>,
    pub total_records: usize,
    pub symbols: Vec<SymbolSummary>,
}

#[derive(Debug, Default)]
struct LastView {
    interval: Option<Interval>,
    series: BTreeMap<String, Vec<Row>>,
}

type SymbolOutcome = (String, Result<Vec<Row>>, Option<EngineError>);

/// Upper bound on extra fetches spent reaching a feature lookback.
const MAX_LOOKBACK_WIDENINGS: usize = 6;

pub struct DataManager {
    store: Arc<dyn RangeStore>,
    gateway: FetchGateway,
    graph: InstrumentGraph,
    features: FeaturePipeline,
    locks: KeyLocks,
    options: ManagerOptions,
    last: RwLock<LastView>,
}

impl std::fmt::Debug for DataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataManager")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DataManager {
    pub fn new(store: Arc<dyn RangeStore>) -> Self {
        Self::with_options(store, ManagerOptions::default())
    }

    pub fn with_options(store: Arc<dyn RangeStore>, options: ManagerOptions) -> Self {
        Self {
            store,
            gateway: FetchGateway::new(),
            graph: InstrumentGraph::new(),
            features: FeaturePipeline::new(),
            locks: KeyLocks::new(),
            options,
            last: RwLock::new(LastView::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RangeStore> {
        &self.store
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn gateway(&self) -> &FetchGateway {
        &self.gateway
    }

    pub fn graph(&self) -> &InstrumentGraph {
        &self.graph
    }

    pub fn features(&self) -> &FeaturePipeline {
        &self.features
    }

    // ─── Registration ────────────────────────────────────────────────

    pub fn register_source(&mut self, name: impl Into<String>, source: Arc<dyn MarketDataSource>) {
        self.gateway.register(name, source);
    }

    pub fn register_instrument(&mut self, spec: InstrumentSpec) -> Result<()> {
        let name = spec.name.clone();
        self.graph.register(spec)?;
        info!(instrument = %name, "instrument registered");
        Ok(())
    }

    pub fn replace_instrument(&mut self, spec: InstrumentSpec) -> Result<()> {
        let name = spec.name.clone();
        self.graph.replace(spec)?;
        info!(instrument = %name, "instrument replaced");
        Ok(())
    }

    pub fn register_feature(&mut self, spec: FeatureSpec) -> Result<()> {
        self.features.register(spec)
    }

    pub fn declare_base_symbol(&mut self, symbol: &str) -> Result<()> {
        self.graph.declare_base(symbol)
    }

    // ─── Query ───────────────────────────────────────────────────────

    /// Load every requested symbol, fetching only what the store lacks.
    ///
    /// Fails as a whole only for an unknown source; everything else is
    /// reported per symbol in the result.
    #[instrument(
        skip(self, request),
        fields(
            symbols = request.symbols.len(),
            interval = %request.interval,
            source = %request.source,
        )
    )]
    pub fn get_data(&self, request: &DataRequest) -> Result<QueryResult> {
        self.gateway.get(&request.source)?;

        let targets = self.targets(request);
        let outcomes: Vec<SymbolOutcome> = if self.options.parallel {
            targets.par_iter().map(|s| self.load_symbol(s, request)).collect()
        } else {
            targets.iter().map(|s| self.load_symbol(s, request)).collect()
        };

        let mut result = QueryResult::default();
        for (symbol, rows, feature_error) in outcomes {
            match rows {
                Ok(rows) => {
                    result.series.insert(symbol.clone(), rows);
                }
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "symbol failed");
                    result.failures.insert(symbol.clone(), err);
                }
            }
            if let Some(err) = feature_error {
                warn!(symbol = %symbol, error = %err, "features skipped");
                result.feature_failures.insert(symbol, err);
            }
        }

        self.remember(request.interval, &result);
        info!(
            loaded = result.series.len(),
            failed = result.failures.len(),
            records = result.record_count(),
            "request complete"
        );
        Ok(result)
    }

    /// Requested symbols in order, plus generated instruments built only from
    /// requested symbols when asked.
    fn targets(&self, request: &DataRequest) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut targets: Vec<String> = request
            .symbols
            .iter()
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect();

        if request.include_generated {
            let requested: BTreeSet<String> = request.symbols.iter().cloned().collect();
            for name in self.graph.generated_names() {
                if !requested.contains(&name) && self.graph.base_inputs(&name).is_subset(&requested)
                {
                    targets.push(name);
                }
            }
        }
        targets
    }

    /// Request window widened by the symbol's feature lookback.
    fn fetch_window(&self, symbol: &str, request: &DataRequest) -> TimeWindow {
        if !request.include_features {
            return request.window;
        }
        let lookback = self.features.max_lookback(symbol);
        if lookback == 0 {
            return request.window;
        }
        let bars = (lookback as f64 * self.options.lookback_padding.max(1.0)).ceil() as i64;
        let extra = Duration::milliseconds(request.interval.step_millis().saturating_mul(bars));
        TimeWindow::new(request.window.start - extra, request.window.end)
    }

    fn load_symbol(&self, symbol: &str, request: &DataRequest) -> SymbolOutcome {
        let ctx = SyncContext {
            store: self.store.as_ref(),
            gateway: &self.gateway,
            locks: &self.locks,
        };
        let span = self.fetch_window(symbol, request);
        let rows = match ctx.materialize(&self.graph, symbol, span, request.interval, &request.source)
        {
            Ok(rows) => rows,
            Err(err) => return (symbol.to_string(), Err(err), None),
        };

        if !(request.include_features && self.features.has_features(symbol)) {
            return (symbol.to_string(), Ok(trim(rows, request.window)), None);
        }
        let rows = self.widen_for_lookback(&ctx, symbol, request, span, rows);

        match self.features.apply_window(
            symbol,
            &rows,
            request.window,
            self.options.lookback_policy,
        ) {
            Ok(augmented) => (symbol.to_string(), Ok(augmented), None),
            Err(err) => (symbol.to_string(), Ok(trim(rows, request.window)), Some(err)),
        }
    }

    /// Extend the history before the window until it holds the symbol's
    /// lookback in rows, not grid points. Sessions, weekends and holidays
    /// leave fewer rows than the calendar span suggests.
    ///
    /// Each widening at least doubles the previous one. Widening stops once
    /// two in a row add nothing, since the series has no earlier history.
    fn widen_for_lookback(
        &self,
        ctx: &SyncContext<'_>,
        symbol: &str,
        request: &DataRequest,
        mut span: TimeWindow,
        mut rows: Vec<Row>,
    ) -> Vec<Row> {
        let needed = self.features.max_lookback(symbol);
        let padding = self.options.lookback_padding.max(1.0);
        let step = request.interval.step_millis();
        let mut bars = 0i64;
        let mut idle = 0;

        for _ in 0..MAX_LOOKBACK_WIDENINGS {
            let history = rows
                .iter()
                .filter(|r| r.timestamp < request.window.start)
                .count();
            if history >= needed || idle >= 2 {
                break;
            }

            let missing = (needed - history) as f64;
            bars = ((missing * padding).ceil() as i64).max(bars * 2).max(1);
            span = TimeWindow::new(
                span.start - Duration::milliseconds(step.saturating_mul(bars)),
                span.end,
            );
            debug!(symbol, history, needed, start = %span.start, "widening for lookback");

            match ctx.materialize(&self.graph, symbol, span, request.interval, &request.source) {
                Ok(wider) => {
                    idle = if wider.len() > rows.len() { 0 } else { idle + 1 };
                    rows = wider;
                }
                Err(err) => {
                    warn!(symbol, error = %err, "lookback widening failed");
                    break;
                }
            }
        }
        rows
    }

    fn remember(&self, interval: Interval, result: &QueryResult) {
        let mut last = self.last.write().unwrap_or_else(PoisonError::into_inner);
        if last.interval != Some(interval) {
            last.series.clear();
        }
        last.interval = Some(interval);
        for (symbol, rows) in &result.series {
            last.series.insert(symbol.clone(), rows.clone());
        }
    }

    /// Rows from the most recent request that returned `name`.
    pub fn get_symbol_data(&self, name: &str) -> Result<Vec<Row>> {
        let last = self.last.read().unwrap_or_else(PoisonError::into_inner);
        last.series
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSymbol(name.to_string()))
    }

    pub fn get_symbol_data_between(
        &self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Row>> {
        let window = TimeWindow::new(start, end);
        Ok(trim(self.get_symbol_data(name)?, window))
    }

    pub fn available_symbols(&self) -> Vec<String> {
        let last = self.last.read().unwrap_or_else(PoisonError::into_inner);
        last.series.keys().cloned().collect()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.feature_names()
    }

    pub fn features_for_symbol(&self, symbol: &str) -> Vec<String> {
        self.features.features_for(symbol)
    }

    /// Forget the last materialized view. The store is untouched.
    pub fn clear_cache(&self) {
        let mut last = self.last.write().unwrap_or_else(PoisonError::into_inner);
        *last = LastView::default();
    }

    /// Write the last view as one CSV: symbol, timestamp, then every field
    /// seen on any row, sorted. Returns the number of data rows written.
    pub fn export_csv(&self, path: &Path) -> Result<usize> {
        let last = self.last.read().unwrap_or_else(PoisonError::into_inner);
        let columns: BTreeSet<&str> = last
            .series
            .values()
            .flatten()
            .flat_map(|r| r.fields.keys().map(String::as_str))
            .collect();

        let mut wtr = csv::Writer::from_writer(File::create(path)?);
        let mut header = vec!["symbol", "interval", "timestamp"];
        header.extend(columns.iter().copied());
        wtr.write_record(&header)?;

        let mut written = 0;
        for (symbol, rows) in &last.series {
            for row in rows {
                let mut record = vec![
                    symbol.clone(),
                    row.interval.to_string(),
                    row.timestamp.to_rfc3339(),
                ];
                record.extend(
                    columns
                        .iter()
                        .map(|c| row.get(c).map(|v| v.to_string()).unwrap_or_default()),
                );
                wtr.write_record(&record)?;
                written += 1;
            }
        }
        wtr.flush()?;
        info!(path = %path.display(), rows = written, "exported csv");
        Ok(written)
    }

    pub fn summary(&self) -> DataSummary {
        let last = self.last.read().unwrap_or_else(PoisonError::into_inner);
        let symbols: Vec<SymbolSummary> = last
            .series
            .iter()
            .map(|(symbol, rows)| SymbolSummary {
                symbol: symbol.clone(),
                records: rows.len(),
                first: rows.first().map(|r| r.timestamp),
                last: rows.last().map(|r| r.timestamp),
                features: self.features.features_for(symbol),
            })
            .collect();
        DataSummary {
            store: self.store.name().to_string(),
            interval: last.interval,
            total_records: symbols.iter().map(|s| s.records).sum(),
            symbols,
        }
    }
}

fn trim(mut rows: Vec<Row>, window: TimeWindow) -> Vec<Row> {
    rows.retain(|r| window.contains(r.timestamp));
    rows
}
