//! End-to-end behaviour of `DataManager` against scripted sources.
//!
//! Every test counts source calls, since the point of the engine is to fetch
//! each grid point at most once.

use barvault_core::data::{MarketDataSource, SourceError};
use barvault_core::domain::{CLOSE, VOLUME};
use barvault_core::indicators::{FeatureCalculator, FeatureColumn, Sma};
use barvault_core::{
    DataManager, DataRequest, EngineError, FeatureSpec, InstrumentInput, InstrumentSpec, Interval,
    MemoryRangeStore, ParquetRangeStore, RangeStore, Row,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

// ── Helpers ──────────────────────────────────────────────────────────

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

/// Serves fixed closes per symbol and records every call.
#[derive(Default)]
struct Scripted {
    closes: HashMap<String, Vec<(u32, f64)>>,
    failing: HashSet<String>,
    delay: Option<std::time::Duration>,
    calls: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
}

impl Scripted {
    fn with(mut self, symbol: &str, days: impl IntoIterator<Item = u32>, close: f64) -> Self {
        self.closes
            .insert(symbol.to_string(), days.into_iter().map(|d| (d, close)).collect());
        self
    }

    fn with_series(mut self, symbol: &str, series: &[(u32, f64)]) -> Self {
        self.closes.insert(symbol.to_string(), series.to_vec());
        self
    }

    /// Hold every download long enough for concurrent callers to pile up.
    fn slow(mut self, millis: u64) -> Self {
        self.delay = Some(std::time::Duration::from_millis(millis));
        self
    }

    fn failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    fn calls(&self) -> Vec<(String, DateTime<Utc>, DateTime<Utc>)> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, symbol: &str) -> usize {
        self.calls().iter().filter(|(s, _, _)| s == symbol).count()
    }
}

impl MarketDataSource for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn download(
        &self,
        symbols: &[&str],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<Row>, SourceError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let mut rows = Vec::new();
        for symbol in symbols {
            self.calls
                .lock()
                .unwrap()
                .push((symbol.to_string(), start, end));
            if self.failing.contains(*symbol) {
                return Err(SourceError::NetworkUnreachable("connection refused".into()));
            }
            let Some(series) = self.closes.get(*symbol) else {
                return Err(SourceError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            };
            for &(d, close) in series {
                let ts = day(d);
                if start <= ts && ts <= end {
                    rows.push(Row::ohlcv(
                        *symbol, interval, ts, close, close, close, close, 100.0 * d as f64,
                    ));
                }
            }
        }
        Ok(rows)
    }
}

fn manager(source: Arc<Scripted>) -> DataManager {
    manager_with_store(source, Arc::new(MemoryRangeStore::new()))
}

fn manager_with_store(source: Arc<Scripted>, store: Arc<dyn RangeStore>) -> DataManager {
    let mut dm = DataManager::new(store);
    dm.register_source("scripted", source);
    dm
}

fn request(symbols: &[&str], from: u32, to: u32) -> DataRequest {
    DataRequest::new(symbols.iter().copied(), day(from), day(to)).source("scripted")
}

fn closes(rows: &[Row]) -> Vec<f64> {
    rows.iter().filter_map(Row::close).collect()
}

/// Fails on every call.
struct Broken;

impl FeatureCalculator for Broken {
    fn id(&self) -> &str {
        "broken"
    }
    fn name(&self) -> &str {
        "broken"
    }
    fn outputs(&self) -> Vec<String> {
        vec!["broken".to_string()]
    }
    fn lookback(&self) -> usize {
        0
    }
    fn compute(&self, _rows: &[Row]) -> Result<Vec<FeatureColumn>, String> {
        Err("division by zero".to_string())
    }
}

// ── Range cache ──────────────────────────────────────────────────────

#[test]
fn repeated_request_is_served_from_the_store() {
    let source = Arc::new(Scripted::default().with("SPY", 1..=31, 100.0));
    let dm = manager(source.clone());

    let first = dm.get_data(&request(&["SPY"], 1, 10)).unwrap();
    let second = dm.get_data(&request(&["SPY"], 1, 10)).unwrap();

    assert_eq!(source.calls().len(), 1);
    assert_eq!(first.rows("SPY"), second.rows("SPY"));
    assert_eq!(second.rows("SPY").map(<[Row]>::len), Some(10));
}

#[test]
fn overlapping_request_fetches_only_the_tail() {
    let source = Arc::new(Scripted::default().with("SPY", 1..=31, 100.0));
    let dm = manager(source.clone());

    dm.get_data(&request(&["SPY"], 1, 15)).unwrap();
    let result = dm.get_data(&request(&["SPY"], 10, 20)).unwrap();

    let calls = source.calls();
    assert_eq!(calls.len(), 2);
    let (_, start, end) = &calls[1];
    assert_eq!(*start, day(16));
    // The request runs to the end of the Jan-20 bar.
    assert_eq!(*end, day(21) - Duration::milliseconds(1));

    let rows = result.rows("SPY").unwrap();
    assert_eq!(rows.len(), 11);
    assert_eq!(rows[0].timestamp, day(10));
    assert_eq!(rows[10].timestamp, day(20));

    let ranges = dm.store().cached_ranges("SPY", Interval::D1).unwrap();
    assert_eq!(ranges.len(), 1);
    assert_eq!((ranges[0].start, ranges[0].end), (day(1), day(20)));
}

#[test]
fn hole_in_the_middle_is_the_only_fetch() {
    let source = Arc::new(Scripted::default().with("SPY", 1..=31, 100.0));
    let dm = manager(source.clone());

    dm.get_data(&request(&["SPY"], 1, 5)).unwrap();
    dm.get_data(&request(&["SPY"], 11, 15)).unwrap();
    dm.get_data(&request(&["SPY"], 1, 15)).unwrap();

    let calls = source.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].1, day(6));
    assert_eq!(calls[2].2, day(11) - Duration::milliseconds(1));
}

#[test]
fn intervals_are_cached_separately() {
    let source = Arc::new(Scripted::default().with("SPY", 1..=31, 100.0));
    let dm = manager(source.clone());

    dm.get_data(&request(&["SPY"], 1, 10)).unwrap();
    dm.get_data(&request(&["SPY"], 1, 10).interval(Interval::H1))
        .unwrap();

    assert_eq!(source.calls().len(), 2);
}

#[test]
fn cached_rows_are_served_whichever_source_is_named() {
    let first = Arc::new(Scripted::default().with("SPY", 1..=31, 100.0));
    let second = Arc::new(Scripted::default().with("SPY", 1..=31, 250.0));
    let mut dm = manager(first.clone());
    dm.register_source("other", second.clone());

    dm.get_data(&request(&["SPY"], 1, 5)).unwrap();
    let result = dm
        .get_data(&request(&["SPY"], 1, 6).source("other"))
        .unwrap();

    // Only the missing day comes from the second source.
    assert_eq!(first.calls().len(), 1);
    assert_eq!(second.calls().len(), 1);
    let got = closes(result.rows("SPY").unwrap());
    assert_eq!(got[..5], [100.0; 5]);
    assert_eq!(got[5], 250.0);
}

#[test]
fn store_survives_a_new_manager() {
    let dir = tempfile::tempdir().unwrap();

    let first_source = Arc::new(Scripted::default().with("SPY", 1..=31, 100.0));
    let dm = manager_with_store(
        first_source.clone(),
        Arc::new(ParquetRangeStore::new(dir.path())),
    );
    dm.get_data(&request(&["SPY"], 1, 10)).unwrap();
    assert_eq!(first_source.calls().len(), 1);
    drop(dm);

    let second_source = Arc::new(Scripted::default().with("SPY", 1..=31, 100.0));
    let dm = manager_with_store(
        second_source.clone(),
        Arc::new(ParquetRangeStore::new(dir.path())),
    );
    let result = dm.get_data(&request(&["SPY"], 2, 9)).unwrap();

    assert!(second_source.calls().is_empty());
    assert_eq!(result.rows("SPY").map(<[Row]>::len), Some(8));
}

// ── Failure isolation ────────────────────────────────────────────────

#[test]
fn one_failing_symbol_does_not_hide_the_others() {
    let source = Arc::new(
        Scripted::default()
            .with("SPY", 1..=31, 100.0)
            .failing("BAD"),
    );
    let dm = manager(source.clone());

    let result = dm.get_data(&request(&["SPY", "BAD"], 1, 5)).unwrap();

    assert_eq!(result.rows("SPY").map(<[Row]>::len), Some(5));
    assert!(result.rows("BAD").is_none());
    assert!(matches!(
        result.failures.get("BAD"),
        Some(EngineError::UpstreamUnavailable { .. })
    ));
    assert!(!result.is_complete());

    // Nothing was recorded for the failed key, so the next request retries.
    assert!(dm.store().cached_ranges("BAD", Interval::D1).unwrap().is_empty());
    dm.get_data(&request(&["BAD"], 1, 5)).unwrap();
    assert_eq!(source.calls_for("BAD"), 2);
}

#[test]
fn feature_failure_keeps_base_rows() {
    let source = Arc::new(Scripted::default().with("SPY", 1..=31, 100.0));
    let mut dm = manager(source);
    dm.register_feature(FeatureSpec::new("SPY", Arc::new(Broken)))
        .unwrap();

    let result = dm
        .get_data(&request(&["SPY"], 1, 5).with_features(true))
        .unwrap();

    let rows = result.rows("SPY").unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| r.get("broken").is_none()));
    assert!(matches!(
        result.feature_failures.get("SPY"),
        Some(EngineError::FeatureComputeError { .. })
    ));
    assert!(result.failures.is_empty());
}

#[test]
fn features_are_computed_with_history_before_the_window() {
    let series: Vec<(u32, f64)> = (1..=20).map(|d| (d, d as f64)).collect();
    let source = Arc::new(Scripted::default().with_series("SPY", &series));
    let mut dm = manager(source);
    dm.register_feature(FeatureSpec::new("SPY", Arc::new(Sma::new(3))))
        .unwrap();

    let result = dm
        .get_data(&request(&["SPY"], 10, 12).with_features(true))
        .unwrap();

    let sma: Vec<f64> = result
        .rows("SPY")
        .unwrap()
        .iter()
        .filter_map(|r| r.get("sma_3"))
        .collect();
    assert_eq!(sma, vec![9.0, 10.0, 11.0]);
    assert_eq!(dm.features_for_symbol("SPY"), vec!["sma_3"]);
}

/// Weekday closes equal to the day of month: Jan 1-5, 8-12, 15-19.
fn weekday_series() -> Vec<(u32, f64)> {
    [1..=5, 8..=12, 15..=19]
        .into_iter()
        .flatten()
        .map(|d| (d, d as f64))
        .collect()
}

#[test]
fn lookback_counts_rows_not_calendar_days() {
    let source = Arc::new(Scripted::default().with_series("SPY", &weekday_series()));
    let mut dm = manager(source.clone());
    dm.register_feature(FeatureSpec::new("SPY", Arc::new(Sma::new(5))))
        .unwrap();

    let result = dm
        .get_data(&request(&["SPY"], 15, 19).with_features(true))
        .unwrap();

    let sma: Vec<f64> = result
        .rows("SPY")
        .unwrap()
        .iter()
        .map(|r| r.get("sma_5").unwrap())
        .collect();
    let expected = [11.4, 12.8, 14.2, 15.6, 17.0];
    assert_eq!(sma.len(), expected.len());
    for (got, want) in sma.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "{got} != {want}");
    }
    // Four calendar days back leaves only Jan 11-12; one widening reaches Jan 9.
    assert_eq!(source.calls().len(), 2);
}

#[test]
fn widening_stops_where_history_starts() {
    let series: Vec<(u32, f64)> = [10, 11, 12, 15, 16, 17, 18, 19]
        .into_iter()
        .map(|d| (d, d as f64))
        .collect();
    let source = Arc::new(Scripted::default().with_series("SPY", &series));
    let mut dm = manager(source.clone());
    dm.register_feature(FeatureSpec::new("SPY", Arc::new(Sma::new(5))))
        .unwrap();

    let first = dm
        .get_data(&request(&["SPY"], 15, 19).with_features(true))
        .unwrap();
    let rows = first.rows("SPY").unwrap();
    assert_eq!(rows.len(), 5);
    // Jan 10-12 is all the history there is: the first SMA lands on Jan 16.
    assert!(rows[0].get("sma_5").is_none());
    let sma = rows[1].get("sma_5").unwrap();
    assert!((sma - 12.8).abs() < 1e-9, "{sma}");
    let calls = source.calls().len();
    assert!(calls <= 1 + 6, "{calls} fetches");

    dm.get_data(&request(&["SPY"], 15, 19).with_features(true))
        .unwrap();
    assert_eq!(source.calls().len(), calls);
}

// ── Generated instruments ────────────────────────────────────────────

#[test]
fn ratio_is_an_inner_join_of_its_inputs() {
    let source = Arc::new(
        Scripted::default()
            .with("A", 1..=5, 10.0)
            .with("B", [1, 2, 4, 5], 2.0),
    );
    let mut dm = manager(source.clone());
    dm.register_instrument(InstrumentSpec::ratio(
        "A/B",
        InstrumentInput::new("A"),
        InstrumentInput::new("B"),
    ))
    .unwrap();

    let result = dm.get_data(&request(&["A/B"], 1, 5)).unwrap();
    let rows = result.rows("A/B").unwrap();

    let days: Vec<DateTime<Utc>> = rows.iter().map(|r| r.timestamp).collect();
    assert_eq!(days, vec![day(1), day(2), day(4), day(5)]);
    assert_eq!(closes(rows), vec![5.0; 4]);
    assert_eq!(rows[0].symbol, "A/B");
    assert_eq!(rows[0].get(VOLUME), Some(100.0));

    // Inputs are cached under their own keys.
    assert_eq!(dm.store().cached_ranges("A", Interval::D1).unwrap().len(), 1);
    assert_eq!(dm.store().cached_ranges("B", Interval::D1).unwrap().len(), 1);

    dm.get_data(&request(&["A/B"], 1, 5)).unwrap();
    assert_eq!(source.calls().len(), 2);
}

#[test]
fn spread_uses_weights() {
    let source = Arc::new(
        Scripted::default()
            .with("A", 1..=3, 10.0)
            .with("B", 1..=3, 1.0),
    );
    let mut dm = manager(source);
    dm.register_instrument(InstrumentSpec::spread(
        "A-2B",
        vec![InstrumentInput::new("A"), InstrumentInput::weighted("B", 2.0)],
    ))
    .unwrap();

    let result = dm.get_data(&request(&["A-2B"], 1, 3)).unwrap();
    assert_eq!(closes(result.rows("A-2B").unwrap()), vec![8.0; 3]);
}

#[test]
fn generated_instruments_chain() {
    let source = Arc::new(
        Scripted::default()
            .with("A", 1..=3, 10.0)
            .with("B", 1..=3, 2.0)
            .with("C", 1..=3, 4.0),
    );
    let mut dm = manager(source);
    dm.register_instrument(InstrumentSpec::weighted(
        "TOP",
        vec![InstrumentInput::new("A/B"), InstrumentInput::new("C")],
    ))
    .unwrap();
    dm.register_instrument(InstrumentSpec::ratio(
        "A/B",
        InstrumentInput::new("A"),
        InstrumentInput::new("B"),
    ))
    .unwrap();

    let result = dm.get_data(&request(&["TOP"], 1, 3)).unwrap();
    assert_eq!(closes(result.rows("TOP").unwrap()), vec![9.0; 3]);
}

#[test]
fn failing_input_fails_the_generated_instrument() {
    let source = Arc::new(Scripted::default().with("A", 1..=5, 10.0).failing("B"));
    let mut dm = manager(source);
    dm.register_instrument(InstrumentSpec::ratio(
        "A/B",
        InstrumentInput::new("A"),
        InstrumentInput::new("B"),
    ))
    .unwrap();

    let result = dm.get_data(&request(&["A", "A/B"], 1, 5)).unwrap();
    assert!(result.rows("A").is_some());
    assert!(result.failures.contains_key("A/B"));
    let key = dm.graph().storage_key("A/B");
    assert!(dm.store().cached_ranges(&key, Interval::D1).unwrap().is_empty());
}

#[test]
fn include_generated_adds_instruments_built_from_requested_symbols() {
    let source = Arc::new(
        Scripted::default()
            .with("A", 1..=3, 10.0)
            .with("B", 1..=3, 2.0)
            .with("C", 1..=3, 4.0),
    );
    let mut dm = manager(source);
    dm.register_instrument(InstrumentSpec::ratio(
        "A/B",
        InstrumentInput::new("A"),
        InstrumentInput::new("B"),
    ))
    .unwrap();
    dm.register_instrument(InstrumentSpec::ratio(
        "A/C",
        InstrumentInput::new("A"),
        InstrumentInput::new("C"),
    ))
    .unwrap();

    let plain = dm.get_data(&request(&["A", "B"], 1, 3)).unwrap();
    assert!(plain.rows("A/B").is_none());

    let result = dm
        .get_data(&request(&["A", "B"], 1, 3).with_generated(true))
        .unwrap();
    assert_eq!(closes(result.rows("A/B").unwrap()), vec![5.0; 3]);
    assert!(result.rows("A/C").is_none());
}

#[test]
fn cycle_is_rejected_and_graph_left_unchanged() {
    let source = Arc::new(
        Scripted::default()
            .with("A", 1..=3, 10.0)
            .with("B", 1..=3, 2.0),
    );
    let mut dm = manager(source);
    dm.register_instrument(InstrumentSpec::spread(
        "X",
        vec![InstrumentInput::new("Y"), InstrumentInput::new("A")],
    ))
    .unwrap();
    let before = dm.graph().len();

    let err = dm
        .register_instrument(InstrumentSpec::spread(
            "Y",
            vec![InstrumentInput::new("X"), InstrumentInput::new("B")],
        ))
        .unwrap_err();

    match err {
        EngineError::CyclicDependency { name, path } => {
            assert_eq!(name, "Y");
            assert_eq!(path.first(), path.last());
            assert!(path.contains(&"X".to_string()));
        }
        other => panic!("expected a cycle, got {other}"),
    }
    assert_eq!(dm.graph().len(), before);
    assert!(!dm.graph().is_generated("Y"));

    // The graph is still usable once Y becomes a real definition.
    dm.register_instrument(InstrumentSpec::spread(
        "Y",
        vec![InstrumentInput::new("A"), InstrumentInput::new("B")],
    ))
    .unwrap();
    let result = dm.get_data(&request(&["X"], 1, 3)).unwrap();
    // Y = 10 - 2, X = Y - A = 8 - 10
    assert_eq!(closes(result.rows("X").unwrap()), vec![-2.0; 3]);
}

#[test]
fn generated_rows_carry_only_combined_fields() {
    let source = Arc::new(
        Scripted::default()
            .with("A", 1..=2, 10.0)
            .with("B", 1..=2, 2.0),
    );
    let mut dm = manager(source);
    dm.register_instrument(InstrumentSpec::ratio(
        "A/B",
        InstrumentInput::new("A"),
        InstrumentInput::new("B"),
    ))
    .unwrap();

    let result = dm.get_data(&request(&["A/B"], 1, 2)).unwrap();
    let row = &result.rows("A/B").unwrap()[0];
    assert_eq!(row.get(CLOSE), Some(5.0));
    assert_eq!(row.fields.len(), 5);
}

#[test]
fn ratio_and_spread_follow_both_inputs_per_timestamp() {
    let source = Arc::new(
        Scripted::default()
            .with_series("A", &[(1, 10.0), (2, 20.0), (3, 30.0)])
            .with_series("B", &[(1, 2.0), (2, 4.0)]),
    );
    let mut dm = manager(source);
    dm.register_instrument(InstrumentSpec::ratio(
        "A/B",
        InstrumentInput::new("A"),
        InstrumentInput::new("B"),
    ))
    .unwrap();
    dm.register_instrument(InstrumentSpec::spread(
        "A-B",
        vec![InstrumentInput::new("A"), InstrumentInput::new("B")],
    ))
    .unwrap();

    let result = dm.get_data(&request(&["A/B", "A-B"], 1, 3)).unwrap();
    assert_eq!(closes(result.rows("A/B").unwrap()), vec![5.0, 5.0]);
    assert_eq!(closes(result.rows("A-B").unwrap()), vec![8.0, 16.0]);
}

#[test]
fn replaced_instrument_is_recomputed() {
    let source = Arc::new(
        Scripted::default()
            .with("A", 1..=5, 10.0)
            .with("B", 1..=5, 2.0),
    );
    let mut dm = manager(source.clone());
    dm.register_instrument(InstrumentSpec::spread(
        "X",
        vec![InstrumentInput::new("A"), InstrumentInput::new("B")],
    ))
    .unwrap();

    let result = dm.get_data(&request(&["X"], 1, 5)).unwrap();
    assert_eq!(closes(result.rows("X").unwrap()), vec![8.0; 5]);

    dm.replace_instrument(InstrumentSpec::ratio(
        "X",
        InstrumentInput::new("A"),
        InstrumentInput::new("B"),
    ))
    .unwrap();
    let result = dm.get_data(&request(&["X"], 1, 5)).unwrap();
    assert_eq!(closes(result.rows("X").unwrap()), vec![5.0; 5]);
    assert_eq!(result.rows("X").unwrap()[0].symbol, "X");
    // The inputs were already cached.
    assert_eq!(source.calls().len(), 2);
}

#[test]
fn symbol_fetched_before_its_definition_is_not_reused() {
    let source = Arc::new(
        Scripted::default()
            .with("X", 1..=3, 99.0)
            .with("A", 1..=3, 10.0)
            .with("B", 1..=3, 2.0),
    );
    let mut dm = manager(source);

    let result = dm.get_data(&request(&["X"], 1, 3)).unwrap();
    assert_eq!(closes(result.rows("X").unwrap()), vec![99.0; 3]);

    dm.register_instrument(InstrumentSpec::spread(
        "X",
        vec![InstrumentInput::new("A"), InstrumentInput::new("B")],
    ))
    .unwrap();
    let result = dm.get_data(&request(&["X"], 1, 3)).unwrap();
    assert_eq!(closes(result.rows("X").unwrap()), vec![8.0; 3]);
}

// ── Concurrency ──────────────────────────────────────────────────────

fn concurrent_requests_fetch_once(store: Arc<dyn RangeStore>) {
    let source = Arc::new(Scripted::default().with("SPY", 1..=31, 100.0).slow(50));
    let dm = manager_with_store(source.clone(), store);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| dm.get_data(&request(&["SPY"], 1, 10)).unwrap()))
            .collect();
        for handle in handles {
            let result = handle.join().unwrap();
            assert_eq!(result.rows("SPY").map(<[Row]>::len), Some(10));
        }
    });

    assert_eq!(source.calls().len(), 1);
    let ranges = dm.store().cached_ranges("SPY", Interval::D1).unwrap();
    assert_eq!(ranges.len(), 1);
    assert_eq!((ranges[0].start, ranges[0].end), (day(1), day(10)));
}

#[test]
fn concurrent_requests_share_one_fetch_in_memory() {
    concurrent_requests_fetch_once(Arc::new(MemoryRangeStore::new()));
}

#[test]
fn concurrent_requests_share_one_fetch_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    concurrent_requests_fetch_once(Arc::new(ParquetRangeStore::new(dir.path())));
}

#[test]
fn concurrent_generated_requests_share_input_fetches() {
    let source = Arc::new(
        Scripted::default()
            .with("A", 1..=10, 10.0)
            .with("B", 1..=10, 2.0)
            .slow(20),
    );
    let mut dm = manager(source.clone());
    dm.register_instrument(InstrumentSpec::ratio(
        "A/B",
        InstrumentInput::new("A"),
        InstrumentInput::new("B"),
    ))
    .unwrap();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|_| scope.spawn(|| dm.get_data(&request(&["A/B", "A"], 1, 10)).unwrap()))
            .collect();
        for handle in handles {
            let result = handle.join().unwrap();
            assert_eq!(closes(result.rows("A/B").unwrap()), vec![5.0; 10]);
        }
    });

    assert_eq!(source.calls_for("A"), 1);
    assert_eq!(source.calls_for("B"), 1);
}
