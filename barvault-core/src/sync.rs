//! Per-key synchronization: gap resolve, fetch or generate, merge.
//!
//! Everything that writes a `(symbol, interval)` key goes through
//! `SyncContext` while holding that key's lock, so two requests for the same
//! key never fetch the same gap twice. A thread holds at most one key lock.
//!
//! Generated instruments are stored under `InstrumentGraph::storage_key`, so
//! their cached ranges belong to one definition. Rows leave `materialize`
//! under the instrument's plain name.
//!
//! Base keys do not include the source. A key filled from one source serves
//! later requests naming another; the first such request in a process logs
//! a warning.

use crate::data::FetchGateway;
use crate::domain::{Interval, Row, TimeWindow};
use crate::error::{EngineError, Result};
use crate::gaps;
use crate::graph::{InputRow, InstrumentGraph, InstrumentSpec, PlanStep};
use crate::store::RangeStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

type KeyLockMap = Mutex<HashMap<(String, Interval), Arc<Mutex<()>>>>;

/// One mutex per `(symbol, interval)`, created on first use, plus the source
/// each key was last synced from in this process.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: KeyLockMap,
    sources: Mutex<HashMap<(String, Interval), String>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, symbol: &str, interval: Interval) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry((symbol.to_string(), interval))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record `source` for the key. Returns the previous source when it
    /// differs.
    pub fn note_source(&self, symbol: &str, interval: Interval, source: &str) -> Option<String> {
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        match sources.insert((symbol.to_string(), interval), source.to_string()) {
            Some(previous) if previous != source => Some(previous),
            _ => None,
        }
    }
}

/// Work done for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub gaps: usize,
    pub rows_written: usize,
}

/// Borrowed view of the collaborators one request needs.
pub struct SyncContext<'a> {
    pub store: &'a dyn RangeStore,
    pub gateway: &'a FetchGateway,
    pub locks: &'a KeyLocks,
}

impl SyncContext<'_> {
    /// Fill every gap of a fetched symbol from `source`.
    ///
    /// Gaps are committed one by one; a failing gap stops the sync and leaves
    /// the gaps before it committed.
    pub fn sync_base(
        &self,
        source: &str,
        symbol: &str,
        interval: Interval,
        window: TimeWindow,
    ) -> Result<SyncStats> {
        let lock = self.locks.lock_for(symbol, interval);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let cached = self.store.cached_ranges(symbol, interval)?;
        if let Some(previous) = self.locks.note_source(symbol, interval, source) {
            if !cached.is_empty() {
                warn!(
                    symbol,
                    %interval,
                    source,
                    previous = %previous,
                    "cached rows came from another source; the store key ignores sources"
                );
            }
        }
        let gaps = gaps::resolve(&cached, window, interval);
        if gaps.is_empty() {
            debug!(symbol, %interval, "fully cached");
            return Ok(SyncStats::default());
        }

        info!(
            symbol,
            %interval,
            source,
            gaps = gaps.len(),
            missing = gaps::missing_points(&gaps, interval),
            "fetching gaps"
        );
        let mut stats = SyncStats::default();
        for gap in gaps {
            let rows = self.gateway.fetch_gap(source, symbol, interval, gap)?;
            stats.gaps += 1;
            stats.rows_written += rows.len();
            self.store.upsert(symbol, interval, rows, gap)?;
        }
        Ok(stats)
    }

    /// Recompute a generated instrument for the gaps of its own key.
    ///
    /// Inputs must already be synced for `window`.
    pub fn sync_generated(
        &self,
        graph: &InstrumentGraph,
        spec: &InstrumentSpec,
        interval: Interval,
        window: TimeWindow,
    ) -> Result<SyncStats> {
        if let Some(pinned) = spec.pinned_interval()? {
            if pinned != interval {
                return Err(EngineError::IntervalMismatch {
                    name: spec.name.clone(),
                    expected: interval,
                    found: pinned,
                });
            }
        }

        let key = graph.storage_key(&spec.name);
        let lock = self.locks.lock_for(&key, interval);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let cached = self.store.cached_ranges(&key, interval)?;
        let gaps = gaps::resolve(&cached, window, interval);
        if gaps.is_empty() {
            debug!(symbol = %spec.name, %key, %interval, "generated series fully cached");
            return Ok(SyncStats::default());
        }

        let mut stats = SyncStats::default();
        for gap in gaps {
            let rows = self.generate(graph, spec, &key, interval, gap)?;
            stats.gaps += 1;
            stats.rows_written += rows.len();
            self.store.upsert(&key, interval, rows, gap)?;
        }
        info!(
            symbol = %spec.name,
            %key,
            kind = %spec.kind,
            gaps = stats.gaps,
            rows = stats.rows_written,
            "generated"
        );
        Ok(stats)
    }

    /// Inner-join the inputs on timestamp and combine row by row.
    fn generate(
        &self,
        graph: &InstrumentGraph,
        spec: &InstrumentSpec,
        key: &str,
        interval: Interval,
        gap: TimeWindow,
    ) -> Result<Vec<Row>> {
        let inputs = spec
            .inputs
            .iter()
            .map(|input| {
                self.store
                    .read(&graph.storage_key(&input.symbol), interval, gap)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let Some((driver, rest)) = inputs.split_first() else {
            return Ok(Vec::new());
        };
        let lookups: Vec<HashMap<DateTime<Utc>, &Row>> = rest
            .iter()
            .map(|rows| rows.iter().map(|r| (r.timestamp, r)).collect())
            .collect();

        let combiner = spec.combiner();
        let mut out = Vec::with_capacity(driver.len());
        let mut dropped = 0usize;
        let mut aligned = Vec::with_capacity(spec.inputs.len());

        for row in driver {
            aligned.clear();
            aligned.push(row);
            for lookup in &lookups {
                match lookup.get(&row.timestamp) {
                    Some(other) => aligned.push(*other),
                    None => break,
                }
            }
            if aligned.len() != spec.inputs.len() {
                continue;
            }

            let input_rows: Vec<InputRow<'_>> = spec
                .inputs
                .iter()
                .zip(&aligned)
                .map(|(input, row)| InputRow {
                    symbol: &input.symbol,
                    weight: input.weight,
                    row,
                })
                .collect();

            match combiner.combine(&input_rows) {
                Some(fields) => out.push(Row {
                    symbol: key.to_string(),
                    interval,
                    timestamp: row.timestamp,
                    fields,
                }),
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            warn!(
                symbol = %spec.name,
                combiner = combiner.name(),
                dropped,
                gap = %gap,
                "combiner skipped rows"
            );
        }
        Ok(out)
    }

    /// Bring `name` and everything it depends on up to date for `window`,
    /// then read it back.
    pub fn materialize(
        &self,
        graph: &InstrumentGraph,
        name: &str,
        window: TimeWindow,
        interval: Interval,
        source: &str,
    ) -> Result<Vec<Row>> {
        for step in graph.plan(name) {
            match step {
                PlanStep::Fetch(symbol) => {
                    self.sync_base(source, symbol, interval, window)?;
                }
                PlanStep::Generate(spec) => {
                    self.sync_generated(graph, spec, interval, window)?;
                }
            }
        }

        let key = graph.storage_key(name);
        let mut rows = self.store.read(&key, interval, window)?;
        if key != name {
            for row in &mut rows {
                row.symbol = name.to_string();
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MarketDataSource, SourceError};
    use crate::domain::CLOSE;
    use crate::graph::InstrumentInput;
    use crate::store::MemoryRangeStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    /// Close = day-of-month for A and day-of-month / 2 for B; B skips Jan-3.
    struct Fixed {
        calls: AtomicUsize,
    }

    impl MarketDataSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn download(
            &self,
            symbols: &[&str],
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            interval: Interval,
        ) -> std::result::Result<Vec<Row>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut rows = Vec::new();
            for symbol in symbols {
                let mut ts = interval.align_up(start);
                while ts <= end {
                    let d = ts.format("%d").to_string().parse::<f64>().unwrap_or(0.0);
                    let close = if *symbol == "B" { d / 2.0 } else { d };
                    if !(*symbol == "B" && d == 3.0) {
                        rows.push(Row::ohlcv(*symbol, interval, ts, close, close, close, close, 1.0));
                    }
                    ts += interval.step();
                }
            }
            Ok(rows)
        }
    }

    struct Fixture {
        store: MemoryRangeStore,
        gateway: FetchGateway,
        locks: KeyLocks,
        source: Arc<Fixed>,
    }

    impl Fixture {
        fn new() -> Self {
            let source = Arc::new(Fixed {
                calls: AtomicUsize::new(0),
            });
            let mut gateway = FetchGateway::new();
            gateway.register("fixed", source.clone());
            Self {
                store: MemoryRangeStore::new(),
                gateway,
                locks: KeyLocks::new(),
                source,
            }
        }

        fn ctx(&self) -> SyncContext<'_> {
            SyncContext {
                store: &self.store,
                gateway: &self.gateway,
                locks: &self.locks,
            }
        }

        fn calls(&self) -> usize {
            self.source.calls.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn base_sync_is_idempotent() {
        let fx = Fixture::new();
        let window = TimeWindow::new(day(1), day(10));
        let first = fx.ctx().sync_base("fixed", "A", Interval::D1, window).unwrap();
        assert_eq!(first, SyncStats { gaps: 1, rows_written: 10 });

        let second = fx.ctx().sync_base("fixed", "A", Interval::D1, window).unwrap();
        assert_eq!(second, SyncStats::default());
        assert_eq!(fx.calls(), 1);
    }

    #[test]
    fn ratio_inner_joins_inputs() {
        let fx = Fixture::new();
        let mut graph = InstrumentGraph::new();
        graph
            .register(InstrumentSpec::ratio(
                "A/B",
                InstrumentInput::new("A"),
                InstrumentInput::new("B"),
            ))
            .unwrap();

        let window = TimeWindow::new(day(2), day(4));
        let rows = fx
            .ctx()
            .materialize(&graph, "A/B", window, Interval::D1, "fixed")
            .unwrap();

        let stamps: Vec<_> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![day(2), day(4)]);
        assert!(rows.iter().all(|r| r.get(CLOSE) == Some(2.0)));
        assert!(rows.iter().all(|r| r.symbol == "A/B"));

        let calls = fx.calls();
        fx.ctx()
            .materialize(&graph, "A/B", window, Interval::D1, "fixed")
            .unwrap();
        assert_eq!(fx.calls(), calls);
    }

    #[test]
    fn pinned_interval_must_match_request() {
        let fx = Fixture::new();
        let mut graph = InstrumentGraph::new();
        graph
            .register(InstrumentSpec::spread(
                "S",
                vec![
                    InstrumentInput::new("A").pinned(Interval::H1),
                    InstrumentInput::new("B"),
                ],
            ))
            .unwrap();

        let err = fx
            .ctx()
            .materialize(&graph, "S", TimeWindow::new(day(1), day(2)), Interval::D1, "fixed")
            .unwrap_err();
        assert!(matches!(err, EngineError::IntervalMismatch { .. }));
    }

    #[test]
    fn replaced_definition_is_regenerated() {
        let fx = Fixture::new();
        let mut graph = InstrumentGraph::new();
        graph
            .register(InstrumentSpec::spread(
                "X",
                vec![InstrumentInput::new("A"), InstrumentInput::new("B")],
            ))
            .unwrap();
        let window = TimeWindow::new(day(6), day(6));

        let rows = fx.ctx().materialize(&graph, "X", window, Interval::D1, "fixed").unwrap();
        assert_eq!(rows[0].get(CLOSE), Some(3.0));

        graph
            .replace(InstrumentSpec::ratio(
                "X",
                InstrumentInput::new("A"),
                InstrumentInput::new("B"),
            ))
            .unwrap();
        let calls = fx.calls();
        let rows = fx.ctx().materialize(&graph, "X", window, Interval::D1, "fixed").unwrap();
        assert_eq!(rows[0].get(CLOSE), Some(2.0));
        assert_eq!(rows[0].symbol, "X");
        // Inputs stay cached; only the instrument is recomputed.
        assert_eq!(fx.calls(), calls);
    }

    #[test]
    fn fetched_rows_are_not_served_once_a_name_is_defined() {
        let fx = Fixture::new();
        let mut graph = InstrumentGraph::new();
        let window = TimeWindow::new(day(4), day(4));

        // "A" is fetched as a plain symbol first: close 4.
        let rows = fx.ctx().materialize(&graph, "A", window, Interval::D1, "fixed").unwrap();
        assert_eq!(rows[0].get(CLOSE), Some(4.0));

        graph
            .register(InstrumentSpec::weighted(
                "A",
                vec![InstrumentInput::weighted("B", 3.0)],
            ))
            .unwrap();
        let rows = fx.ctx().materialize(&graph, "A", window, Interval::D1, "fixed").unwrap();
        assert_eq!(rows[0].get(CLOSE), Some(6.0));
    }

    #[test]
    fn source_changes_are_reported_once_per_switch() {
        let locks = KeyLocks::new();
        assert_eq!(locks.note_source("SPY", Interval::D1, "yahoo"), None);
        assert_eq!(locks.note_source("SPY", Interval::D1, "yahoo"), None);
        assert_eq!(
            locks.note_source("SPY", Interval::D1, "binance"),
            Some("yahoo".to_string())
        );
        assert_eq!(locks.note_source("SPY", Interval::H1, "yahoo"), None);
    }

    #[test]
    fn same_key_locks_are_shared() {
        let locks = KeyLocks::new();
        let a = locks.lock_for("SPY", Interval::D1);
        let b = locks.lock_for("SPY", Interval::D1);
        let c = locks.lock_for("SPY", Interval::H1);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
