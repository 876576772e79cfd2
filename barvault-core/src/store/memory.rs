//! In-memory range store for tests and ephemeral sessions.

use super::{check_keys, KeyStatus, RangeStore, StoreError};
use crate::domain::{insert_range, CachedRange, Interval, Row, TimeWindow};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct Series {
    rows: BTreeMap<DateTime<Utc>, Row>,
    ranges: Vec<CachedRange>,
    updated_at: Option<DateTime<Utc>>,
}

/// Range store backed by a map guarded by one `RwLock`.
///
/// Each upsert happens under the write lock, so rows and ranges change
/// together.
#[derive(Debug, Default)]
pub struct MemoryRangeStore {
    series: RwLock<HashMap<(String, Interval), Series>>,
}

impl MemoryRangeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RangeStore for MemoryRangeStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn cached_ranges(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Vec<CachedRange>, StoreError> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        Ok(series
            .get(&(symbol.to_string(), interval))
            .map(|s| s.ranges.clone())
            .unwrap_or_default())
    }

    fn upsert(
        &self,
        symbol: &str,
        interval: Interval,
        rows: Vec<Row>,
        covered: TimeWindow,
    ) -> Result<(), StoreError> {
        check_keys(symbol, interval, &rows)?;

        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        let entry = series.entry((symbol.to_string(), interval)).or_default();
        for row in rows {
            entry.rows.insert(row.timestamp, row);
        }
        insert_range(&mut entry.ranges, symbol, interval, covered);
        entry.updated_at = Some(Utc::now());
        Ok(())
    }

    fn read(
        &self,
        symbol: &str,
        interval: Interval,
        window: TimeWindow,
    ) -> Result<Vec<Row>, StoreError> {
        if window.start > window.end {
            return Ok(Vec::new());
        }
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        Ok(series
            .get(&(symbol.to_string(), interval))
            .map(|s| {
                s.rows
                    .range(window.start..=window.end)
                    .map(|(_, row)| row.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn status(&self) -> Result<Vec<KeyStatus>, StoreError> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        Ok(series
            .iter()
            .map(|((symbol, interval), s)| KeyStatus {
                symbol: symbol.clone(),
                interval: *interval,
                ranges: s.ranges.clone(),
                row_count: s.rows.len(),
                updated_at: s.updated_at,
            })
            .collect())
    }
}
