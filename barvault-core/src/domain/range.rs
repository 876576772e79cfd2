//! Time windows and cached ranges on the interval grid.
//!
//! Both are inclusive on both ends: `[start, end]` covers every grid point
//! `start, start + step, ..., end`. Two ranges "touch" when the first grid
//! point after one is the start of the other, which is why coalescing needs
//! the interval.

use super::interval::Interval;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive `[start, end]` span of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Shrink the window inward to grid points. `None` if no grid point fits.
    pub fn snap(&self, interval: Interval) -> Option<TimeWindow> {
        let start = interval.align_up(self.start);
        let end = interval.align_down(self.end);
        (start <= end).then_some(TimeWindow { start, end })
    }

    /// Number of grid points in the window (after snapping).
    pub fn points(&self, interval: Interval) -> i64 {
        match self.snap(interval) {
            Some(w) => (w.end - w.start).num_milliseconds() / interval.step_millis() + 1,
            None => 0,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// A maximal span known to be fully populated for `(symbol, interval)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRange {
    pub symbol: String,
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CachedRange {
    pub fn new(symbol: impl Into<String>, interval: Interval, window: TimeWindow) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            start: window.start,
            end: window.end,
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    pub fn covers(&self, window: &TimeWindow) -> bool {
        self.start <= window.start && window.end <= self.end
    }
}

/// Insert `window` into a key's range set, keeping it sorted, disjoint and
/// non-adjacent.
///
/// Ranges that overlap or touch on the grid are merged into one. A window that
/// lies wholly inside an existing range leaves the set unchanged. Returns
/// whether the set changed.
pub fn insert_range(
    ranges: &mut Vec<CachedRange>,
    symbol: &str,
    interval: Interval,
    window: TimeWindow,
) -> bool {
    if window.start > window.end {
        return false;
    }
    if ranges.iter().any(|r| r.covers(&window)) {
        return false;
    }

    ranges.push(CachedRange::new(symbol, interval, window));
    ranges.sort_by_key(|r| r.start);

    let mut merged: Vec<CachedRange> = Vec::with_capacity(ranges.len());
    for range in ranges.drain(..) {
        match merged.last_mut() {
            Some(last) if range.start <= interval.next_point(last.end) => {
                if range.end > last.end {
                    last.end = range.end;
                }
            }
            _ => merged.push(range),
        }
    }
    *ranges = merged;
    true
}
