//! Gap resolution: which parts of a requested window are not cached yet.
//!
//! The window is first snapped inward to the interval grid. Ranges are then
//! swept in start order with a cursor at the first uncovered grid point; every
//! stretch between the cursor and the next range becomes a gap, and whatever
//! remains after the last range is the trailing gap. Gaps are inclusive grid
//! windows, so a range ending on Jan-15 leaves a daily gap starting Jan-16.

use crate::domain::{CachedRange, Interval, TimeWindow};

/// Minimal ascending, disjoint set of windows inside `window` not covered by
/// any of `cached`. Empty when the window is fully cached.
pub fn resolve(cached: &[CachedRange], window: TimeWindow, interval: Interval) -> Vec<TimeWindow> {
    let Some(window) = window.snap(interval) else {
        return Vec::new();
    };

    let mut ranges: Vec<&CachedRange> = cached
        .iter()
        .filter(|r| r.start <= r.end && r.end >= window.start && r.start <= window.end)
        .collect();
    ranges.sort_by_key(|r| r.start);

    let mut gaps = Vec::new();
    let mut cursor = window.start;

    for range in ranges {
        if cursor > window.end {
            break;
        }
        if range.start > cursor {
            let gap_end = interval.prev_point(range.start).min(window.end);
            if gap_end >= cursor {
                gaps.push(TimeWindow::new(cursor, gap_end));
            }
        }
        let after = interval.next_point(range.end);
        if after > cursor {
            cursor = after;
        }
    }

    if cursor <= window.end {
        gaps.push(TimeWindow::new(cursor, window.end));
    }

    gaps
}

/// Total number of grid points across `gaps`.
pub fn missing_points(gaps: &[TimeWindow], interval: Interval) -> i64 {
    gaps.iter().map(|g| g.points(interval)).sum()
}
