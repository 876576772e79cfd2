//! Bar interval and the timestamp grid it defines.
//!
//! Every interval is a fixed-length step. Grid points are multiples of the step
//! counted from the Unix epoch, except weekly bars which are anchored on Monday
//! 1970-01-05 so that weeks open on Monday like exchange candles do.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Bar granularity of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
}

impl Interval {
    pub const ALL: [Interval; 14] = [
        Interval::M1,
        Interval::M3,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H2,
        Interval::H4,
        Interval::H6,
        Interval::H8,
        Interval::H12,
        Interval::D1,
        Interval::D3,
        Interval::W1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H4 => "4h",
            Interval::H6 => "6h",
            Interval::H8 => "8h",
            Interval::H12 => "12h",
            Interval::D1 => "1d",
            Interval::D3 => "3d",
            Interval::W1 => "1w",
        }
    }

    /// Length of one bar in milliseconds.
    pub fn step_millis(&self) -> i64 {
        match self {
            Interval::M1 => MINUTE_MS,
            Interval::M3 => 3 * MINUTE_MS,
            Interval::M5 => 5 * MINUTE_MS,
            Interval::M15 => 15 * MINUTE_MS,
            Interval::M30 => 30 * MINUTE_MS,
            Interval::H1 => HOUR_MS,
            Interval::H2 => 2 * HOUR_MS,
            Interval::H4 => 4 * HOUR_MS,
            Interval::H6 => 6 * HOUR_MS,
            Interval::H8 => 8 * HOUR_MS,
            Interval::H12 => 12 * HOUR_MS,
            Interval::D1 => DAY_MS,
            Interval::D3 => 3 * DAY_MS,
            Interval::W1 => 7 * DAY_MS,
        }
    }

    pub fn step(&self) -> Duration {
        Duration::milliseconds(self.step_millis())
    }

    fn origin_millis(&self) -> i64 {
        match self {
            Interval::W1 => 4 * DAY_MS,
            _ => 0,
        }
    }

    fn offset_into_step(&self, ts: DateTime<Utc>) -> i64 {
        (ts.timestamp_millis() - self.origin_millis()).rem_euclid(self.step_millis())
    }

    /// Largest grid point `<= ts`.
    pub fn align_down(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts - Duration::milliseconds(self.offset_into_step(ts))
    }

    /// Smallest grid point `>= ts`.
    pub fn align_up(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self.offset_into_step(ts) {
            0 => ts,
            rem => ts + Duration::milliseconds(self.step_millis() - rem),
        }
    }

    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        self.offset_into_step(ts) == 0
    }

    /// Last grid point strictly before `ts`.
    pub fn prev_point(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.align_down(ts - Duration::milliseconds(1))
    }

    /// First grid point strictly after `ts`.
    pub fn next_point(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.align_down(ts) + self.step()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let normalized = match normalized.as_str() {
            "60m" => "1h",
            "1wk" => "1w",
            other => other,
        };
        Interval::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == normalized)
            .ok_or_else(|| format!("unknown interval '{s}'"))
    }
}
