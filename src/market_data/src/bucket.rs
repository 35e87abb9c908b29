//! UTC bucket mapping utilities.
//!
//! - One stable epoch: Unix (1970-01-01T00:00:00Z).
//! - Fixed-size windows (minute/hour/day multiples): second-based math, so the
//!   same wall-clock window always maps to the same id no matter when it is computed.
//! - Month partitions: calendar (year, month) keys used by durable storage.
//!
//! All functions assume the input timestamp is UTC.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

/// Unix epoch start (1970-01-01T00:00:00Z).
pub const EPOCH_UNIX: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Number of seconds in a minute.
pub const SECS_PER_MINUTE: i64 = 60;
/// Number of seconds in an hour.
pub const SECS_PER_HOUR: i64 = 60 * SECS_PER_MINUTE;
/// Number of seconds in a day.
pub const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;

/// Compute the window id of a UTC timestamp for windows `width_secs` wide.
pub fn window_id(ts_utc: DateTime<Utc>, width_secs: i64) -> i64 {
    ts_utc.timestamp().div_euclid(width_secs)
}

/// Start instant of window `id`.
pub fn window_start_of(id: i64, width_secs: i64) -> DateTime<Utc> {
    EPOCH_UNIX + Duration::seconds(id * width_secs)
}

/// Floor a timestamp to the start of its epoch-anchored window.
pub fn window_start(ts_utc: DateTime<Utc>, width_secs: i64) -> DateTime<Utc> {
    window_start_of(window_id(ts_utc, width_secs), width_secs)
}

/// Calendar month partition key, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(ts_utc: DateTime<Utc>) -> Self {
        Self {
            year: ts_utc.year(),
            month: ts_utc.month(),
        }
    }

}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got {s:?}"))?;
        let year: i32 = y.parse().map_err(|_| format!("bad year in {s:?}"))?;
        let month: u32 = m.parse().map_err(|_| format!("bad month in {s:?}"))?;
        if !(1..=12).contains(&month) {
            return Err(format!("month out of range in {s:?}"));
        }
        Ok(Self { year, month })
    }
}
