//! Durable storage seam for bar history.
//!
//! A [`BarStore`] is an idempotent key-value store for bars: writes upsert by
//! `(symbol, timeframe, month, timestamp)` so replaying the same bars twice is
//! harmless, and reads return everything at or after a cut-off for cold-start
//! backfill. The on-disk format is the implementation's business.

pub mod file_store;
pub mod memory_store;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::{Backtrace, Snafu};

use crate::bucket::MonthKey;
use crate::models::{bar::Bar, bar_series::SeriesKey, timeframe::Timeframe};

pub use file_store::FileBarStore;
pub use memory_store::MemoryBarStore;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// A filesystem operation failed.
    #[snafu(display("I/O error on {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// A partition could not be encoded or decoded.
    #[snafu(display("Data conversion error on {path}: {source}"))]
    Conversion {
        path: String,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    /// The temporary file could not be moved over the partition.
    #[snafu(display("Failed to persist {path}: {source}"))]
    Persist {
        path: String,
        source: tempfile::PersistError,
        backtrace: Backtrace,
    },

    /// The blocking worker running the I/O panicked or was cancelled.
    #[snafu(display("Storage task failed: {source}"))]
    TaskJoin {
        source: tokio::task::JoinError,
        backtrace: Backtrace,
    },

    /// The backend refused the operation.
    #[snafu(display("Store unavailable: {message}"))]
    Unavailable {
        message: String,
        backtrace: Backtrace,
    },
}

/// Outcome of one upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Month partitions touched.
    pub partitions: usize,
    /// Bars handed to the store.
    pub bars: usize,
}

/// Inventory entry for one stored series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub partitions: usize,
    pub bytes: u64,
}

/// What the store currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub series: Vec<StoredSeries>,
    pub total_bytes: u64,
}

#[async_trait]
pub trait BarStore: Send + Sync {
    /// Upserts `bars` into the month partitions of `key`.
    ///
    /// On timestamp collisions the incoming bar replaces the stored one.
    async fn write(&self, key: &SeriesKey, bars: &[Bar]) -> Result<WriteReport, StoreError>;

    /// Returns all stored bars of `key` with `timestamp >= since`, ordered and unique.
    async fn read(&self, key: &SeriesKey, since: DateTime<Utc>) -> Result<Vec<Bar>, StoreError>;

    /// Lists stored series with their partition counts and sizes.
    async fn storage_info(&self) -> Result<StorageInfo, StoreError>;
}

/// Splits bars into their month partitions.
pub fn partition_by_month(bars: &[Bar]) -> BTreeMap<MonthKey, Vec<Bar>> {
    let mut out: BTreeMap<MonthKey, Vec<Bar>> = BTreeMap::new();
    for bar in bars {
        out.entry(MonthKey::of(bar.timestamp)).or_default().push(*bar);
    }
    out
}

/// Merges `incoming` over `existing`: sorted, unique by timestamp, incoming wins.
pub fn merge_bars(existing: Vec<Bar>, incoming: &[Bar]) -> Vec<Bar> {
    let mut by_ts: BTreeMap<DateTime<Utc>, Bar> =
        existing.into_iter().map(|b| (b.timestamp, b)).collect();
    for bar in incoming {
        by_ts.insert(bar.timestamp, *bar);
    }
    by_ts.into_values().collect()
}
