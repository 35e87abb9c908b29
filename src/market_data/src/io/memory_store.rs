//! In-process [`BarStore`] used by tests and ephemeral runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::bucket::MonthKey;
use crate::io::{
    BarStore, StorageInfo, StoreError, StoredSeries, UnavailableSnafu, WriteReport,
    partition_by_month,
};
use crate::models::{bar::Bar, bar_series::SeriesKey};

type Partition = BTreeMap<DateTime<Utc>, Bar>;

/// Keeps partitions in memory with the same upsert semantics as the file store.
///
/// `fail_next_writes(n)` makes the next `n` writes return
/// [`StoreError::Unavailable`], which lets callers exercise their retry paths.
#[derive(Debug, Default)]
pub struct MemoryBarStore {
    partitions: Mutex<HashMap<(SeriesKey, MonthKey), Partition>>,
    failing_writes: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every stored bar of `key`, ordered.
    pub async fn all_bars(&self, key: &SeriesKey) -> Vec<Bar> {
        let guard = self.partitions.lock().await;
        let mut months: Vec<(&MonthKey, &Partition)> = guard
            .iter()
            .filter(|((k, _), _)| k == key)
            .map(|((_, m), p)| (m, p))
            .collect();
        months.sort_by_key(|(m, _)| **m);
        months
            .into_iter()
            .flat_map(|(_, p)| p.values().copied())
            .collect()
    }

    fn take_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BarStore for MemoryBarStore {
    async fn write(&self, key: &SeriesKey, bars: &[Bar]) -> Result<WriteReport, StoreError> {
        if self.take_failure() {
            return UnavailableSnafu {
                message: format!("injected write failure for {key}"),
            }
            .fail();
        }
        let parts = partition_by_month(bars);
        let partitions = parts.len();
        let mut guard = self.partitions.lock().await;
        for (month, incoming) in parts {
            let slot = guard.entry((key.clone(), month)).or_default();
            for bar in incoming {
                slot.insert(bar.timestamp, bar);
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteReport {
            partitions,
            bars: bars.len(),
        })
    }

    async fn read(&self, key: &SeriesKey, since: DateTime<Utc>) -> Result<Vec<Bar>, StoreError> {
        Ok(self
            .all_bars(key)
            .await
            .into_iter()
            .filter(|b| b.timestamp >= since)
            .collect())
    }

    async fn storage_info(&self) -> Result<StorageInfo, StoreError> {
        let guard = self.partitions.lock().await;
        let mut per_series: BTreeMap<SeriesKey, (usize, u64)> = BTreeMap::new();
        for ((key, _), partition) in guard.iter() {
            let slot = per_series.entry(key.clone()).or_insert((0, 0));
            slot.0 += 1;
            slot.1 += (partition.len() * std::mem::size_of::<Bar>()) as u64;
        }
        let series: Vec<StoredSeries> = per_series
            .into_iter()
            .map(|(key, (partitions, bytes))| StoredSeries {
                symbol: key.symbol,
                timeframe: key.timeframe,
                partitions,
                bytes,
            })
            .collect();
        let total_bytes = series.iter().map(|s| s.bytes).sum();
        Ok(StorageInfo {
            series,
            total_bytes,
        })
    }
}
