//! Periodic hand-off of buffered bars to durable storage, and cold-start backfill.
//!
//! Each cycle writes, for every series that changed since its last successful
//! write, all bars newer than that write and at least the newest `flush_tail`
//! bars. Writes are upserts, so overlapping tails are harmless. A failed write is retried with exponential backoff
//! (`base_delay * 2^attempt`); once retries run out the series is skipped and
//! stays dirty for the next cycle. Ingestion and queries never wait on any of it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use market_data::io::{BarStore, StoreError};
use market_data::models::bar_series::SeriesKey;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

use crate::config::PersistenceConfig;
use crate::registry::SymbolRegistry;

/// Counters accumulated over the scheduler's lifetime.
#[derive(Debug, Default)]
pub struct PersistenceStats {
    cycles: AtomicU64,
    series_written: AtomicU64,
    bars_written: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub series_written: u64,
    pub bars_written: u64,
    pub retries: u64,
    pub failures: u64,
}

impl PersistenceStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            series_written: self.series_written.load(Ordering::Relaxed),
            bars_written: self.bars_written.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Result of one persistence cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Series written successfully.
    pub written: usize,
    /// Series with nothing new.
    pub skipped: usize,
    /// Series whose write failed after all retries.
    pub failed: usize,
    pub bars: usize,
}

/// Outcome of a cold-start backfill over several symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Bars added per symbol.
    pub loaded: BTreeMap<String, usize>,
    /// Symbols whose history could not be read.
    pub failed: Vec<String>,
}

pub struct PersistenceScheduler {
    registry: Arc<SymbolRegistry>,
    store: Arc<dyn BarStore>,
    settings: PersistenceConfig,
    stats: PersistenceStats,
}

impl PersistenceScheduler {
    pub fn new(
        registry: Arc<SymbolRegistry>,
        store: Arc<dyn BarStore>,
        settings: PersistenceConfig,
    ) -> Self {
        Self {
            registry,
            store,
            settings,
            stats: PersistenceStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn settings(&self) -> &PersistenceConfig {
        &self.settings
    }

    /// Runs `op` until it succeeds or `max_retries` retries have failed.
    async fn with_retry<T, F, Fut>(
        &self,
        action: &'static str,
        key: &SeriesKey,
        mut op: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.settings.max_retries => {
                    let delay = self
                        .settings
                        .base_delay()
                        .saturating_mul(1u32 << attempt.min(16));
                    warn!(
                        series = %key,
                        action,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "store operation failed, retrying"
                    );
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Writes the unflushed bars of every dirty series once.
    pub async fn flush_once(&self) -> FlushReport {
        let mut report = FlushReport::default();
        let tail = match self.settings.flush_tail {
            0 => usize::MAX,
            n => n,
        };
        for entry in self.registry.entries() {
            let Some(pending) = entry.pending(tail) else {
                report.skipped += 1;
                continue;
            };
            let key = entry.key();
            let bars = &pending.bars;
            match self
                .with_retry("write", key, || self.store.write(key, bars))
                .await
            {
                Ok(written) => {
                    entry.mark_flushed(&pending);
                    report.written += 1;
                    report.bars += written.bars;
                    self.stats.series_written.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .bars_written
                        .fetch_add(written.bars as u64, Ordering::Relaxed);
                    debug!(series = %key, bars = written.bars, partitions = written.partitions, "series flushed");
                }
                Err(err) => {
                    report.failed += 1;
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    error!(series = %key, error = %err, "giving up on series until next cycle");
                }
            }
        }
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        report
    }

    /// Loads recent history for `symbol` when its buffer is still warming up.
    ///
    /// Returns the number of bars added. The symbol is registered if needed.
    pub async fn backfill(&self, symbol: &str, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.registry.subscribe(symbol);
        let Some(entry) = self.registry.entry(symbol) else {
            return Ok(0);
        };
        let need = self.registry.config().indicators.required_bars();
        if entry.len() >= need {
            debug!(symbol, bars = entry.len(), "buffer already warm, skipping backfill");
            return Ok(0);
        }
        let since = now - self.settings.backfill_window();
        let key = entry.key();
        let history = self
            .with_retry("read", key, || self.store.read(key, since))
            .await?;
        let read = history.len();
        let added = entry.merge_history(history);
        info!(symbol, read, added, bars = entry.len(), "backfilled from storage");
        Ok(added)
    }

    /// Backfills every symbol in `symbols`; failures are logged and reported, not returned.
    pub async fn restore(&self, symbols: &[String], now: DateTime<Utc>) -> RestoreReport {
        let mut report = RestoreReport::default();
        for symbol in symbols {
            match self.backfill(symbol, now).await {
                Ok(added) => {
                    report.loaded.insert(symbol.clone(), added);
                }
                Err(err) => {
                    error!(symbol = %symbol, error = %err, "backfill failed");
                    report.failed.push(symbol.clone());
                }
            }
        }
        report
    }

    /// Flushes every `interval_secs` until `shutdown` fires (or its sender is dropped).
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.settings.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        info!(interval_secs = self.settings.interval_secs, "persistence scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let report = self.flush_once().await;
                    if report.written > 0 || report.failed > 0 {
                        info!(written = report.written, failed = report.failed, bars = report.bars, "persistence cycle");
                    }
                }
            }
        }

        if self.settings.flush_on_shutdown {
            let report = self.flush_once().await;
            info!(written = report.written, failed = report.failed, "final flush on shutdown");
        }
        info!(stats = ?self.stats.snapshot(), "persistence scheduler stopped");
    }

    pub fn spawn(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }
}
