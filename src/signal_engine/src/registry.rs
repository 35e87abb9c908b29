//! Per-symbol bar buffers behind fine-grained locks.
//!
//! The symbol map sits behind one `RwLock` that is only write-locked to add or
//! remove a symbol. Each symbol's buffer has its own `RwLock`, so ingesting
//! into one symbol never blocks readers or writers of another.
//!
//! Queries copy the bars they need out of the buffer and release the lock
//! before running any indicator math.
//!
//! Only the base timeframe is stored. Wider timeframes are derived per query
//! with [`aggregate`](crate::aggregate::aggregate).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use market_data::models::{bar::Bar, bar_series::SeriesKey, timeframe::Timeframe};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::aggregate;
use crate::buffer::{AppendOutcome, BarBuffer, BufferState};
use crate::config::EngineConfig;
use crate::crossing::detect_latest;
use crate::indicators;
use crate::snapshot::{NotReady, SignalResult, SignalSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Appended,
    Replaced,
    OutOfOrder,
    UnsupportedTimeframe,
}

/// One symbol's buffer plus its persistence bookkeeping.
#[derive(Debug)]
pub struct SeriesEntry {
    key: SeriesKey,
    buffer: RwLock<BarBuffer>,
    flushed_revision: AtomicU64,
    /// Newest bar timestamp known to be in durable storage.
    flushed_through: Mutex<Option<DateTime<Utc>>>,
}

/// Bars pending a durable write, with the state they were taken at.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub bars: Vec<Bar>,
    pub revision: u64,
}

impl PendingWrite {
    fn through(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }
}

impl SeriesEntry {
    fn new(key: SeriesKey, capacity: usize, ready_at: usize) -> Self {
        Self {
            key,
            buffer: RwLock::new(BarBuffer::new(capacity, ready_at)),
            flushed_revision: AtomicU64::new(0),
            flushed_through: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.buffer.read().revision()
    }

    pub fn append(&self, bar: Bar) -> AppendOutcome {
        self.buffer.write().append(bar)
    }

    pub fn bars(&self) -> Vec<Bar> {
        self.buffer.read().to_vec()
    }

    /// Every buffered bar newer than the last durable write, and never fewer
    /// than the newest `min_tail` bars so in-place corrections are rewritten.
    ///
    /// `None` when nothing changed since the last [`mark_flushed`](Self::mark_flushed).
    pub fn pending(&self, min_tail: usize) -> Option<PendingWrite> {
        let buffer = self.buffer.read();
        let revision = buffer.revision();
        if revision <= self.flushed_revision.load(Ordering::Acquire) || buffer.is_empty() {
            return None;
        }
        let unwritten = match *self.flushed_through.lock() {
            Some(through) => buffer.count_after(through),
            None => buffer.len(),
        };
        Some(PendingWrite {
            bars: buffer.snapshot(unwritten.max(min_tail)),
            revision,
        })
    }

    /// Records that `write` reached durable storage.
    pub fn mark_flushed(&self, write: &PendingWrite) {
        if let Some(ts) = write.through() {
            self.advance_through(ts);
        }
        self.flushed_revision.fetch_max(write.revision, Ordering::AcqRel);
    }

    fn advance_through(&self, ts: DateTime<Utc>) {
        let mut through = self.flushed_through.lock();
        if through.is_none_or(|t| t < ts) {
            *through = Some(ts);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.revision() > self.flushed_revision.load(Ordering::Acquire)
    }

    /// Merges bars read back from durable storage; see [`BarBuffer::merge_history`].
    ///
    /// Those bars are already stored, so an entry with nothing pending stays clean.
    pub fn merge_history(&self, history: Vec<Bar>) -> usize {
        let mut buffer = self.buffer.write();
        let clean = buffer.revision() <= self.flushed_revision.load(Ordering::Acquire);
        let newest = history.iter().map(|b| b.timestamp).max();
        let added = buffer.merge_history(history);
        if let Some(ts) = newest {
            self.advance_through(ts);
        }
        if clean {
            self.flushed_revision.fetch_max(buffer.revision(), Ordering::AcqRel);
        }
        added
    }

    fn reset(&self) {
        self.buffer.write().reset();
    }

    fn status(&self) -> SeriesStatus {
        let buffer = self.buffer.read();
        SeriesStatus {
            symbol: self.key.symbol.clone(),
            timeframe: self.key.timeframe,
            bars: buffer.len(),
            capacity: buffer.capacity(),
            state: buffer.state(),
            last_timestamp: buffer.last().map(|b| b.timestamp),
            dirty: buffer.revision() > self.flushed_revision.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time view of one symbol's buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesStatus {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: usize,
    pub capacity: usize,
    pub state: BufferState,
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Holds bars not yet handed to durable storage.
    pub dirty: bool,
}

#[derive(Debug)]
pub struct SymbolRegistry {
    config: Arc<EngineConfig>,
    series: RwLock<HashMap<String, Arc<SeriesEntry>>>,
}

impl SymbolRegistry {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn base_timeframe(&self) -> Timeframe {
        self.config.base_timeframe
    }

    pub fn entry(&self, symbol: &str) -> Option<Arc<SeriesEntry>> {
        self.series.read().get(symbol).cloned()
    }

    /// The entry for `symbol`, and whether this call created it.
    fn entry_or_create(&self, symbol: &str) -> (Arc<SeriesEntry>, bool) {
        if let Some(entry) = self.entry(symbol) {
            return (entry, false);
        }
        let mut map = self.series.write();
        if let Some(entry) = map.get(symbol) {
            return (entry.clone(), false);
        }
        debug!(symbol, "creating series buffer");
        let entry = Arc::new(SeriesEntry::new(
            SeriesKey::new(symbol, self.config.base_timeframe),
            self.config.buffer_capacity,
            self.config.indicators.required_bars(),
        ));
        map.insert(symbol.to_string(), entry.clone());
        (entry, true)
    }

    /// Registers `symbol` with an empty buffer. Returns `false` if it already existed.
    pub fn subscribe(&self, symbol: &str) -> bool {
        let (_, created) = self.entry_or_create(symbol);
        if created {
            info!(symbol, "subscribed");
        }
        created
    }

    /// Drops `symbol` and its buffer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, symbol: &str) -> bool {
        let removed = self.series.write().remove(symbol).is_some();
        if removed {
            info!(symbol, "unsubscribed");
        }
        removed
    }

    /// Clears the buffer of `symbol` but keeps it registered.
    pub fn reset(&self, symbol: &str) -> bool {
        match self.entry(symbol) {
            Some(entry) => {
                entry.reset();
                info!(symbol, "buffer reset");
                true
            }
            None => false,
        }
    }

    /// Appends one bar. Unknown symbols are registered on first sight.
    pub fn ingest_bar(&self, symbol: &str, timeframe: Timeframe, bar: Bar) -> IngestOutcome {
        if timeframe != self.config.base_timeframe {
            warn!(
                symbol,
                %timeframe,
                base = %self.config.base_timeframe,
                "dropping bar of non-base timeframe"
            );
            return IngestOutcome::UnsupportedTimeframe;
        }
        match self.entry_or_create(symbol).0.append(bar) {
            AppendOutcome::Appended { .. } => IngestOutcome::Appended,
            AppendOutcome::Replaced => IngestOutcome::Replaced,
            AppendOutcome::OutOfOrder { last } => {
                debug!(symbol, ts = %bar.timestamp, %last, "dropping out-of-order bar");
                IngestOutcome::OutOfOrder
            }
        }
    }

    /// Copy of every buffered base bar of `symbol`, oldest first.
    pub fn snapshot_bars(&self, symbol: &str) -> Option<Vec<Bar>> {
        self.entry(symbol).map(|e| e.bars())
    }

    /// Indicators and crossings of `symbol` at `timeframe`.
    pub fn query(&self, symbol: &str, timeframe: Timeframe) -> SignalResult {
        let Some(multiple) = self.config.multiple_for(timeframe) else {
            return NotReady::UnsupportedTimeframe { timeframe }.into();
        };
        let Some(entry) = self.entry(symbol) else {
            return NotReady::UnknownSymbol {
                symbol: symbol.to_string(),
            }
            .into();
        };
        let bars = entry.bars();
        evaluate(symbol, timeframe, &bars, multiple, &self.config)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn entries(&self) -> Vec<Arc<SeriesEntry>> {
        let mut entries: Vec<Arc<SeriesEntry>> = self.series.read().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn status(&self) -> Vec<SeriesStatus> {
        self.entries().iter().map(|e| e.status()).collect()
    }
}

/// Runs aggregation, indicators and crossing detection over a copy of base bars.
pub fn evaluate(
    symbol: &str,
    timeframe: Timeframe,
    base: &[Bar],
    multiple: u32,
    config: &EngineConfig,
) -> SignalResult {
    let closed = aggregate(base, config.base_timeframe, multiple);
    let need = config.indicators.required_bars();
    let insufficient = |have: usize| -> SignalResult {
        NotReady::InsufficientBars {
            timeframe,
            have,
            need,
        }
        .into()
    };
    if closed.len() < need {
        return insufficient(closed.len());
    }

    let points = indicators::compute(&closed, &config.indicators);
    match detect_latest(&points, &config.thresholds) {
        Ok(crossing) => SignalResult::Ready(SignalSnapshot {
            symbol: symbol.to_string(),
            timeframe,
            bars: closed.len(),
            current: crossing.current,
            previous: crossing.previous,
            crossings: crossing.flags,
        }),
        Err(_) => insufficient(closed.len()),
    }
}
