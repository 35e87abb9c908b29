//! The query surface and the wiring between registry, store and scheduler.

use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use market_data::io::{BarStore, FileBarStore, StorageInfo, StoreError};
use market_data::models::{bar::Bar, timeframe::Timeframe};
use market_data::providers::BarEvent;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::EngineConfig;
use crate::persistence::{PersistenceScheduler, RestoreReport};
use crate::registry::{IngestOutcome, SeriesStatus, SymbolRegistry};
use crate::snapshot::SignalResult;

/// Ingest outcomes counted over a run of [`SignalEngine::run_ingest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub appended: usize,
    pub replaced: usize,
    pub out_of_order: usize,
    pub unsupported: usize,
}

impl IngestStats {
    fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Appended => self.appended += 1,
            IngestOutcome::Replaced => self.replaced += 1,
            IngestOutcome::OutOfOrder => self.out_of_order += 1,
            IngestOutcome::UnsupportedTimeframe => self.unsupported += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.appended + self.replaced + self.out_of_order + self.unsupported
    }
}

/// Compact per-symbol line for dashboards: price, RSI and the flags that fired.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchlistEntry {
    pub symbol: String,
    pub price: f64,
    pub rsi: f64,
    pub signals: Vec<&'static str>,
}

pub struct SignalEngine {
    registry: Arc<SymbolRegistry>,
    store: Arc<dyn BarStore>,
    persistence: Arc<PersistenceScheduler>,
}

impl SignalEngine {
    /// The configuration is read once here and never reloaded.
    pub fn new(config: EngineConfig, store: Arc<dyn BarStore>) -> Self {
        let settings = config.persistence.clone();
        let registry = Arc::new(SymbolRegistry::new(Arc::new(config)));
        let persistence = Arc::new(PersistenceScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            settings,
        ));
        Self {
            registry,
            store,
            persistence,
        }
    }

    /// An engine backed by a [`FileBarStore`] rooted at `persistence.data_dir`.
    pub fn with_file_store(config: EngineConfig) -> Self {
        let store = Arc::new(FileBarStore::new(config.persistence.data_dir.clone()));
        Self::new(config, store)
    }

    pub fn config(&self) -> &EngineConfig {
        self.registry.config()
    }

    pub fn registry(&self) -> &Arc<SymbolRegistry> {
        &self.registry
    }

    pub fn persistence(&self) -> &Arc<PersistenceScheduler> {
        &self.persistence
    }

    pub fn ingest(&self, event: BarEvent) -> IngestOutcome {
        self.registry
            .ingest_bar(&event.symbol, event.timeframe, event.bar)
    }

    pub fn ingest_bar(&self, symbol: &str, timeframe: Timeframe, bar: Bar) -> IngestOutcome {
        self.registry.ingest_bar(symbol, timeframe, bar)
    }

    /// Drains `events` until every sender is dropped.
    pub async fn run_ingest(&self, mut events: mpsc::Receiver<BarEvent>) -> IngestStats {
        let mut stats = IngestStats::default();
        while let Some(event) = events.recv().await {
            stats.record(self.ingest(event));
        }
        info!(
            appended = stats.appended,
            replaced = stats.replaced,
            out_of_order = stats.out_of_order,
            unsupported = stats.unsupported,
            "bar stream ended"
        );
        stats
    }

    pub fn get_signals(&self, symbol: &str, timeframe: Timeframe) -> SignalResult {
        self.registry.query(symbol, timeframe)
    }

    /// Latest result per symbol at the base timeframe, in the order given.
    pub fn get_watchlist_snapshot<S: AsRef<str>>(
        &self,
        symbols: &[S],
    ) -> IndexMap<String, SignalResult> {
        self.get_watchlist_snapshot_at(symbols, self.registry.base_timeframe())
    }

    pub fn get_watchlist_snapshot_at<S: AsRef<str>>(
        &self,
        symbols: &[S],
        timeframe: Timeframe,
    ) -> IndexMap<String, SignalResult> {
        symbols
            .iter()
            .map(|s| {
                let symbol = s.as_ref();
                (symbol.to_string(), self.get_signals(symbol, timeframe))
            })
            .collect()
    }

    /// Ready symbols only, at the base timeframe.
    pub fn watchlist_summary<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<WatchlistEntry> {
        self.get_watchlist_snapshot(symbols)
            .into_values()
            .filter_map(|result| match result {
                SignalResult::Ready(snap) => Some(WatchlistEntry {
                    price: snap.price(),
                    rsi: snap.rsi(),
                    signals: snap.crossings.active(),
                    symbol: snap.symbol,
                }),
                SignalResult::NotReady(_) => None,
            })
            .collect()
    }

    pub fn status(&self) -> Vec<SeriesStatus> {
        self.registry.status()
    }

    pub async fn storage_info(&self) -> Result<StorageInfo, StoreError> {
        self.store.storage_info().await
    }

    /// Cold-start backfill of `symbols` from the store.
    pub async fn restore<S: AsRef<str>>(&self, symbols: &[S]) -> RestoreReport {
        let symbols: Vec<String> = symbols.iter().map(|s| s.as_ref().to_string()).collect();
        self.persistence.restore(&symbols, Utc::now()).await
    }

    /// Starts the periodic flush task; it stops (after a final flush) when `shutdown` fires.
    pub fn spawn_persistence(&self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        self.persistence.spawn(shutdown)
    }
}
