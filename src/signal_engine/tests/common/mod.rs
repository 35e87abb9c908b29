#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use market_data::io::{BarStore, MemoryBarStore};
use market_data::models::{bar::Bar, bar_series::BarSeries, timeframe::Timeframe};
use signal_engine::{EngineConfig, SignalEngine};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 14, 30, 0).unwrap()
}

pub fn one_minute() -> Timeframe {
    Timeframe::minutes(1).unwrap()
}

/// One-minute bars starting at [`t0`], one per close.
pub fn minute_bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar::flat(t0() + Duration::minutes(i as i64), c, 100.0))
        .collect()
}

pub fn series(symbol: &str, closes: &[f64]) -> BarSeries {
    BarSeries {
        symbol: symbol.to_string(),
        timeframe: one_minute(),
        bars: minute_bars(closes),
    }
}

/// A smooth, non-trending close sequence.
pub fn wavy_closes(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 + (i as f64 * 0.4).sin() * 2.0).collect()
}

/// Config with a fast retry delay so failing-store tests stay quick.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.persistence.base_delay_ms = 1;
    config
}

pub fn memory_engine() -> (SignalEngine, Arc<MemoryBarStore>) {
    let store = Arc::new(MemoryBarStore::new());
    let engine = SignalEngine::new(test_config(), store.clone() as Arc<dyn BarStore>);
    (engine, store)
}

pub fn feed(engine: &SignalEngine, symbol: &str, bars: &[Bar]) {
    for bar in bars {
        engine.ingest_bar(symbol, one_minute(), *bar);
    }
}

/// Like [`minute_bars`], but ending about an hour ago so backfill windows include them.
pub fn recent_minute_bars(closes: &[f64]) -> Vec<Bar> {
    let start = market_data::bucket::window_start(
        Utc::now() - Duration::minutes(60 + closes.len() as i64),
        60,
    );
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar::flat(start + Duration::minutes(i as i64), c, 100.0))
        .collect()
}
