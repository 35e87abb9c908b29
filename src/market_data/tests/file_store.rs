use chrono::{DateTime, Duration, TimeZone, Utc};
use market_data::bucket::MonthKey;
use market_data::io::{BarStore, FileBarStore};
use market_data::models::{bar::Bar, bar_series::SeriesKey, timeframe::Timeframe};
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 31, 23, 55, 0).unwrap()
}

fn minute_bars(start: DateTime<Utc>, n: i64, base_price: f64) -> Vec<Bar> {
    (0..n)
        .map(|i| Bar::flat(start + Duration::minutes(i), base_price + i as f64, 10.0))
        .collect()
}

fn key(symbol: &str) -> SeriesKey {
    SeriesKey::new(symbol, Timeframe::minutes(1).unwrap())
}

#[tokio::test]
async fn write_then_read_across_month_boundary() {
    let dir = TempDir::new().expect("tempdir");
    let store = FileBarStore::new(dir.path());
    let bars = minute_bars(t0(), 10, 100.0);

    let report = store.write(&key("AAPL"), &bars).await.unwrap();
    assert_eq!(report.partitions, 2);
    assert_eq!(report.bars, 10);

    assert!(
        store
            .partition_path(&key("AAPL"), MonthKey { year: 2025, month: 1 })
            .exists()
    );
    assert!(
        store
            .partition_path(&key("AAPL"), MonthKey { year: 2025, month: 2 })
            .exists()
    );

    let back = store.read(&key("AAPL"), t0()).await.unwrap();
    assert_eq!(back, bars);
}

#[tokio::test]
async fn upsert_is_idempotent_and_replaces_on_collision() {
    let dir = TempDir::new().expect("tempdir");
    let store = FileBarStore::new(dir.path());
    let bars = minute_bars(t0(), 3, 100.0);

    store.write(&key("MSFT"), &bars).await.unwrap();
    store.write(&key("MSFT"), &bars).await.unwrap();
    assert_eq!(store.read(&key("MSFT"), t0()).await.unwrap().len(), 3);

    let corrected = vec![Bar::flat(t0() + Duration::minutes(1), 555.0, 1.0)];
    store.write(&key("MSFT"), &corrected).await.unwrap();
    let back = store.read(&key("MSFT"), t0()).await.unwrap();
    assert_eq!(back.len(), 3);
    assert_eq!(back[1].close, 555.0);
}

#[tokio::test]
async fn read_respects_since_and_symbol_boundaries() {
    let dir = TempDir::new().expect("tempdir");
    let store = FileBarStore::new(dir.path());
    store
        .write(&key("BRK"), &minute_bars(t0(), 5, 1.0))
        .await
        .unwrap();
    store
        .write(&key("BRK/B"), &minute_bars(t0(), 5, 50.0))
        .await
        .unwrap();

    let since = t0() + Duration::minutes(3);
    let brk = store.read(&key("BRK"), since).await.unwrap();
    assert_eq!(brk.len(), 2);
    assert!(brk.iter().all(|b| b.close < 50.0));

    let brk_b = store.read(&key("BRK/B"), t0()).await.unwrap();
    assert_eq!(brk_b.len(), 5);
}

#[tokio::test]
async fn missing_root_reads_empty() {
    let dir = TempDir::new().expect("tempdir");
    let store = FileBarStore::new(dir.path().join("never-created"));
    assert!(store.read(&key("AAPL"), t0()).await.unwrap().is_empty());
    let info = store.storage_info().await.unwrap();
    assert!(info.series.is_empty());
    assert_eq!(info.total_bytes, 0);
}

#[tokio::test]
async fn no_temp_files_left_behind_and_inventory_counts() {
    let dir = TempDir::new().expect("tempdir");
    let store = FileBarStore::new(dir.path());
    store
        .write(&key("AAPL"), &minute_bars(t0(), 10, 1.0))
        .await
        .unwrap();
    store
        .write(&key("ETH/USD"), &minute_bars(t0(), 2, 1.0))
        .await
        .unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path().join("1m"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().all(|n| n.ends_with(".json")), "{names:?}");

    let info = store.storage_info().await.unwrap();
    assert_eq!(info.series.len(), 2);
    let aapl = info.series.iter().find(|s| s.symbol == "AAPL").unwrap();
    assert_eq!(aapl.partitions, 2);
    assert!(info.total_bytes > 0);
    assert!(info.series.iter().any(|s| s.symbol == "ETH/USD"));
}

#[tokio::test]
async fn slash_and_underscore_symbols_stay_apart() {
    let dir = TempDir::new().expect("tempdir");
    let store = FileBarStore::new(dir.path());
    store
        .write(&key("BTC/USD"), &minute_bars(t0(), 3, 100.0))
        .await
        .unwrap();
    store
        .write(&key("BTC_USD"), &minute_bars(t0(), 2, 1.0))
        .await
        .unwrap();

    assert_eq!(store.read(&key("BTC/USD"), t0()).await.unwrap().len(), 3);
    assert_eq!(store.read(&key("BTC_USD"), t0()).await.unwrap().len(), 2);
    let mut symbols: Vec<String> = store
        .storage_info()
        .await
        .unwrap()
        .series
        .into_iter()
        .map(|s| s.symbol)
        .collect();
    symbols.sort();
    assert_eq!(symbols, vec!["BTC/USD".to_string(), "BTC_USD".to_string()]);
}
