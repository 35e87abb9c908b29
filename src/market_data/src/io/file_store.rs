//! Month-partitioned JSON files on the local filesystem.
//!
//! Layout: `<root>/<timeframe>/<SYMBOL>_<YYYY-MM>.json`. In the symbol, `%`
//! and `/` are percent-encoded (`BTC/USD` becomes `BTC%2FUSD`), so every
//! symbol maps to its own files and decodes back unchanged. Each file is a
//! JSON array of bars sorted by timestamp.
//!
//! Writes are read-merge-replace: the partition is rewritten into a temp file
//! in the same directory and renamed over the old one, so a reader (or a crash)
//! never observes a half-written partition. All blocking work runs on tokio's
//! blocking pool.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::ResultExt;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::bucket::MonthKey;
use crate::io::{
    BarStore, ConversionSnafu, IoSnafu, PersistSnafu, StorageInfo, StoreError, StoredSeries,
    TaskJoinSnafu, WriteReport, merge_bars, partition_by_month,
};
use crate::models::{bar::Bar, bar_series::SeriesKey, timeframe::Timeframe};

#[derive(Debug, Clone)]
pub struct FileBarStore {
    root: PathBuf,
}

impl FileBarStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the partition holding `key`'s bars for `month`.
    pub fn partition_path(&self, key: &SeriesKey, month: MonthKey) -> PathBuf {
        partition_path(&self.root, key, month)
    }
}

fn encode_symbol(symbol: &str) -> String {
    symbol.replace('%', "%25").replace('/', "%2F")
}

fn decode_symbol(encoded: &str) -> String {
    encoded.replace("%2F", "/").replace("%25", "%")
}

fn partition_path(root: &Path, key: &SeriesKey, month: MonthKey) -> PathBuf {
    root.join(key.timeframe.to_string())
        .join(format!("{}_{month}.json", encode_symbol(&key.symbol)))
}

/// Splits `<SYMBOL>_<YYYY-MM>.json` into the decoded symbol and month.
fn parse_partition_name(file_name: &str) -> Option<(String, MonthKey)> {
    let stem = file_name.strip_suffix(".json")?;
    let (symbol, month) = stem.rsplit_once('_')?;
    if symbol.is_empty() {
        return None;
    }
    Some((decode_symbol(symbol), month.parse().ok()?))
}

fn read_partition(path: &Path) -> Result<Vec<Bar>, StoreError> {
    let display = path.display().to_string();
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context(IoSnafu { path: display }),
    };
    serde_json::from_str(&text).context(ConversionSnafu { path: display })
}

fn write_partition(path: &Path, bars: &[Bar]) -> Result<(), StoreError> {
    let display = path.display().to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).context(IoSnafu {
        path: dir.display().to_string(),
    })?;

    let tmp = NamedTempFile::new_in(dir).context(IoSnafu {
        path: display.clone(),
    })?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, bars).context(ConversionSnafu {
            path: display.clone(),
        })?;
        writer.flush().context(IoSnafu {
            path: display.clone(),
        })?;
    }
    tmp.as_file().sync_all().context(IoSnafu {
        path: display.clone(),
    })?;
    tmp.persist(path).context(PersistSnafu { path: display })?;
    Ok(())
}

fn upsert_blocking(root: &Path, key: &SeriesKey, bars: &[Bar]) -> Result<WriteReport, StoreError> {
    let parts = partition_by_month(bars);
    let partitions = parts.len();
    for (month, incoming) in parts {
        let path = partition_path(root, key, month);
        let merged = merge_bars(read_partition(&path)?, &incoming);
        write_partition(&path, &merged)?;
        debug!(series = %key, %month, bars = merged.len(), "partition written");
    }
    Ok(WriteReport {
        partitions,
        bars: bars.len(),
    })
}

fn list_dir(dir: &Path) -> Result<Vec<fs::DirEntry>, StoreError> {
    let display = dir.display().to_string();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context(IoSnafu { path: display }),
    };
    entries
        .collect::<Result<Vec<_>, _>>()
        .context(IoSnafu { path: display })
}

fn read_blocking(
    root: &Path,
    key: &SeriesKey,
    since: DateTime<Utc>,
) -> Result<Vec<Bar>, StoreError> {
    let dir = root.join(key.timeframe.to_string());
    let first_month = MonthKey::of(since);

    let mut months: Vec<(MonthKey, PathBuf)> = Vec::new();
    for entry in list_dir(&dir)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((symbol, month)) = parse_partition_name(name) else {
            continue;
        };
        if symbol == key.symbol && month >= first_month {
            months.push((month, entry.path()));
        }
    }
    months.sort_by_key(|(m, _)| *m);

    let mut by_ts: BTreeMap<DateTime<Utc>, Bar> = BTreeMap::new();
    for (_, path) in months {
        for bar in read_partition(&path)? {
            if bar.timestamp >= since {
                by_ts.insert(bar.timestamp, bar);
            }
        }
    }
    Ok(by_ts.into_values().collect())
}

fn info_blocking(root: &Path) -> Result<StorageInfo, StoreError> {
    let mut per_series: BTreeMap<(Timeframe, String), (usize, u64)> = BTreeMap::new();
    for tf_entry in list_dir(root)? {
        let tf_name = tf_entry.file_name();
        let Some(timeframe) = tf_name.to_str().and_then(|s| s.parse::<Timeframe>().ok()) else {
            continue;
        };
        for entry in list_dir(&tf_entry.path())? {
            let name = entry.file_name();
            let Some((symbol, _)) = name.to_str().and_then(parse_partition_name) else {
                continue;
            };
            let bytes = entry
                .metadata()
                .context(IoSnafu {
                    path: entry.path().display().to_string(),
                })?
                .len();
            let slot = per_series
                .entry((timeframe, symbol))
                .or_insert((0, 0));
            slot.0 += 1;
            slot.1 += bytes;
        }
    }

    let series: Vec<StoredSeries> = per_series
        .into_iter()
        .map(|((timeframe, symbol), (partitions, bytes))| StoredSeries {
            symbol,
            timeframe,
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

#[async_trait]
impl BarStore for FileBarStore {
    async fn write(&self, key: &SeriesKey, bars: &[Bar]) -> Result<WriteReport, StoreError> {
        if bars.is_empty() {
            return Ok(WriteReport::default());
        }
        let root = self.root.clone();
        let key = key.clone();
        let bars = bars.to_vec();
        tokio::task::spawn_blocking(move || upsert_blocking(&root, &key, &bars))
            .await
            .context(TaskJoinSnafu)?
    }

    async fn read(&self, key: &SeriesKey, since: DateTime<Utc>) -> Result<Vec<Bar>, StoreError> {
        let root = self.root.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || read_blocking(&root, &key, since))
            .await
            .context(TaskJoinSnafu)?
    }

    async fn storage_info(&self) -> Result<StorageInfo, StoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || info_blocking(&root))
            .await
            .context(TaskJoinSnafu)?
    }
}
