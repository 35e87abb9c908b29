use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use market_data::io::{BarStore, FileBarStore, MemoryBarStore};
use market_data::models::timeframe::Timeframe;
use market_data::providers::{BarSource, ReplaySource};
use serde_json::json;
use signal_engine::SignalEngine;
use signal_engine::config::load_config;
use signal_engine::watchlist::load_watchlist;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Streaming indicator and signal engine")]
struct Cli {
    /// Engine config TOML; defaults apply when omitted.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Replay recorded bars through the engine and print the resulting signals.
    Replay {
        /// JSON array of bar series.
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Timeframe to report; the base timeframe when omitted.
        #[arg(long)]
        timeframe: Option<Timeframe>,
        /// Only report these symbols (one per line).
        #[arg(long, value_name = "FILE")]
        watchlist: Option<PathBuf>,
        /// Backfill from and flush to the file store under `data_dir`.
        #[arg(long)]
        persist: bool,
    },
    /// Print what the file store under `data_dir` holds.
    StorageInfo,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.cmd {
        Cmd::Replay {
            input,
            timeframe,
            watchlist,
            persist,
        } => {
            let mut source = ReplaySource::from_json_path(&input)?;
            let symbols = match watchlist {
                Some(path) => load_watchlist(path)?,
                None => source.symbols(),
            };
            let timeframe = timeframe.unwrap_or(config.base_timeframe);

            let store: Arc<dyn BarStore> = if persist {
                Arc::new(FileBarStore::new(config.persistence.data_dir.clone()))
            } else {
                Arc::new(MemoryBarStore::new())
            };
            let engine = SignalEngine::new(config, store);
            if persist {
                let report = engine.restore(&symbols).await;
                tracing::info!(restored = report.loaded.len(), failed = report.failed.len(), "restore finished");
            }

            let (tx, rx) = mpsc::channel(1024);
            let feed = tokio::spawn(async move { source.run(tx).await });
            let ingested = engine.run_ingest(rx).await;
            feed.await.context("replay task panicked")??;

            let flushed = if persist {
                Some(engine.persistence().flush_once().await)
            } else {
                None
            };

            let out = json!({
                "ingested": ingested,
                "flushed": flushed,
                "timeframe": timeframe,
                "signals": engine.get_watchlist_snapshot_at(&symbols, timeframe),
                "summary": engine.watchlist_summary(&symbols),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Cmd::StorageInfo => {
            let engine = SignalEngine::with_file_store(config);
            let info = engine.storage_info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}
