//! Replays recorded bar series as if they were arriving live.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use snafu::ResultExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::bar_series::BarSeries;
use crate::providers::{
    BarEvent, BarSource, ParseInputSnafu, ProviderError, ReadInputSnafu, SinkClosedSnafu,
};

/// A [`BarSource`] backed by in-memory series.
///
/// Events from all series are interleaved by bar timestamp (stable, so bars
/// sharing a timestamp keep their input order), approximating a live feed
/// that multiplexes many symbols.
#[derive(Debug, Default)]
pub struct ReplaySource {
    events: Vec<BarEvent>,
}

impl ReplaySource {
    pub fn new(series: Vec<BarSeries>) -> Self {
        let mut events: Vec<BarEvent> = series
            .into_iter()
            .flat_map(|s| {
                let BarSeries {
                    symbol,
                    timeframe,
                    bars,
                } = s;
                bars.into_iter().map(move |bar| BarEvent {
                    symbol: symbol.clone(),
                    timeframe,
                    bar,
                })
            })
            .collect();
        events.sort_by_key(|e| e.bar.timestamp);
        Self { events }
    }

    /// Loads a JSON array of [`BarSeries`] from disk.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).context(ReadInputSnafu {
            path: display.clone(),
        })?;
        let series: Vec<BarSeries> =
            serde_json::from_str(&text).context(ParseInputSnafu { path: display })?;
        Ok(Self::new(series))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct symbols still queued, in order of first appearance.
    pub fn symbols(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.events
            .iter()
            .filter(|e| seen.insert(e.symbol.as_str()))
            .map(|e| e.symbol.clone())
            .collect()
    }
}

#[async_trait]
impl BarSource for ReplaySource {
    async fn run(&mut self, sink: mpsc::Sender<BarEvent>) -> Result<usize, ProviderError> {
        let mut sent = 0usize;
        for event in std::mem::take(&mut self.events) {
            if sink.send(event).await.is_err() {
                return SinkClosedSnafu { sent }.fail();
            }
            sent += 1;
        }
        debug!(sent, "replay finished");
        Ok(sent)
    }
}
