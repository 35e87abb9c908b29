//! Provider abstraction for pushed market data.
//!
//! This module defines the [`BarSource`] trait, the boundary through which any
//! live or recorded feed hands `(symbol, timeframe, bar)` events to the engine.
//! Sources push into a bounded `tokio::sync::mpsc` channel, so a slow consumer
//! applies back-pressure instead of growing an unbounded queue.
//!
//! Sources make no ordering promises across symbols and may repeat a bar (for
//! example an updated still-open bar); consumers must tolerate both.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use market_data::providers::{BarEvent, BarSource, ProviderError};
//! use tokio::sync::mpsc;
//!
//! struct Silent;
//!
//! #[async_trait]
//! impl BarSource for Silent {
//!     async fn run(&mut self, _sink: mpsc::Sender<BarEvent>) -> Result<usize, ProviderError> {
//!         Ok(0)
//!     }
//! }
//! ```

pub mod replay;

use async_trait::async_trait;
use snafu::{Backtrace, Snafu};
use tokio::sync::mpsc;

use crate::models::{bar::Bar, timeframe::Timeframe};

pub use replay::ReplaySource;

/// One pushed bar, tagged with the series it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct BarEvent {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar: Bar,
}

/// Trait for pushing bars from a market data feed into the engine.
#[async_trait]
pub trait BarSource: Send {
    /// Pushes events into `sink` until the feed ends.
    ///
    /// # Returns
    ///
    /// * `Ok(n)` - The feed finished after sending `n` events.
    /// * `Err(ProviderError)` - The feed failed or the receiving side went away.
    async fn run(&mut self, sink: mpsc::Sender<BarEvent>) -> Result<usize, ProviderError>;
}

/// Errors that can occur within a `BarSource` implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderError {
    /// The consumer dropped its receiver while the feed was still producing.
    #[snafu(display("Bar sink closed after {sent} events"))]
    SinkClosed { sent: usize, backtrace: Backtrace },

    /// Recorded input could not be read.
    #[snafu(display("Failed to read replay input {path}: {source}"))]
    ReadInput {
        path: String,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// Recorded input was not a JSON array of bar series.
    #[snafu(display("Malformed replay input {path}: {source}"))]
    ParseInput {
        path: String,
        source: serde_json::Error,
        backtrace: Backtrace,
    },
}
