//! Streaming indicator-and-signal engine.
//!
//! Bars flow from a [`BarSource`](market_data::providers::BarSource) into the
//! [`SymbolRegistry`](registry::SymbolRegistry), one bounded
//! [`BarBuffer`](buffer::BarBuffer) per symbol. Queries aggregate a copy of the
//! buffer into the requested timeframe, compute indicators over the closed bars
//! and compare the last two readings for crossing signals. A
//! [`PersistenceScheduler`](persistence::PersistenceScheduler) periodically
//! writes buffer tails to a [`BarStore`](market_data::io::BarStore) and reloads
//! them on cold start.

pub mod aggregate;
pub mod buffer;
pub mod config;
pub mod crossing;
pub mod engine;
pub mod indicators;
pub mod persistence;
pub mod registry;
pub mod snapshot;
pub mod watchlist;

pub use config::EngineConfig;
pub use engine::SignalEngine;
pub use snapshot::{NotReady, SignalResult, SignalSnapshot};
