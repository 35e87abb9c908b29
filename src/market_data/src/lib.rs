//! Vendor-agnostic market data building blocks.
//!
//! - [`models`]: the canonical [`Bar`](models::bar::Bar), series identity and timeframes.
//! - [`bucket`]: epoch-anchored window math and month partitions.
//! - [`providers`]: the push-based bar source seam.
//! - [`io`]: the durable bar store seam and its implementations.

pub mod bucket;
pub mod io;
pub mod models;
pub mod providers;
