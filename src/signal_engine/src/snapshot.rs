//! What a query returns.

use market_data::models::timeframe::Timeframe;
use serde::Serialize;
use thiserror::Error;

use crate::crossing::CrossingFlags;
use crate::indicators::IndicatorReading;

/// Indicator values and crossing flags of one symbol at one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Closed bars the indicators were computed over.
    pub bars: usize,
    pub current: IndicatorReading,
    pub previous: IndicatorReading,
    pub crossings: CrossingFlags,
}

impl SignalSnapshot {
    pub fn price(&self) -> f64 {
        self.current.close
    }

    pub fn rsi(&self) -> f64 {
        self.current.rsi
    }
}

/// Why a query produced no snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotReady {
    #[error("insufficient bars: {have} closed {timeframe} bars, need {need}")]
    InsufficientBars {
        timeframe: Timeframe,
        have: usize,
        need: usize,
    },

    #[error("unknown symbol {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("unsupported timeframe {timeframe}")]
    UnsupportedTimeframe { timeframe: Timeframe },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignalResult {
    Ready(SignalSnapshot),
    NotReady(NotReady),
}

impl SignalResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, SignalResult::Ready(_))
    }

    pub fn ready(&self) -> Option<&SignalSnapshot> {
        match self {
            SignalResult::Ready(snapshot) => Some(snapshot),
            SignalResult::NotReady(_) => None,
        }
    }

    pub fn not_ready(&self) -> Option<&NotReady> {
        match self {
            SignalResult::Ready(_) => None,
            SignalResult::NotReady(reason) => Some(reason),
        }
    }
}

impl From<NotReady> for SignalResult {
    fn from(reason: NotReady) -> Self {
        SignalResult::NotReady(reason)
    }
}
