//! Crossing detection between two consecutive indicator readings.

use serde::{Deserialize, Serialize};

use crate::indicators::{IndicatorPoint, IndicatorReading};

/// Levels used by the threshold-based flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SignalThresholds {
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    /// Band width relative to the middle band below which the bands count as squeezed.
    pub bb_squeeze_width: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            bb_squeeze_width: 0.04,
        }
    }
}

/// Boolean signals derived from the previous and current readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrossingFlags {
    pub macd_cross_up: bool,
    pub macd_cross_dn: bool,
    pub ema_support_lost: bool,
    pub ema_reclaim: bool,
    pub rsi_overbought: bool,
    pub rsi_oversold: bool,
    pub bb_breakout_up: bool,
    pub bb_breakout_dn: bool,
    pub bb_squeeze: bool,
}

impl CrossingFlags {
    pub fn detect(
        prev: &IndicatorReading,
        cur: &IndicatorReading,
        thresholds: &SignalThresholds,
    ) -> Self {
        let (pm, cm) = (prev.macd, cur.macd);
        let cb = cur.bollinger;
        Self {
            macd_cross_up: pm.macd <= pm.signal && cm.macd > cm.signal,
            macd_cross_dn: pm.macd >= pm.signal && cm.macd < cm.signal,
            ema_support_lost: prev.close >= prev.ema && cur.close < cur.ema,
            ema_reclaim: prev.close <= prev.ema && cur.close > cur.ema,
            rsi_overbought: cur.rsi >= thresholds.rsi_overbought,
            rsi_oversold: cur.rsi <= thresholds.rsi_oversold,
            bb_breakout_up: cur.close > cb.upper,
            bb_breakout_dn: cur.close < cb.lower,
            bb_squeeze: (cb.upper - cb.lower) / cb.middle < thresholds.bb_squeeze_width,
        }
    }

    /// Every flag with its wire name, in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> {
        [
            ("macd_cross_up", self.macd_cross_up),
            ("macd_cross_dn", self.macd_cross_dn),
            ("ema_support_lost", self.ema_support_lost),
            ("ema_reclaim", self.ema_reclaim),
            ("rsi_overbought", self.rsi_overbought),
            ("rsi_oversold", self.rsi_oversold),
            ("bb_breakout_up", self.bb_breakout_up),
            ("bb_breakout_dn", self.bb_breakout_dn),
            ("bb_squeeze", self.bb_squeeze),
        ]
        .into_iter()
    }

    /// Names of the flags that are set.
    pub fn active(&self) -> Vec<&'static str> {
        self.iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect()
    }

    pub fn any(&self) -> bool {
        self.iter().any(|(_, set)| set)
    }
}

/// The last two ready readings and the flags between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub previous: IndicatorReading,
    pub current: IndicatorReading,
    pub flags: CrossingFlags,
}

/// Fewer than two fully-defined positions exist at the end of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("need two ready indicator positions, have {ready}")]
pub struct NotEnoughReadings {
    pub ready: usize,
}

/// Compares the two most recent positions of `points`.
pub fn detect_latest(
    points: &[IndicatorPoint],
    thresholds: &SignalThresholds,
) -> Result<Crossing, NotEnoughReadings> {
    let tail = match points {
        [.., prev, cur] => (prev.ready(), cur.ready()),
        _ => (None, points.last().and_then(IndicatorPoint::ready)),
    };
    match tail {
        (Some(previous), Some(current)) => Ok(Crossing {
            previous,
            current,
            flags: CrossingFlags::detect(&previous, &current, thresholds),
        }),
        (_, cur) => Err(NotEnoughReadings {
            ready: usize::from(cur.is_some()),
        }),
    }
}
