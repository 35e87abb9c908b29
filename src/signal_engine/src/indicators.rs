//! Indicator math over a closed-bar sequence.
//!
//! Every function here is pure: the output depends only on the slice passed in,
//! and positions whose lookback is not yet satisfied are `None` rather than a
//! partially-warmed value. Output vectors are aligned one-to-one with the input.

use chrono::{DateTime, Utc};
use market_data::models::bar::Bar;
use serde::{Deserialize, Serialize};

/// Periods of the indicator set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IndicatorParams {
    pub ema_period: usize,
    pub sma_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub rsi_period: usize,
    pub bb_period: usize,
    pub bb_std_dev: f64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ema_period: 9,
            sma_period: 10,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            rsi_period: 14,
            bb_period: 20,
            bb_std_dev: 2.0,
        }
    }
}

impl IndicatorParams {
    /// Index of the first position at which every indicator is defined.
    fn first_ready_index(&self) -> usize {
        let macd = self.macd_fast.max(self.macd_slow) + self.macd_signal;
        [
            self.ema_period,
            self.sma_period,
            macd.saturating_sub(1),
            self.rsi_period + 1,
            self.bb_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
        .saturating_sub(1)
    }

    /// Closed bars needed before one position has every indicator defined.
    pub fn min_bars(&self) -> usize {
        self.first_ready_index() + 1
    }

    /// Closed bars needed for two consecutive fully-defined positions,
    /// which is what crossing detection compares.
    pub fn required_bars(&self) -> usize {
        self.min_bars() + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Indicator values at one position; `None` until that indicator's lookback is met.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub ema: Option<f64>,
    pub sma: Option<f64>,
    pub macd: Option<MacdValue>,
    pub rsi: Option<f64>,
    pub bollinger: Option<Bands>,
}

/// A position where every indicator is defined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorReading {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub ema: f64,
    pub sma: f64,
    pub macd: MacdValue,
    pub rsi: f64,
    pub bollinger: Bands,
}

impl IndicatorPoint {
    pub fn ready(&self) -> Option<IndicatorReading> {
        Some(IndicatorReading {
            timestamp: self.timestamp,
            close: self.close,
            ema: self.ema?,
            sma: self.sma?,
            macd: self.macd?,
            rsi: self.rsi?,
            bollinger: self.bollinger?,
        })
    }
}

/// Computes the full indicator set for `bars`.
pub fn compute(bars: &[Bar], params: &IndicatorParams) -> Vec<IndicatorPoint> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ema = ema(&closes, params.ema_period);
    let sma = sma(&closes, params.sma_period);
    let macd = macd(
        &closes,
        params.macd_fast,
        params.macd_slow,
        params.macd_signal,
    );
    let rsi = rsi(&closes, params.rsi_period);
    let bollinger = bollinger(&closes, params.bb_period, params.bb_std_dev);

    bars.iter()
        .enumerate()
        .map(|(i, bar)| IndicatorPoint {
            timestamp: bar.timestamp,
            close: bar.close,
            ema: ema[i],
            sma: sma[i],
            macd: macd[i],
            rsi: rsi[i],
            bollinger: bollinger[i],
        })
        .collect()
}

/// Simple moving average.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    for (i, window) in values.windows(period).enumerate() {
        out[i + period - 1] = Some(window.iter().sum::<f64>() / period as f64);
    }
    out
}

/// Exponential moving average, α = 2/(n+1), seeded with the SMA of the first `n` values.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);
    for (i, &v) in values.iter().enumerate().skip(period) {
        prev += alpha * (v - prev);
        out[i] = Some(prev);
    }
    out
}

/// EMA over a series that becomes defined part-way through (e.g. the MACD line).
///
/// The seed window starts at the first defined value; the defined tail must be contiguous.
fn ema_of_defined(series: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; series.len()];
    let Some(start) = series.iter().position(Option::is_some) else {
        return out;
    };
    let tail: Vec<f64> = series[start..].iter().map_while(|v| *v).collect();
    for (offset, v) in ema(&tail, period).into_iter().enumerate() {
        out[start + offset] = v;
    }
    out
}

/// MACD line (fast EMA − slow EMA), its signal EMA and the histogram.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<Option<MacdValue>> {
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal_line = ema_of_defined(&line, signal);
    line.iter()
        .zip(&signal_line)
        .map(|(m, s)| {
            let (macd, signal) = ((*m)?, (*s)?);
            Some(MacdValue {
                macd,
                signal,
                histogram: macd - signal,
            })
        })
        .collect()
}

fn rsi_from(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

/// Relative strength index with Wilder smoothing.
///
/// The first value (at index `period`) averages the first `period` gains and
/// losses; later values use `avg = (prev * (n - 1) + x) / n`.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }
    let n = period as f64;
    let (mut avg_gain, mut avg_loss) = (0.0, 0.0);
    for w in values[..=period].windows(2) {
        let change = w[1] - w[0];
        avg_gain += change.max(0.0);
        avg_loss += (-change).max(0.0);
    }
    avg_gain /= n;
    avg_loss /= n;
    out[period] = Some(rsi_from(avg_gain, avg_loss));

    for i in (period + 1)..values.len() {
        let change = values[i] - values[i - 1];
        avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
        out[i] = Some(rsi_from(avg_gain, avg_loss));
    }
    out
}

/// Bollinger bands: SMA ± `k` population standard deviations.
pub fn bollinger(values: &[f64], period: usize, k: f64) -> Vec<Option<Bands>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    for (i, window) in values.windows(period).enumerate() {
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        let width = k * var.sqrt();
        out[i + period - 1] = Some(Bands {
            upper: mean + width,
            middle: mean,
            lower: mean - width,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn bars_from(closes: &[f64]) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 6, 14, 30, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::flat(t0 + Duration::minutes(i as i64), c, 1.0))
            .collect()
    }

    #[test]
    fn default_readiness_matches_macd_signal_warmup() {
        let p = IndicatorParams::default();
        // MACD signal is first defined at index 26 - 1 + 9 - 1 = 33.
        assert_eq!(p.min_bars(), 34);
        assert_eq!(p.required_bars(), 35);
    }

    #[test]
    fn sma_and_ema_warmup() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let s = sma(&v, 3);
        assert_eq!(s[..2], [None, None]);
        assert!(approx(s[2].unwrap(), 2.0));
        assert!(approx(s[4].unwrap(), 4.0));

        let e = ema(&v, 3);
        assert_eq!(e[1], None);
        assert!(approx(e[2].unwrap(), 2.0));
        // α = 0.5: 2 + 0.5 * (4 - 2) = 3
        assert!(approx(e[3].unwrap(), 3.0));
        assert!(approx(e[4].unwrap(), 4.0));
    }

    #[test]
    fn short_input_is_never_ready() {
        let v = [1.0, 2.0];
        assert!(sma(&v, 3).iter().all(Option::is_none));
        assert!(ema(&v, 3).iter().all(Option::is_none));
        assert!(rsi(&v, 2).iter().all(Option::is_none));
        assert!(bollinger(&v, 3, 2.0).iter().all(Option::is_none));
        assert!(macd(&v, 12, 26, 9).iter().all(Option::is_none));
    }

    #[test]
    fn rsi_is_100_on_strictly_rising_closes() {
        let v: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let r = rsi(&v, 14);
        assert_eq!(r[13], None);
        assert_eq!(r[19], Some(100.0));
    }

    #[test]
    fn rsi_is_0_on_strictly_falling_closes() {
        let v: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_eq!(rsi(&v, 14)[19], Some(0.0));
    }

    #[test]
    fn rsi_matches_hand_computed_wilder_step() {
        // gains: 1, 0 ; losses: 0, 1  -> avg 0.5 / 0.5 -> 50
        let v = [10.0, 11.0, 10.0, 12.0];
        let r = rsi(&v, 2);
        assert!(approx(r[2].unwrap(), 50.0));
        // next: gain 2 -> avg_gain = (0.5 + 2) / 2 = 1.25, avg_loss = 0.25 -> rs 5
        assert!(approx(r[3].unwrap(), 100.0 - 100.0 / 6.0));
    }

    #[test]
    fn bollinger_on_constant_series_collapses() {
        let v = [5.0; 25];
        let b = bollinger(&v, 20, 2.0);
        let last = b[24].unwrap();
        assert!(approx(last.upper, 5.0) && approx(last.lower, 5.0) && approx(last.middle, 5.0));
    }

    #[test]
    fn bollinger_uses_population_std() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let b = bollinger(&v, 8, 1.0)[7].unwrap();
        assert!(approx(b.middle, 5.0));
        assert!(approx(b.upper, 7.0));
        assert!(approx(b.lower, 3.0));
    }

    #[test]
    fn macd_of_linear_trend_is_constant_lag_difference() {
        // SMA-seeded EMAs of a linear series sit exactly (n - 1) / 2 steps behind.
        let v: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let m = macd(&v, 12, 26, 9);
        assert_eq!(m[32], None);
        let last = m[59].unwrap();
        assert!(approx(last.macd, 7.0), "{last:?}");
        assert!(approx(last.signal, 7.0), "{last:?}");
    }

    #[test]
    fn compute_aligns_and_becomes_ready_at_min_bars() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let params = IndicatorParams::default();
        let points = compute(&bars_from(&closes), &params);
        assert_eq!(points.len(), 40);
        assert!(points[params.min_bars() - 2].ready().is_none());
        assert!(points[params.min_bars() - 1].ready().is_some());
        for p in points.iter().filter_map(IndicatorPoint::ready) {
            assert!((0.0..=100.0).contains(&p.rsi));
            assert!(approx(p.macd.histogram, p.macd.macd - p.macd.signal));
            assert!(p.bollinger.lower <= p.bollinger.middle && p.bollinger.middle <= p.bollinger.upper);
        }
    }

    #[test]
    fn compute_is_reproducible() {
        let closes: Vec<f64> = (0..50).map(|i| 50.0 + (i % 7) as f64).collect();
        let bars = bars_from(&closes);
        let params = IndicatorParams::default();
        assert_eq!(compute(&bars, &params), compute(&bars, &params));
    }
}
