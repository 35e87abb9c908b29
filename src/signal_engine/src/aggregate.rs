//! Rolling base-timeframe bars up into wider, epoch-anchored windows.

use market_data::bucket::{window_id, window_start_of};
use market_data::models::{bar::Bar, timeframe::Timeframe};

/// Running OHLCV for one window.
#[derive(Debug, Clone, Copy)]
struct Candle {
    window: i64,
    count: u32,
    aligned: bool,
    bar: Bar,
}

impl Candle {
    fn open(window: i64, width: i64, bar: Bar) -> Self {
        Self {
            window,
            count: 1,
            aligned: bar.timestamp == window_start_of(window, width),
            bar: Bar {
                timestamp: window_start_of(window, width),
                ..bar
            },
        }
    }

    fn merge(&mut self, bar: Bar, expected: chrono::DateTime<chrono::Utc>) {
        self.aligned &= bar.timestamp == expected;
        self.count += 1;
        self.bar.high = self.bar.high.max(bar.high);
        self.bar.low = self.bar.low.min(bar.low);
        self.bar.close = bar.close;
        self.bar.volume += bar.volume;
    }
}

/// Aggregates `base` bars (timeframe `base_tf`, ascending by timestamp) into
/// bars `multiple` times as wide.
///
/// Window `k` covers `[k * width, (k + 1) * width)` seconds since the Unix
/// epoch. A window is emitted only when every one of its `multiple` base slots
/// is present, so a trailing partial window and windows with gaps are left
/// out. Output bars are stamped with the window start.
///
/// With `multiple <= 1` the input is returned unchanged.
pub fn aggregate(base: &[Bar], base_tf: Timeframe, multiple: u32) -> Vec<Bar> {
    if multiple <= 1 {
        return base.to_vec();
    }
    let step = base_tf.seconds();
    let width = step * i64::from(multiple);

    let mut out = Vec::with_capacity(base.len() / multiple as usize + 1);
    let mut current: Option<Candle> = None;
    let mut finish = |c: Candle| {
        if c.aligned && c.count == multiple {
            out.push(c.bar);
        }
    };

    for bar in base {
        let window = window_id(bar.timestamp, width);
        match current.as_mut() {
            Some(c) if c.window == window => {
                let expected = c.bar.timestamp + chrono::Duration::seconds(step * i64::from(c.count));
                c.merge(*bar, expected);
            }
            _ => {
                if let Some(done) = current.take() {
                    finish(done);
                }
                current = Some(Candle::open(window, width, *bar));
            }
        }
    }
    if let Some(done) = current {
        finish(done);
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    use super::*;

    fn one_minute() -> Timeframe {
        Timeframe::minutes(1).unwrap()
    }

    fn at(minute: i64) -> DateTime<Utc> {
        // 14:30 is on a 5-, 15- and 30-minute boundary.
        Utc.with_ymd_and_hms(2025, 1, 6, 14, 30, 0).unwrap() + Duration::minutes(minute)
    }

    fn ohlc(minute: i64, o: f64, h: f64, l: f64, c: f64, v: f64) -> Bar {
        Bar::new(at(minute), o, h, l, c, v)
    }

    #[test]
    fn five_minute_window_from_one_minute_bars() {
        let base = vec![
            ohlc(0, 10.0, 11.0, 9.5, 10.5, 1.0),
            ohlc(1, 10.5, 12.0, 10.0, 11.0, 2.0),
            ohlc(2, 11.0, 11.5, 8.0, 9.0, 3.0),
            ohlc(3, 9.0, 10.0, 8.5, 9.5, 4.0),
            ohlc(4, 9.5, 10.0, 9.0, 9.8, 5.0),
            // Partial trailing window.
            ohlc(5, 9.8, 9.9, 9.7, 9.9, 1.0),
        ];
        let out = aggregate(&base, one_minute(), 5);
        assert_eq!(out, vec![Bar::new(at(0), 10.0, 12.0, 8.0, 9.8, 15.0)]);
    }

    #[test]
    fn windows_with_gaps_are_excluded() {
        let mut base: Vec<Bar> = (0..10).map(|i| Bar::flat(at(i), i as f64, 1.0)).collect();
        base.remove(7);
        let out = aggregate(&base, one_minute(), 5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, at(0));
    }

    #[test]
    fn windows_anchor_to_epoch_not_first_bar() {
        // Starting at 14:32 means the 14:30 window is incomplete.
        let base: Vec<Bar> = (2..12).map(|i| Bar::flat(at(i), i as f64, 1.0)).collect();
        let out = aggregate(&base, one_minute(), 5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, at(5));
        assert_eq!(out[0].open, 5.0);
        assert_eq!(out[0].close, 9.0);
    }

    #[test]
    fn misaligned_base_bars_do_not_complete_a_window() {
        let base: Vec<Bar> = (0..5)
            .map(|i| Bar::flat(at(i) + Duration::seconds(30), 1.0, 1.0))
            .collect();
        assert!(aggregate(&base, one_minute(), 5).is_empty());
    }

    #[test]
    fn multiple_of_one_is_identity() {
        let base: Vec<Bar> = (0..3).map(|i| Bar::flat(at(i), 1.0, 1.0)).collect();
        assert_eq!(aggregate(&base, one_minute(), 1), base);
    }

    proptest! {
        #[test]
        fn prop_only_complete_windows_and_volume_is_conserved(
            present in proptest::collection::vec(any::<bool>(), 0..90),
            multiple in 2u32..16,
        ) {
            let base: Vec<Bar> = present
                .iter()
                .enumerate()
                .filter(|(_, keep)| **keep)
                .map(|(i, _)| Bar::flat(at(i as i64), i as f64, 1.0))
                .collect();
            let out = aggregate(&base, one_minute(), multiple);
            let width = 60 * i64::from(multiple);

            for w in &out {
                prop_assert_eq!(w.timestamp.timestamp().rem_euclid(width), 0);
                prop_assert_eq!(w.volume, f64::from(multiple));
                prop_assert!(w.low <= w.open && w.open <= w.high);
                prop_assert!(w.low <= w.close && w.close <= w.high);
            }
            prop_assert!(out.windows(2).all(|p| p[0].timestamp < p[1].timestamp));
            // Deterministic for the same input.
            prop_assert_eq!(aggregate(&base, one_minute(), multiple), out);
        }
    }
}
