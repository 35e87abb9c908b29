//! Bounded, time-ordered bar history for one series.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use market_data::models::bar::Bar;
use serde::Serialize;

/// Readiness of a buffer. Once `Ready` it stays there until [`BarBuffer::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferState {
    Empty,
    Filling,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The bar was added after the newest one; `evicted` old bars fell off the front.
    Appended { evicted: usize },
    /// The bar carried the newest timestamp and replaced that bar (intra-bar update).
    Replaced,
    /// The bar was older than the newest one and was dropped.
    OutOfOrder { last: DateTime<Utc> },
}

/// FIFO of bars with strictly increasing timestamps and at most `capacity` entries.
///
/// `revision` increases on every mutation so readers can tell whether
/// anything changed since they last looked.
#[derive(Debug, Clone)]
pub struct BarBuffer {
    bars: VecDeque<Bar>,
    capacity: usize,
    ready_at: usize,
    state: BufferState,
    revision: u64,
}

impl BarBuffer {
    /// `ready_at` is the bar count at which the buffer first reports [`BufferState::Ready`].
    pub fn new(capacity: usize, ready_at: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bars: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            ready_at,
            state: BufferState::Empty,
            revision: 0,
        }
    }

    pub fn append(&mut self, bar: Bar) -> AppendOutcome {
        let last = self.bars.back().map(|b| b.timestamp);
        match last {
            Some(last) if bar.timestamp < last => return AppendOutcome::OutOfOrder { last },
            Some(last) if bar.timestamp == last => {
                if let Some(slot) = self.bars.back_mut() {
                    *slot = bar;
                }
                self.revision += 1;
                return AppendOutcome::Replaced;
            }
            _ => {}
        }

        self.bars.push_back(bar);
        let evicted = self.evict_overflow();
        self.refresh_state();
        self.revision += 1;
        AppendOutcome::Appended { evicted }
    }

    /// Merges older history (e.g. from durable storage) under the live bars.
    ///
    /// On a timestamp collision the live bar wins. The result is trimmed to
    /// capacity from the front. Returns how many bars were added.
    pub fn merge_history(&mut self, history: impl IntoIterator<Item = Bar>) -> usize {
        let before = self.bars.len();
        let mut merged: BTreeMap<DateTime<Utc>, Bar> =
            history.into_iter().map(|b| (b.timestamp, b)).collect();
        let incoming = merged.len();
        if incoming == 0 {
            return 0;
        }
        for bar in self.bars.drain(..) {
            merged.insert(bar.timestamp, bar);
        }
        self.bars = merged.into_values().collect();
        self.evict_overflow();
        self.refresh_state();
        self.revision += 1;
        self.bars.len().saturating_sub(before)
    }

    /// The most recent `n` bars, oldest first. Fewer if the buffer holds fewer.
    pub fn snapshot(&self, n: usize) -> Vec<Bar> {
        let skip = self.bars.len().saturating_sub(n);
        self.bars.iter().skip(skip).copied().collect()
    }

    /// Number of buffered bars strictly newer than `ts`.
    pub fn count_after(&self, ts: DateTime<Utc>) -> usize {
        self.bars.len() - self.bars.partition_point(|b| b.timestamp <= ts)
    }

    pub fn to_vec(&self) -> Vec<Bar> {
        self.bars.iter().copied().collect()
    }

    pub fn reset(&mut self) {
        self.bars.clear();
        self.state = BufferState::Empty;
        self.revision += 1;
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn evict_overflow(&mut self) -> usize {
        let overflow = self.bars.len().saturating_sub(self.capacity);
        self.bars.drain(..overflow);
        overflow
    }

    fn refresh_state(&mut self) {
        if self.state == BufferState::Ready {
            return;
        }
        self.state = match self.bars.len() {
            0 => BufferState::Empty,
            n if n >= self.ready_at => BufferState::Ready,
            _ => BufferState::Filling,
        };
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    use super::*;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 14, 30, 0).unwrap() + Duration::minutes(minute)
    }

    fn bar(minute: i64, close: f64) -> Bar {
        Bar::flat(at(minute), close, 1.0)
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut buf = BarBuffer::new(3, 2);
        for i in 0..3 {
            assert_eq!(buf.append(bar(i, i as f64)), AppendOutcome::Appended { evicted: 0 });
        }
        assert_eq!(buf.append(bar(3, 3.0)), AppendOutcome::Appended { evicted: 1 });
        let closes: Vec<f64> = buf.to_vec().iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn same_timestamp_replaces_and_older_is_dropped() {
        let mut buf = BarBuffer::new(10, 5);
        buf.append(bar(0, 1.0));
        buf.append(bar(1, 2.0));
        assert_eq!(buf.append(bar(1, 2.5)), AppendOutcome::Replaced);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.last().unwrap().close, 2.5);

        assert_eq!(
            buf.append(bar(0, 9.0)),
            AppendOutcome::OutOfOrder { last: at(1) }
        );
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.to_vec()[0].close, 1.0);
    }

    #[test]
    fn state_is_sticky_until_reset() {
        let mut buf = BarBuffer::new(3, 3);
        assert_eq!(buf.state(), BufferState::Empty);
        buf.append(bar(0, 1.0));
        assert_eq!(buf.state(), BufferState::Filling);
        buf.append(bar(1, 1.0));
        buf.append(bar(2, 1.0));
        assert_eq!(buf.state(), BufferState::Ready);
        buf.append(bar(3, 1.0));
        assert_eq!(buf.state(), BufferState::Ready);

        let rev = buf.revision();
        buf.reset();
        assert_eq!(buf.state(), BufferState::Empty);
        assert!(buf.is_empty());
        assert!(buf.revision() > rev);
    }

    #[test]
    fn snapshot_returns_newest_tail() {
        let mut buf = BarBuffer::new(10, 1);
        for i in 0..5 {
            buf.append(bar(i, i as f64));
        }
        let tail: Vec<f64> = buf.snapshot(2).iter().map(|b| b.close).collect();
        assert_eq!(tail, vec![3.0, 4.0]);
        assert_eq!(buf.snapshot(50).len(), 5);
        assert!(buf.snapshot(0).is_empty());
    }

    #[test]
    fn merge_history_keeps_live_bars_on_collision() {
        let mut buf = BarBuffer::new(4, 4);
        buf.append(bar(2, 200.0));
        buf.append(bar(3, 300.0));

        let added = buf.merge_history(vec![bar(0, 0.0), bar(1, 1.0), bar(2, -1.0)]);
        assert_eq!(added, 2);
        let closes: Vec<f64> = buf.to_vec().iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![0.0, 1.0, 200.0, 300.0]);
        assert_eq!(buf.state(), BufferState::Ready);

        // Over capacity: the oldest history is trimmed.
        buf.merge_history(vec![bar(-1, -1.0)]);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.to_vec()[0].close, 0.0);
    }

    #[test]
    fn merge_of_nothing_is_a_no_op() {
        let mut buf = BarBuffer::new(4, 4);
        buf.append(bar(0, 1.0));
        let rev = buf.revision();
        assert_eq!(buf.merge_history(Vec::new()), 0);
        assert_eq!(buf.revision(), rev);
    }

    proptest! {
        #[test]
        fn prop_ordered_bounded_and_unique(
            capacity in 1usize..20,
            offsets in proptest::collection::vec(-5i64..40, 0..80),
        ) {
            let mut buf = BarBuffer::new(capacity, capacity);
            for (i, off) in offsets.iter().enumerate() {
                buf.append(bar(*off, i as f64));
            }
            let bars = buf.to_vec();
            prop_assert!(bars.len() <= capacity);
            prop_assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }

        #[test]
        fn prop_snapshot_is_suffix(
            count in 0i64..30,
            n in 0usize..40,
        ) {
            let mut buf = BarBuffer::new(16, 1);
            for i in 0..count {
                buf.append(bar(i, i as f64));
            }
            let all = buf.to_vec();
            let snap = buf.snapshot(n);
            prop_assert_eq!(snap.len(), n.min(all.len()));
            prop_assert_eq!(&all[all.len() - snap.len()..], &snap[..]);
        }
    }
}
