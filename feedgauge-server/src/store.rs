//! Bounded in-memory time-series state for all observed feeds.
//!
//! The store owns one shared timestamp axis, a pair of series per feed, a
//! short tail of notable signals, and the latest status per feed. All series
//! are ring buffers, so memory stays bounded no matter how long the process
//! ingests.
//!
//! The timestamp axis advances once per recorded sample batch while each
//! feed's series advance only when that feed reports, so index alignment
//! between `timestamps[i]` and a feed's `msg_rates[i]` is best-effort under
//! mixed multi-feed traffic. Batch recording (one timestamp for a whole
//! aggregation tick) keeps the axis from outrunning the series; viewers
//! receive full self-correcting state every broadcast either way.

use std::collections::BTreeMap;

use feedgauge_types::{
    ChannelHistory, ChannelStatus, CurrentView, FeedKey, HistoryView, SignalEvent,
};

use crate::ring::RingBuffer;

/// Number of notable signals retained.
pub const SIGNAL_CAPACITY: usize = 5;

/// Per-feed series pair.
#[derive(Debug, Clone)]
struct FeedSeries {
    msg_rates: RingBuffer<u64>,
    bytes_per_sec: RingBuffer<u64>,
}

impl FeedSeries {
    fn new(capacity: usize) -> Self {
        Self {
            msg_rates: RingBuffer::new(capacity),
            bytes_per_sec: RingBuffer::new(capacity),
        }
    }
}

/// Keyed collection of bounded series plus latest per-feed status.
///
/// Created once at startup, optionally hydrated from a persisted snapshot,
/// and owned exclusively by the engine task for the life of the process.
/// Feed entries are never evicted; only their series contents rotate.
#[derive(Debug)]
pub struct MetricsStore {
    capacity: usize,
    timestamps: RingBuffer<String>,
    feeds: BTreeMap<FeedKey, FeedSeries>,
    signals: RingBuffer<SignalEvent>,
    current: BTreeMap<FeedKey, ChannelStatus>,
}

impl MetricsStore {
    /// Create an empty store whose series hold `capacity` points each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            timestamps: RingBuffer::new(capacity),
            feeds: BTreeMap::new(),
            signals: RingBuffer::new(SIGNAL_CAPACITY),
            current: BTreeMap::new(),
        }
    }

    /// Record one sample for one feed, advancing the shared timestamp axis.
    pub fn record_sample(&mut self, key: &FeedKey, timestamp: &str, msg_rate: u64, bytes_per_sec: u64) {
        self.timestamps.push(timestamp.to_string());
        self.push_feed_values(key, msg_rate, bytes_per_sec);
    }

    /// Record a whole aggregation tick: one shared timestamp, one value pair
    /// per active feed. Feeds absent from `samples` keep their series as-is.
    pub fn record_batch(&mut self, timestamp: &str, samples: &[(FeedKey, u64, u64)]) {
        if samples.is_empty() {
            return;
        }
        self.timestamps.push(timestamp.to_string());
        for (key, msg_rate, bytes_per_sec) in samples {
            self.push_feed_values(key, *msg_rate, *bytes_per_sec);
        }
    }

    fn push_feed_values(&mut self, key: &FeedKey, msg_rate: u64, bytes_per_sec: u64) {
        if !self.feeds.contains_key(key) {
            self.seed_exchange(&key.exchange);
        }
        let series = self
            .feeds
            .entry(key.clone())
            .or_insert_with(|| FeedSeries::new(self.capacity));
        series.msg_rates.push(msg_rate);
        series.bytes_per_sec.push(bytes_per_sec);
    }

    /// Eagerly create the conventional channels the first time an exchange
    /// is observed, so viewers get stable chart slots for them.
    fn seed_exchange(&mut self, exchange: &str) {
        if self.feeds.keys().any(|k| k.exchange == exchange) {
            return;
        }
        for channel in FeedKey::SEEDED_CHANNELS {
            if let Ok(key) = FeedKey::new(exchange, channel) {
                self.feeds.entry(key).or_insert_with(|| FeedSeries::new(self.capacity));
            }
        }
    }

    /// Append a notable signal. Reports whose type is the periodic sentinel
    /// are ignored here.
    pub fn record_signal(&mut self, event: SignalEvent) {
        if !SignalEvent::is_notable(&event.kind) {
            return;
        }
        self.signals.push(event);
    }

    /// Replace the latest-status entry for a feed.
    pub fn set_current(&mut self, key: &FeedKey, status: ChannelStatus) {
        self.current.insert(key.clone(), status);
    }

    /// Latest-status entry for a feed, if it has reported.
    pub fn current_for(&self, key: &FeedKey) -> Option<&ChannelStatus> {
        self.current.get(key)
    }

    /// Build an independent copy of all bounded sequences. Later mutation of
    /// the store never shows through a returned view.
    pub fn history_view(&self) -> HistoryView {
        let mut exchanges: BTreeMap<String, BTreeMap<String, ChannelHistory>> = BTreeMap::new();
        for (key, series) in &self.feeds {
            exchanges.entry(key.exchange.clone()).or_default().insert(
                key.channel.clone(),
                ChannelHistory {
                    msg_rates: series.msg_rates.to_vec(),
                    bytes_per_sec: series.bytes_per_sec.to_vec(),
                },
            );
        }
        HistoryView {
            timestamps: self.timestamps.to_vec(),
            exchanges,
            signals: self.signals.to_vec(),
        }
    }

    /// Build an independent copy of the current-status map.
    pub fn current_view(&self) -> CurrentView {
        let mut exchanges: BTreeMap<String, BTreeMap<String, ChannelStatus>> = BTreeMap::new();
        for (key, status) in &self.current {
            exchanges
                .entry(key.exchange.clone())
                .or_default()
                .insert(key.channel.clone(), status.clone());
        }
        CurrentView { exchanges }
    }

    /// Re-push persisted history, truncating every sequence to the store's
    /// own capacities. State saved under a larger history length loads
    /// safely: only the most recent points survive.
    pub fn hydrate(&mut self, history: &HistoryView) {
        for timestamp in tail(&history.timestamps, self.capacity) {
            self.timestamps.push(timestamp.clone());
        }
        for (exchange, channels) in &history.exchanges {
            for (channel, series) in channels {
                let Ok(key) = FeedKey::new(exchange.clone(), channel.clone()) else {
                    continue;
                };
                self.seed_exchange(&key.exchange);
                let feed = self
                    .feeds
                    .entry(key)
                    .or_insert_with(|| FeedSeries::new(self.capacity));
                for value in tail(&series.msg_rates, self.capacity) {
                    feed.msg_rates.push(*value);
                }
                for value in tail(&series.bytes_per_sec, self.capacity) {
                    feed.bytes_per_sec.push(*value);
                }
            }
        }
        for signal in tail(&history.signals, SIGNAL_CAPACITY) {
            self.signals.push(signal.clone());
        }
    }

    /// Number of feeds with allocated series (including seeded ones).
    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// Configured points-per-series capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn tail<T>(values: &[T], keep: usize) -> &[T] {
    &values[values.len().saturating_sub(keep)..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(exchange: &str, channel: &str) -> FeedKey {
        FeedKey::new(exchange, channel).unwrap()
    }

    fn signal(kind: &str, n: usize) -> SignalEvent {
        SignalEvent {
            time: format!("2024-01-01T00:00:{n:02}.000Z"),
            kind: kind.to_string(),
            exchange: "okx".to_string(),
            channel: "trade".to_string(),
        }
    }

    #[test]
    fn record_sample_creates_feed_lazily() {
        let mut store = MetricsStore::new(4);
        store.record_sample(&key("okx", "trade"), "t0", 100, 5000);

        let view = store.history_view();
        assert_eq!(view.timestamps, vec!["t0"]);
        assert_eq!(view.exchanges["okx"]["trade"].msg_rates, vec![100]);
        assert_eq!(view.exchanges["okx"]["trade"].bytes_per_sec, vec![5000]);
    }

    #[test]
    fn first_sight_of_exchange_seeds_conventional_channels() {
        let mut store = MetricsStore::new(4);
        store.record_sample(&key("okx", "book"), "t0", 1, 1);

        let view = store.history_view();
        let channels = &view.exchanges["okx"];
        assert!(channels.contains_key("trade"));
        assert!(channels.contains_key("inc"));
        assert!(channels.contains_key("book"));
        // Seeded channels exist but have no points yet.
        assert!(channels["trade"].msg_rates.is_empty());
    }

    #[test]
    fn series_rotate_at_capacity() {
        let mut store = MetricsStore::new(3);
        let k = key("okx", "trade");
        for i in 0..5u64 {
            store.record_sample(&k, &format!("t{i}"), i * 10, i);
        }

        let view = store.history_view();
        assert_eq!(view.timestamps, vec!["t2", "t3", "t4"]);
        assert_eq!(view.exchanges["okx"]["trade"].msg_rates, vec![20, 30, 40]);
    }

    #[test]
    fn batch_advances_timestamps_once_for_all_feeds() {
        let mut store = MetricsStore::new(4);
        store.record_batch(
            "t0",
            &[(key("okx", "trade"), 10, 100), (key("okx", "inc"), 20, 200)],
        );

        let view = store.history_view();
        assert_eq!(view.timestamps.len(), 1);
        assert_eq!(view.exchanges["okx"]["trade"].msg_rates, vec![10]);
        assert_eq!(view.exchanges["okx"]["inc"].msg_rates, vec![20]);
    }

    #[test]
    fn empty_batch_leaves_axis_untouched() {
        let mut store = MetricsStore::new(4);
        store.record_batch("t0", &[]);
        assert!(store.history_view().timestamps.is_empty());
    }

    #[test]
    fn signal_ring_keeps_last_five() {
        let mut store = MetricsStore::new(4);
        for n in 0..8 {
            store.record_signal(signal("SIGINT", n));
        }

        let signals = store.history_view().signals;
        assert_eq!(signals.len(), 5);
        assert_eq!(signals[0].time, "2024-01-01T00:00:03.000Z");
        assert_eq!(signals[4].time, "2024-01-01T00:00:07.000Z");
    }

    #[test]
    fn periodic_signals_are_not_recorded() {
        let mut store = MetricsStore::new(4);
        store.record_signal(signal("periodic", 0));
        assert!(store.history_view().signals.is_empty());
    }

    #[test]
    fn set_current_replaces_prior_entry() {
        let mut store = MetricsStore::new(4);
        let k = key("okx", "trade");
        let status = |rate| ChannelStatus {
            msg_rate: rate,
            bytes_per_sec: 0,
            status: "running".to_string(),
            signal_type: "periodic".to_string(),
            timestamp: "t".to_string(),
        };
        store.set_current(&k, status(10));
        store.set_current(&k, status(20));

        assert_eq!(store.current_for(&k).unwrap().msg_rate, 20);
        assert_eq!(store.current_view().exchanges["okx"]["trade"].msg_rate, 20);
    }

    #[test]
    fn history_view_is_independent_of_later_mutation() {
        let mut store = MetricsStore::new(4);
        let k = key("okx", "trade");
        store.record_sample(&k, "t0", 1, 1);

        let view = store.history_view();
        store.record_sample(&k, "t1", 2, 2);

        assert_eq!(view.timestamps, vec!["t0"]);
        assert_eq!(view.exchanges["okx"]["trade"].msg_rates, vec![1]);
    }

    #[test]
    fn hydrate_truncates_oversized_history() {
        let mut source = MetricsStore::new(10);
        let k = key("okx", "trade");
        for i in 0..10u64 {
            source.record_sample(&k, &format!("t{i}"), i, i);
        }

        let mut fresh = MetricsStore::new(4);
        fresh.hydrate(&source.history_view());

        let view = fresh.history_view();
        assert_eq!(view.timestamps, vec!["t6", "t7", "t8", "t9"]);
        assert_eq!(view.exchanges["okx"]["trade"].msg_rates, vec![6, 7, 8, 9]);
    }

    #[test]
    fn save_then_hydrate_roundtrip_preserves_content() {
        let mut source = MetricsStore::new(4);
        source.record_sample(&key("okx", "trade"), "t0", 10, 100);
        source.record_sample(&key("binance", "inc"), "t1", 20, 200);
        source.record_signal(signal("SIGTERM", 1));

        let saved = source.history_view();
        let mut restored = MetricsStore::new(4);
        restored.hydrate(&saved);

        assert_eq!(restored.history_view(), saved);
    }

    #[test]
    fn hydrate_skips_entries_with_empty_names() {
        let mut history = HistoryView::default();
        history
            .exchanges
            .entry(String::new())
            .or_default()
            .insert("trade".to_string(), ChannelHistory::default());

        let mut store = MetricsStore::new(4);
        store.hydrate(&history);
        assert_eq!(store.feed_count(), 0);
    }
}
