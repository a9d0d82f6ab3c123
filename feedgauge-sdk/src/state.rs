//! Shared counter state between feed handles and the emission task.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use feedgauge_types::FeedKey;
use parking_lot::RwLock;

/// Cumulative counters for one feed. Handles increment these from any
/// thread; the emission task reads totals and derives per-interval deltas.
#[derive(Debug, Default)]
pub struct FeedCounters {
    pub msgs: AtomicU64,
    pub bytes: AtomicU64,
}

impl FeedCounters {
    /// Record `count` messages totalling `bytes` bytes.
    pub fn record(&self, count: u64, bytes: u64) {
        self.msgs.fetch_add(count, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Current cumulative totals as `(messages, bytes)`.
    pub fn totals(&self) -> (u64, u64) {
        (
            self.msgs.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }
}

/// All registered feeds.
#[derive(Debug, Default)]
pub struct ReporterState {
    feeds: RwLock<BTreeMap<FeedKey, Arc<FeedCounters>>>,
}

impl ReporterState {
    /// Get or create the counters for a feed.
    pub fn register(&self, key: &FeedKey) -> Arc<FeedCounters> {
        // Fast path: already registered.
        {
            let feeds = self.feeds.read();
            if let Some(counters) = feeds.get(key) {
                return counters.clone();
            }
        }

        let mut feeds = self.feeds.write();
        feeds
            .entry(key.clone())
            .or_insert_with(|| Arc::new(FeedCounters::default()))
            .clone()
    }

    /// Snapshot every feed's cumulative totals.
    pub fn totals(&self) -> Vec<(FeedKey, u64, u64)> {
        self.feeds
            .read()
            .iter()
            .map(|(key, counters)| {
                let (msgs, bytes) = counters.totals();
                (key.clone(), msgs, bytes)
            })
            .collect()
    }

    /// Cumulative totals for one feed, if registered.
    pub fn totals_for(&self, key: &FeedKey) -> Option<(u64, u64)> {
        self.feeds.read().get(key).map(|c| c.totals())
    }
}
