//! Turns ingestion reports into periodic rate samples.
//!
//! Two ingestion policies are supported, selected at configuration time:
//!
//! - **Push**: each report already carries `msg_sec`/`bytes_sec` computed by
//!   the producer over its own interval. The report is rounded and recorded
//!   immediately; the aggregator keeps no state.
//! - **Pull**: each report carries raw unit counts. The aggregator
//!   accumulates per-feed counters and a fixed-period tick converts them to
//!   rates, recording all active feeds against one shared timestamp.

use std::collections::HashMap;
use std::time::Instant;

use feedgauge_types::{
    iso_from_millis, iso_now, ChannelStatus, FeedKey, SignalEvent, StatsReport,
};
use tracing::debug;

use crate::store::MetricsStore;

/// How reports are converted to samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Producers pre-compute rates; record on receipt.
    Push,
    /// Producers send raw counts; rates are computed on a fixed tick.
    Pull,
}

#[derive(Debug)]
struct PendingCounters {
    msgs: u64,
    bytes: u64,
    since: Instant,
}

/// Converts validated reports into store mutations under one of the two
/// ingestion policies.
#[derive(Debug)]
pub struct RateAggregator {
    mode: IngestMode,
    pending: HashMap<FeedKey, PendingCounters>,
}

impl RateAggregator {
    pub fn new(mode: IngestMode) -> Self {
        Self {
            mode,
            pending: HashMap::new(),
        }
    }

    pub fn mode(&self) -> IngestMode {
        self.mode
    }

    /// Apply one validated report to the store.
    ///
    /// Returns `true` when the store changed in a way viewers should see now
    /// (a recorded sample or a notable signal); pure pull-mode accumulation
    /// returns `false` and waits for the next tick.
    pub fn ingest(
        &mut self,
        store: &mut MetricsStore,
        key: &FeedKey,
        report: &StatsReport,
        now: Instant,
    ) -> bool {
        let timestamp = report
            .timestamp
            .map(iso_from_millis)
            .unwrap_or_else(iso_now);

        let notable = SignalEvent::is_notable(report.signal_or_periodic());
        if notable {
            store.record_signal(SignalEvent {
                time: timestamp.clone(),
                kind: report.signal_or_periodic().to_string(),
                exchange: key.exchange.clone(),
                channel: key.channel.clone(),
            });
        }

        match self.mode {
            IngestMode::Push => {
                let msg_rate = report.rounded_msg_rate();
                let byte_rate = report.rounded_byte_rate();
                store.record_sample(key, &timestamp, msg_rate, byte_rate);
                store.set_current(
                    key,
                    ChannelStatus {
                        msg_rate,
                        bytes_per_sec: byte_rate,
                        status: report.status_or_default().to_string(),
                        signal_type: report.signal_or_periodic().to_string(),
                        timestamp,
                    },
                );
                true
            }
            IngestMode::Pull => {
                let entry = self.pending.entry(key.clone()).or_insert(PendingCounters {
                    msgs: 0,
                    bytes: 0,
                    since: now,
                });
                entry.msgs += report.count.unwrap_or(1);
                entry.bytes += report.bytes.unwrap_or(0);

                // Rates stay at their last computed value until the tick.
                let (msg_rate, byte_rate) = store
                    .current_for(key)
                    .map(|c| (c.msg_rate, c.bytes_per_sec))
                    .unwrap_or((0, 0));
                store.set_current(
                    key,
                    ChannelStatus {
                        msg_rate,
                        bytes_per_sec: byte_rate,
                        status: report.status_or_default().to_string(),
                        signal_type: report.signal_or_periodic().to_string(),
                        timestamp,
                    },
                );
                notable
            }
        }
    }

    /// Convert accumulated pull-mode counters into one sample batch.
    ///
    /// Feeds with no activity since the previous tick are skipped entirely;
    /// no zero-sample is emitted for them. Returns the number of samples
    /// recorded.
    pub fn flush(&mut self, store: &mut MetricsStore, now: Instant) -> usize {
        let timestamp = iso_now();
        let mut samples = Vec::new();

        for (key, counters) in self.pending.iter_mut() {
            if counters.msgs == 0 && counters.bytes == 0 {
                counters.since = now;
                continue;
            }
            let elapsed = now.saturating_duration_since(counters.since).as_secs_f64();
            let msg_rate = compute_rate(counters.msgs, elapsed);
            let byte_rate = compute_rate(counters.bytes, elapsed);
            debug!(feed = %key, msg_rate, byte_rate, "tick sample");
            samples.push((key.clone(), msg_rate, byte_rate));

            counters.msgs = 0;
            counters.bytes = 0;
            counters.since = now;
        }

        store.record_batch(&timestamp, &samples);
        for (key, msg_rate, byte_rate) in &samples {
            let previous = store.current_for(key);
            let (status, signal_type) = previous
                .map(|c| (c.status.clone(), c.signal_type.clone()))
                .unwrap_or_else(|| ("running".to_string(), "periodic".to_string()));
            store.set_current(
                key,
                ChannelStatus {
                    msg_rate: *msg_rate,
                    bytes_per_sec: *byte_rate,
                    status,
                    signal_type,
                    timestamp: timestamp.clone(),
                },
            );
        }
        samples.len()
    }
}

/// `round(count / elapsed)`, defined as zero when no time has passed so a
/// clock anomaly can never produce a non-finite rate.
fn compute_rate(count: u64, elapsed_secs: f64) -> u64 {
    if elapsed_secs <= 0.0 {
        return 0;
    }
    (count as f64 / elapsed_secs).round() as u64
}
