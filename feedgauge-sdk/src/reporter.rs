//! The Reporter: periodic rate computation and emission for registered feeds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use feedgauge_types::{FeedKey, FeedKeyError, StatsReport, PERIODIC_SIGNAL};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::output::{Output, Sink};
use crate::state::{FeedCounters, ReporterState};

/// Collects per-feed throughput counters and periodically emits one report
/// per feed to the configured output.
///
/// # Example
///
/// ```rust,no_run
/// use feedgauge_sdk::{Output, Reporter};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let reporter = Reporter::builder()
///         .output(Output::tcp("localhost:3001"))
///         .interval(Duration::from_secs(15))
///         .build();
///
///     let trades = reporter.register("okx", "trade").unwrap();
///     let running = reporter.start();
///
///     // On every message from the feed:
///     trades.record(512);
///
///     tokio::time::sleep(Duration::from_secs(60)).await;
///     running.stop();
/// }
/// ```
#[derive(Debug)]
pub struct Reporter {
    state: Arc<ReporterState>,
    output: Option<Output>,
    interval: Duration,
    status: String,
    raw_counts: bool,
    signal_tx: mpsc::Sender<SignalCmd>,
    signal_rx: mpsc::Receiver<SignalCmd>,
}

#[derive(Debug)]
struct SignalCmd {
    key: FeedKey,
    kind: String,
}

impl Reporter {
    /// Create a builder for configuring the reporter.
    pub fn builder() -> ReporterBuilder {
        ReporterBuilder::default()
    }

    /// Register a feed and get a handle for recording traffic.
    ///
    /// Registering the same feed twice returns handles sharing one set of
    /// counters.
    pub fn register(
        &self,
        exchange: impl Into<String>,
        channel: impl Into<String>,
    ) -> Result<FeedHandle, FeedKeyError> {
        let key = FeedKey::new(exchange, channel)?;
        let counters = self.state.register(&key);
        Ok(FeedHandle {
            key,
            counters,
            signals: self.signal_tx.clone(),
        })
    }

    /// Start the background emission task.
    pub fn start(self) -> ReporterHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let Reporter {
            state,
            output,
            interval,
            status,
            raw_counts,
            signal_tx,
            mut signal_rx,
        } = self;

        let task_state = state.clone();
        tokio::spawn(async move {
            let mut sink = match output {
                Some(output) => Sink::new(output),
                None => {
                    debug!("no output configured, reporter idle");
                    return;
                }
            };
            let mut windows: HashMap<FeedKey, Window> = HashMap::new();
            // Feeds registered before the task started measure their first
            // window from here.
            let origin = Instant::now();
            let mut tick = tokio::time::interval_at(
                tokio::time::Instant::now() + interval,
                interval,
            );

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = tick.tick() => {
                        let now = Instant::now();
                        for (key, msgs, bytes) in task_state.totals() {
                            let report = next_report(
                                &mut windows, &key, msgs, bytes, now, origin,
                                &status, PERIODIC_SIGNAL, raw_counts,
                            );
                            sink.emit(&report).await;
                        }
                    }
                    cmd = signal_rx.recv() => {
                        let Some(cmd) = cmd else { break };
                        let (msgs, bytes) = task_state
                            .totals_for(&cmd.key)
                            .unwrap_or((0, 0));
                        let report = next_report(
                            &mut windows, &cmd.key, msgs, bytes, Instant::now(), origin,
                            &status, &cmd.kind, raw_counts,
                        );
                        sink.emit(&report).await;
                    }
                    line = sink.next_inbound() => {
                        sink.handle_inbound(&line).await;
                    }
                }
            }
        });

        ReporterHandle {
            state,
            signal_tx,
            stop_tx,
        }
    }
}

/// Per-feed emission window: totals and time of the previous report.
struct Window {
    msgs: u64,
    bytes: u64,
    at: Instant,
}

/// Compute the next report for a feed and roll its window forward.
#[allow(clippy::too_many_arguments)]
fn next_report(
    windows: &mut HashMap<FeedKey, Window>,
    key: &FeedKey,
    msgs: u64,
    bytes: u64,
    now: Instant,
    origin: Instant,
    status: &str,
    signal: &str,
    raw_counts: bool,
) -> StatsReport {
    let (delta_msgs, delta_bytes, elapsed) = match windows.get(key) {
        Some(window) => (
            msgs.saturating_sub(window.msgs),
            bytes.saturating_sub(window.bytes),
            now.saturating_duration_since(window.at).as_secs_f64(),
        ),
        None => (
            msgs,
            bytes,
            now.saturating_duration_since(origin).as_secs_f64(),
        ),
    };
    windows.insert(
        key.clone(),
        Window {
            msgs,
            bytes,
            at: now,
        },
    );

    let mut report = StatsReport {
        exchange: Some(key.exchange.clone()),
        channel: Some(key.channel.clone()),
        timestamp: Some(epoch_millis()),
        status: Some(status.to_string()),
        signal_type: Some(signal.to_string()),
        ..Default::default()
    };
    if raw_counts {
        report.count = Some(delta_msgs);
        report.bytes = Some(delta_bytes);
    } else if elapsed > 0.0 {
        report.msg_sec = Some(delta_msgs as f64 / elapsed);
        report.bytes_sec = Some(delta_bytes as f64 / elapsed);
    } else {
        report.msg_sec = Some(0.0);
        report.bytes_sec = Some(0.0);
    }
    report
}

fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Handle for recording traffic on one feed. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    key: FeedKey,
    counters: Arc<FeedCounters>,
    signals: mpsc::Sender<SignalCmd>,
}

impl FeedHandle {
    /// Record one message of `bytes` bytes.
    pub fn record(&self, bytes: u64) {
        self.counters.record(1, bytes);
    }

    /// Record `count` messages totalling `bytes` bytes.
    pub fn record_many(&self, count: u64, bytes: u64) {
        self.counters.record(count, bytes);
    }

    /// Report a notable signal (e.g. "SIGINT", "reconnect") immediately,
    /// out of band of the periodic cadence. Best effort: if the emission
    /// task is saturated or stopped, the signal is dropped.
    pub fn signal(&self, kind: impl Into<String>) {
        let _ = self.signals.try_send(SignalCmd {
            key: self.key.clone(),
            kind: kind.into(),
        });
    }

    /// The feed this handle records for.
    pub fn key(&self) -> &FeedKey {
        &self.key
    }
}

/// Controls a running reporter.
///
/// Feeds can still be registered through this handle; the emission task
/// picks them up on its next tick.
#[derive(Debug)]
pub struct ReporterHandle {
    state: Arc<ReporterState>,
    signal_tx: mpsc::Sender<SignalCmd>,
    stop_tx: watch::Sender<bool>,
}

impl ReporterHandle {
    /// Register another feed while the reporter is running.
    pub fn register(
        &self,
        exchange: impl Into<String>,
        channel: impl Into<String>,
    ) -> Result<FeedHandle, FeedKeyError> {
        let key = FeedKey::new(exchange, channel)?;
        let counters = self.state.register(&key);
        Ok(FeedHandle {
            key,
            counters,
            signals: self.signal_tx.clone(),
        })
    }

    /// Stop the emission task.
    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Builder for configuring a [`Reporter`].
#[derive(Debug, Default)]
pub struct ReporterBuilder {
    output: Option<Output>,
    interval: Option<Duration>,
    status: Option<String>,
    raw_counts: bool,
}

impl ReporterBuilder {
    /// Set the output destination.
    pub fn output(mut self, output: Output) -> Self {
        self.output = Some(output);
        self
    }

    /// Set the reporting interval. Defaults to 15 seconds.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Set the operational status carried by every report. Defaults to
    /// "running".
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Emit raw per-interval counts (`count`/`bytes`) instead of computed
    /// rates, for servers aggregating in pull mode.
    pub fn raw_counts(mut self, raw: bool) -> Self {
        self.raw_counts = raw;
        self
    }

    /// Build the reporter.
    pub fn build(self) -> Reporter {
        let (signal_tx, signal_rx) = mpsc::channel(16);
        Reporter {
            state: Arc::new(ReporterState::default()),
            output: self.output,
            interval: self.interval.unwrap_or(Duration::from_secs(15)),
            status: self.status.unwrap_or_else(|| "running".to_string()),
            raw_counts: self.raw_counts,
            signal_tx,
            signal_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let reporter = Reporter::builder().build();
        assert_eq!(reporter.interval, Duration::from_secs(15));
        assert_eq!(reporter.status, "running");
        assert!(!reporter.raw_counts);
        assert!(reporter.output.is_none());
    }

    #[test]
    fn register_rejects_empty_names() {
        let reporter = Reporter::builder().build();
        assert!(reporter.register("", "trade").is_err());
        assert!(reporter.register("okx", "").is_err());
    }

    #[test]
    fn handles_for_same_feed_share_counters() {
        let reporter = Reporter::builder().build();
        let a = reporter.register("okx", "trade").unwrap();
        let b = reporter.register("okx", "trade").unwrap();

        a.record(100);
        b.record(200);
        assert_eq!(
            reporter.state.totals_for(a.key()),
            Some((2, 300))
        );
    }

    #[test]
    fn next_report_computes_rates_from_window_deltas() {
        let mut windows = HashMap::new();
        let key = FeedKey::new("okx", "trade").unwrap();
        let t0 = Instant::now();

        // First observation measures from the origin anchor.
        let first = next_report(&mut windows, &key, 0, 0, t0, t0, "running", "periodic", false);
        assert_eq!(first.msg_sec, Some(0.0));

        let later = t0 + Duration::from_secs(10);
        let report =
            next_report(&mut windows, &key, 150, 5120, later, t0, "running", "periodic", false);
        assert_eq!(report.msg_sec, Some(15.0));
        assert_eq!(report.bytes_sec, Some(512.0));
        assert_eq!(report.exchange.as_deref(), Some("okx"));
        assert_eq!(report.signal_type.as_deref(), Some("periodic"));
    }

    #[test]
    fn next_report_emits_raw_deltas_when_configured() {
        let mut windows = HashMap::new();
        let key = FeedKey::new("okx", "trade").unwrap();
        let t0 = Instant::now();

        next_report(&mut windows, &key, 10, 100, t0, t0, "running", "periodic", true);
        let report = next_report(
            &mut windows,
            &key,
            35,
            600,
            t0 + Duration::from_secs(5),
            t0,
            "running",
            "periodic",
            true,
        );
        assert_eq!(report.count, Some(25));
        assert_eq!(report.bytes, Some(500));
        assert!(report.msg_sec.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn emission_task_reports_each_feed_per_tick() {
        let (output, mut rx) = Output::channel(8);
        let reporter = Reporter::builder()
            .output(output)
            .interval(Duration::from_secs(15))
            .build();
        let trades = reporter.register("okx", "trade").unwrap();
        let running = reporter.start();
        tokio::task::yield_now().await;

        trades.record_many(150, 15_000);
        tokio::time::advance(Duration::from_secs(16)).await;

        let report = rx.recv().await.unwrap();
        assert_eq!(report.exchange.as_deref(), Some("okx"));
        assert_eq!(report.channel.as_deref(), Some("trade"));
        // First window anchors at task start; 150 msgs over ~15s.
        let rate = report.msg_sec.unwrap();
        assert!(rate > 0.0, "expected positive rate, got {rate}");

        running.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn signal_emits_immediately() {
        let (output, mut rx) = Output::channel(8);
        let reporter = Reporter::builder()
            .output(output)
            .interval(Duration::from_secs(3600))
            .build();
        let trades = reporter.register("okx", "trade").unwrap();
        let running = reporter.start();
        tokio::task::yield_now().await;

        trades.signal("SIGINT");
        // No tick has elapsed; the signal alone triggers a report.
        let report = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("signal report should arrive without a tick")
            .unwrap();
        assert_eq!(report.signal_type.as_deref(), Some("SIGINT"));

        running.stop();
    }
}
