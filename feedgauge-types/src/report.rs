//! Ingestion reports submitted by feed producers.

use serde::{Deserialize, Serialize};

use crate::{FeedKey, FeedKeyError};

/// One throughput report for a single feed.
///
/// Producers send one of these per line over a persistent connection. The
/// same shape covers both ingestion policies: pre-aggregated reports carry
/// `msg_sec`/`bytes_sec`, raw reports carry `count`/`bytes` and leave the
/// rate computation to the server.
///
/// All fields beyond the feed identity are optional on the wire; the
/// identity itself is validated with [`StatsReport::feed_key`] before any
/// state is touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatsReport {
    /// Source exchange. Required; an absent or empty value drops the report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,

    /// Channel name. Required; an absent or empty value drops the report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Producer-side timestamp, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Messages per second over the producer's reporting interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_sec: Option<f64>,

    /// Bytes per second over the producer's reporting interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_sec: Option<f64>,

    /// Raw message count for server-side aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,

    /// Raw byte count for server-side aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,

    /// Operational status of the feed ("running", "stopped", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Signal type; "periodic" marks an ordinary report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_type: Option<String>,
}

impl StatsReport {
    /// Validate the feed identity carried by this report.
    pub fn feed_key(&self) -> Result<FeedKey, FeedKeyError> {
        let exchange = self.exchange.as_deref().unwrap_or_default();
        let channel = self.channel.as_deref().unwrap_or_default();
        FeedKey::new(exchange, channel)
    }

    /// Message rate rounded to a whole number, clamped at zero.
    pub fn rounded_msg_rate(&self) -> u64 {
        round_rate(self.msg_sec)
    }

    /// Byte rate rounded to a whole number, clamped at zero.
    pub fn rounded_byte_rate(&self) -> u64 {
        round_rate(self.bytes_sec)
    }

    /// Status with the conventional default applied.
    pub fn status_or_default(&self) -> &str {
        self.status.as_deref().unwrap_or("running")
    }

    /// Signal type with the periodic sentinel applied.
    pub fn signal_or_periodic(&self) -> &str {
        self.signal_type.as_deref().unwrap_or(crate::PERIODIC_SIGNAL)
    }
}

/// Round an optional rate, treating absent, negative, and non-finite
/// values as zero.
fn round_rate(rate: Option<f64>) -> u64 {
    match rate {
        Some(value) if value.is_finite() && value > 0.0 => value.round() as u64,
        _ => 0,
    }
}

/// Any message a connected peer may send to the server.
///
/// Variants are distinguished by shape: a probe reply is `{"pong": seq}`,
/// everything else is treated as a stats report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Reply to a liveness probe.
    Pong(PongFrame),
    /// A throughput report.
    Report(StatsReport),
}

/// Reply to a server liveness probe, echoing its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongFrame {
    /// Echoed probe sequence number.
    pub pong: u64,
}
