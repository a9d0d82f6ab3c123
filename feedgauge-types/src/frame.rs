//! Frames pushed from the server to connected peers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::SignalEvent;

/// Close code sent when a connection is refused because the viewer ceiling
/// was reached.
pub const REJECT_CODE_CAPACITY: u16 = 1008;

/// Bounded history for one feed: the two series a viewer charts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelHistory {
    /// Messages per second, oldest first.
    #[serde(rename = "msgRates")]
    pub msg_rates: Vec<u64>,

    /// Bytes per second, oldest first.
    #[serde(rename = "bytesPerSec")]
    pub bytes_per_sec: Vec<u64>,
}

/// The full bounded history: shared timestamp axis, per-feed series, and the
/// recent-signal tail. This shape is both broadcast to viewers and persisted
/// to disk.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryView {
    /// Shared timestamp axis, ISO-8601, oldest first.
    #[serde(default)]
    pub timestamps: Vec<String>,

    /// Per-exchange, per-channel series.
    #[serde(default)]
    pub exchanges: BTreeMap<String, BTreeMap<String, ChannelHistory>>,

    /// Most recent notable signals, oldest first.
    #[serde(default)]
    pub signals: Vec<SignalEvent>,
}

/// Latest observed state of one feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    /// Most recent message rate.
    pub msg_rate: u64,

    /// Most recent byte rate.
    pub bytes_per_sec: u64,

    /// Operational status reported by the producer.
    pub status: String,

    /// Most recent signal type, "periodic" when nothing notable happened.
    pub signal_type: String,

    /// ISO-8601 timestamp of the report behind this entry.
    pub timestamp: String,
}

/// Latest state of every feed, keyed like the history view.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CurrentView {
    /// Per-exchange, per-channel latest status.
    pub exchanges: BTreeMap<String, BTreeMap<String, ChannelStatus>>,
}

/// One broadcast to a viewer: full history, plus the current-status map on
/// the initial frame of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastFrame {
    /// Bounded history, always resent in full.
    pub history: HistoryView,

    /// Latest per-feed status; present on the initial frame only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentView>,
}

/// Liveness probe. Peers echo the sequence number back as `{"pong": seq}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFrame {
    /// Probe sequence number.
    pub ping: u64,
}

/// Sent once before the server closes a refused connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectFrame {
    /// Application close code ([`REJECT_CODE_CAPACITY`] for the viewer ceiling).
    pub code: u16,

    /// Human-readable explanation.
    pub reason: String,
}

impl RejectFrame {
    /// The rejection sent when the viewer ceiling is reached.
    pub fn capacity(limit: usize) -> Self {
        Self {
            code: REJECT_CODE_CAPACITY,
            reason: format!("viewer limit of {limit} reached"),
        }
    }
}

/// Any frame the server writes to a peer.
///
/// Serialized untagged: a snapshot is the bare `{history, current?}` object,
/// a probe is `{"ping": seq}`, a rejection is `{"code", "reason"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// A snapshot broadcast.
    Snapshot(BroadcastFrame),
    /// A liveness probe.
    Ping(ProbeFrame),
    /// A connection refusal.
    Reject(RejectFrame),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_history() -> HistoryView {
        let mut exchanges = BTreeMap::new();
        let mut channels = BTreeMap::new();
        channels.insert(
            "trade".to_string(),
            ChannelHistory {
                msg_rates: vec![10, 20],
                bytes_per_sec: vec![1000, 2000],
            },
        );
        exchanges.insert("okx".to_string(), channels);
        HistoryView {
            timestamps: vec![
                "2024-01-01T00:00:00.000Z".to_string(),
                "2024-01-01T00:00:15.000Z".to_string(),
            ],
            exchanges,
            signals: Vec::new(),
        }
    }

    #[test]
    fn history_serializes_camel_case_series() {
        let json = serde_json::to_string(&sample_history()).unwrap();
        assert!(json.contains(r#""msgRates":[10,20]"#));
        assert!(json.contains(r#""bytesPerSec":[1000,2000]"#));
    }

    #[test]
    fn broadcast_frame_omits_absent_current() {
        let frame = BroadcastFrame {
            history: sample_history(),
            current: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("current"));
    }

    #[test]
    fn history_roundtrips_through_json() {
        let history = sample_history();
        let json = serde_json::to_string(&history).unwrap();
        let parsed: HistoryView = serde_json::from_str(&json).unwrap();
        assert_eq!(history, parsed);
    }

    #[test]
    fn history_tolerates_missing_sections() {
        // A persisted file from an older build may omit whole sections.
        let parsed: HistoryView = serde_json::from_str("{}").unwrap();
        assert!(parsed.timestamps.is_empty());
        assert!(parsed.exchanges.is_empty());
        assert!(parsed.signals.is_empty());
    }

    #[test]
    fn server_messages_serialize_untagged() {
        let ping = serde_json::to_string(&ServerMessage::Ping(ProbeFrame { ping: 3 })).unwrap();
        assert_eq!(ping, r#"{"ping":3}"#);

        let reject =
            serde_json::to_string(&ServerMessage::Reject(RejectFrame::capacity(10))).unwrap();
        assert!(reject.contains(r#""code":1008"#));
        assert!(reject.contains("viewer limit of 10 reached"));
    }

    #[test]
    fn server_message_parses_back_by_shape() {
        let ping: ServerMessage = serde_json::from_str(r#"{"ping":9}"#).unwrap();
        assert_eq!(ping, ServerMessage::Ping(ProbeFrame { ping: 9 }));

        let frame = BroadcastFrame {
            history: sample_history(),
            current: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        match serde_json::from_str::<ServerMessage>(&json).unwrap() {
            ServerMessage::Snapshot(parsed) => assert_eq!(parsed.history, frame.history),
            other => panic!("expected snapshot, got {other:?}"),
        }
    }
}
