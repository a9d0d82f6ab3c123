//! Signal events: notable, non-periodic status changes on a feed.

use serde::{Deserialize, Serialize};

/// The signal type that marks an ordinary periodic report. Reports carrying
/// this value are never recorded as signal events.
pub const PERIODIC_SIGNAL: &str = "periodic";

/// A notable status change observed on a feed (e.g., "SIGINT", "reconnect").
///
/// Only a short tail of these is retained; they annotate the history view so
/// viewers can mark the moment a feed was interrupted or recovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEvent {
    /// ISO-8601 timestamp of the report that carried the signal.
    pub time: String,

    /// Signal type. Never [`PERIODIC_SIGNAL`] once recorded.
    #[serde(rename = "type")]
    pub kind: String,

    /// Exchange the signal originated from.
    pub exchange: String,

    /// Channel the signal originated from.
    pub channel: String,
}

impl SignalEvent {
    /// Whether a report-level signal type denotes an actual event.
    pub fn is_notable(kind: &str) -> bool {
        !kind.is_empty() && kind != PERIODIC_SIGNAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_is_not_notable() {
        assert!(!SignalEvent::is_notable(PERIODIC_SIGNAL));
        assert!(!SignalEvent::is_notable(""));
    }

    #[test]
    fn named_signals_are_notable() {
        assert!(SignalEvent::is_notable("SIGINT"));
        assert!(SignalEvent::is_notable("reconnect"));
    }

    #[test]
    fn serializes_kind_as_type() {
        let event = SignalEvent {
            time: "2024-01-01T00:00:00.000Z".to_string(),
            kind: "SIGINT".to_string(),
            exchange: "okx".to_string(),
            channel: "trade".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"SIGINT""#));
        assert!(!json.contains(r#""kind""#));
    }
}
