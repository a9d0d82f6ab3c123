//! Fan-out of snapshot frames to live viewer connections.
//!
//! The registry is owned by the engine task, which is the single point that
//! admits, serves, and removes subscribers. Admission is therefore one
//! atomic accept-or-reject decision: there is no window where two
//! concurrent connections can both pass a capacity check.

use std::collections::HashMap;
use std::net::SocketAddr;

use feedgauge_types::{BroadcastFrame, RejectFrame, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outcome of an admission decision.
#[derive(Debug)]
pub enum Admission {
    /// Admitted; the connection owns this id until it disconnects.
    Accepted { id: u64 },
    /// Refused; the frame is written to the peer before closing.
    Rejected { frame: RejectFrame },
}

#[derive(Debug)]
struct Subscriber {
    peer: SocketAddr,
    outbound: mpsc::Sender<String>,
}

/// Capacity-limited set of live subscribers with best-effort, per-subscriber
/// isolated delivery.
#[derive(Debug)]
pub struct SnapshotBroadcaster {
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
    limit: usize,
}

impl SnapshotBroadcaster {
    /// Create a registry admitting at most `limit` concurrent subscribers.
    pub fn new(limit: usize) -> Self {
        Self {
            subscribers: HashMap::new(),
            next_id: 0,
            limit,
        }
    }

    /// Admit or refuse a new connection. Counting and insertion happen in
    /// one step, so the ceiling holds under concurrent connection storms.
    pub fn admit(&mut self, peer: SocketAddr, outbound: mpsc::Sender<String>) -> Admission {
        if self.subscribers.len() >= self.limit {
            warn!(%peer, limit = self.limit, "refusing viewer: ceiling reached");
            return Admission::Rejected {
                frame: RejectFrame::capacity(self.limit),
            };
        }
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, Subscriber { peer, outbound });
        debug!(%peer, id, live = self.subscribers.len(), "viewer admitted");
        Admission::Accepted { id }
    }

    /// Remove a subscriber. Returns `false` if it was already gone, so
    /// every exit path can call this without double-removal effects.
    pub fn remove(&mut self, id: u64) -> bool {
        match self.subscribers.remove(&id) {
            Some(sub) => {
                debug!(peer = %sub.peer, id, live = self.subscribers.len(), "viewer removed");
                true
            }
            None => false,
        }
    }

    /// Deliver a frame to every live subscriber, fire-and-forget.
    ///
    /// A subscriber whose outbound queue is full merely drops this frame
    /// (the next broadcast carries full state again); one whose queue is
    /// closed is dead and is removed. Neither case affects delivery to any
    /// other subscriber. Returns the number of subscribers the frame was
    /// queued for.
    pub fn broadcast(&mut self, frame: &BroadcastFrame) -> usize {
        let line = match serialize_line(&ServerMessage::Snapshot(frame.clone())) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to serialize broadcast frame");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sub) in &self.subscribers {
            match sub.outbound.try_send(line.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(peer = %sub.peer, "viewer lagging, dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(peer = %sub.peer, "viewer channel closed, terminating");
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            self.remove(id);
        }
        delivered
    }

    /// Number of currently live subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether any subscriber is live.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Serialize a server frame as one NDJSON line.
pub fn serialize_line(message: &ServerMessage) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
