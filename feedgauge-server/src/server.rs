//! The NDJSON listener, per-connection tasks, and the engine task that owns
//! all mutable state.
//!
//! Every state mutation happens inside the single engine task, which drains
//! an event channel and two interval timers. Connection tasks only do I/O:
//! inbound lines become engine events, outbound frames arrive through a
//! bounded per-subscriber queue. Sends toward subscribers never block the
//! engine; a slow peer drops frames and catches up on the next broadcast.

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{Context, Result};
use feedgauge_types::{
    BroadcastFrame, ClientMessage, ProbeFrame, ServerMessage, StatsReport,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::aggregate::{IngestMode, RateAggregator};
use crate::broadcast::{serialize_line, Admission, SnapshotBroadcaster};
use crate::config::ServerConfig;
use crate::persist::PersistenceManager;
use crate::store::MetricsStore;

/// Events handled by the engine task, one at a time, run to completion.
enum EngineEvent {
    Connect {
        peer: SocketAddr,
        outbound: mpsc::Sender<String>,
        reply: oneshot::Sender<ConnectReply>,
    },
    Report {
        peer: SocketAddr,
        report: StatsReport,
    },
    Disconnect {
        id: u64,
    },
}

/// Engine's answer to a connection attempt.
enum ConnectReply {
    Accepted { id: u64, snapshot_line: String },
    Rejected { line: String },
}

/// A bound server, ready to run. Binding is separate from running so
/// callers can learn the local address (and tests can bind port 0).
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    store: MetricsStore,
    persistence: PersistenceManager,
}

impl Server {
    /// Hydrate state from disk and bind the listener.
    ///
    /// A bind failure is fatal, but whatever history was hydrated is flushed
    /// back to disk best-effort before the error propagates.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let persistence = PersistenceManager::new(&config.data_dir, config.max_log_bytes);
        let mut store = MetricsStore::new(config.history_points);

        match persistence.load().await {
            Ok(Some(history)) => store.hydrate(&history),
            Ok(None) => debug!("no persisted history found, starting empty"),
            Err(err) => error!(error = %err, "failed to load persisted history, starting empty"),
        }

        let listener = match TcpListener::bind(&config.listen).await {
            Ok(listener) => listener,
            Err(err) => {
                if let Err(save_err) = persistence.save(&store.history_view()).await {
                    error!(error = %save_err, "flush before exit failed");
                }
                return Err(err).context(format!("failed to bind {}", config.listen));
            }
        };
        info!(addr = %listener.local_addr()?, "listening");

        Ok(Self {
            config,
            listener,
            store,
            persistence,
        })
    }

    /// The address the listener actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips, then flush history and
    /// stop. All engine state lives and dies inside this call.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Server {
            config,
            listener,
            store,
            persistence,
        } = self;

        let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(256);

        let engine = Engine {
            store,
            aggregator: RateAggregator::new(config.mode.into()),
            broadcaster: SnapshotBroadcaster::new(config.max_subscribers),
            persistence,
            config: config.clone(),
        };
        let engine_shutdown = shutdown.clone();
        let engine_task = tokio::spawn(engine.run(event_rx, engine_shutdown));

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let conn = ConnectionSettings {
                                probe_interval: config.probe_interval(),
                                max_missed_probes: config.max_missed_probes,
                                outbound_queue: config.outbound_queue,
                            };
                            tokio::spawn(serve_connection(stream, peer, event_tx.clone(), conn));
                        }
                        Err(err) => {
                            // Transient accept errors (e.g. EMFILE) should not
                            // take down connections already being served.
                            warn!(error = %err, "accept failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        drop(event_tx);
        engine_task.await.context("engine task panicked")??;
        Ok(())
    }
}

struct Engine {
    store: MetricsStore,
    aggregator: RateAggregator,
    broadcaster: SnapshotBroadcaster,
    persistence: PersistenceManager,
    config: ServerConfig,
}

impl Engine {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<EngineEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let pull_mode = self.aggregator.mode() == IngestMode::Pull;
        let mut tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.tick_interval(),
            self.config.tick_interval(),
        );
        let save_period = self
            .config
            .save_interval()
            .unwrap_or(std::time::Duration::from_secs(24 * 60 * 60));
        let save_enabled = self.config.save_interval().is_some();
        let mut save_tick =
            tokio::time::interval_at(tokio::time::Instant::now() + save_period, save_period);

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle(event).await,
                        None => break,
                    }
                }
                _ = tick.tick(), if pull_mode => {
                    let recorded = self.aggregator.flush(&mut self.store, Instant::now());
                    if recorded > 0 {
                        self.broadcast_update();
                    }
                }
                _ = save_tick.tick(), if save_enabled => {
                    self.save_history().await;
                }
                _ = shutdown.changed() => break,
            }
        }

        self.save_history().await;
        info!("engine stopped");
        Ok(())
    }

    async fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connect { peer, outbound, reply } => {
                let response = match self.broadcaster.admit(peer, outbound) {
                    Admission::Accepted { id } => {
                        let frame = BroadcastFrame {
                            history: self.store.history_view(),
                            current: Some(self.store.current_view()),
                        };
                        match serialize_line(&ServerMessage::Snapshot(frame)) {
                            Ok(snapshot_line) => ConnectReply::Accepted { id, snapshot_line },
                            Err(err) => {
                                error!(error = %err, "failed to serialize initial snapshot");
                                self.broadcaster.remove(id);
                                return;
                            }
                        }
                    }
                    Admission::Rejected { frame } => {
                        match serialize_line(&ServerMessage::Reject(frame)) {
                            Ok(line) => ConnectReply::Rejected { line },
                            Err(err) => {
                                error!(error = %err, "failed to serialize rejection");
                                return;
                            }
                        }
                    }
                };
                // The connection task may already be gone; nothing to clean
                // up here beyond its registry entry, which its Disconnect
                // event (or a failed broadcast) will reap.
                let _ = reply.send(response);
            }
            EngineEvent::Report { peer, report } => {
                let key = match report.feed_key() {
                    Ok(key) => key,
                    Err(err) => {
                        warn!(%peer, error = %err, "dropping malformed report");
                        return;
                    }
                };
                if let Err(err) = self.persistence.append_log(&report).await {
                    error!(feed = %key, error = %err, "failed to append sample log");
                }
                let changed = self
                    .aggregator
                    .ingest(&mut self.store, &key, &report, Instant::now());
                if changed {
                    self.broadcast_update();
                }
            }
            EngineEvent::Disconnect { id } => {
                self.broadcaster.remove(id);
            }
        }
    }

    fn broadcast_update(&mut self) {
        if self.broadcaster.is_empty() {
            return;
        }
        let frame = BroadcastFrame {
            history: self.store.history_view(),
            current: None,
        };
        let delivered = self.broadcaster.broadcast(&frame);
        debug!(delivered, "broadcast");
    }

    async fn save_history(&mut self) {
        if let Err(err) = self.persistence.save(&self.store.history_view()).await {
            error!(error = %err, "failed to save history");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    probe_interval: std::time::Duration,
    max_missed_probes: u32,
    outbound_queue: usize,
}

/// Serve one peer: register with the engine, relay inbound reports, drain
/// outbound frames, and probe for liveness.
///
/// The probe timer is local to this task, so every exit path, normal close,
/// read or write error, forced termination, ends it exactly once.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    event_tx: mpsc::Sender<EngineEvent>,
    settings: ConnectionSettings,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let (outbound_tx, mut outbound) = mpsc::channel::<String>(settings.outbound_queue);
    let (reply_tx, reply_rx) = oneshot::channel();
    if event_tx
        .send(EngineEvent::Connect {
            peer,
            outbound: outbound_tx,
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let id = match reply_rx.await {
        Ok(ConnectReply::Accepted { id, snapshot_line }) => {
            if write_line(&mut write_half, &snapshot_line).await.is_err() {
                warn!(%peer, "failed to send initial snapshot");
                let _ = event_tx.send(EngineEvent::Disconnect { id }).await;
                return;
            }
            id
        }
        Ok(ConnectReply::Rejected { line }) => {
            let _ = write_line(&mut write_half, &line).await;
            let _ = write_half.shutdown().await;
            info!(%peer, "connection refused");
            return;
        }
        Err(_) => return,
    };
    info!(%peer, id, "peer connected");

    let mut probe = tokio::time::interval_at(
        tokio::time::Instant::now() + settings.probe_interval,
        settings.probe_interval,
    );
    let mut probe_seq: u64 = 0;
    let mut missed: u32 = 0;

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(line) => {
                        if write_line(&mut write_half, &line).await.is_err() {
                            break "send failed";
                        }
                    }
                    None => break "server stopping",
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ClientMessage>(&line) {
                            Ok(ClientMessage::Pong(_)) => missed = 0,
                            Ok(ClientMessage::Report(report)) => {
                                if event_tx
                                    .send(EngineEvent::Report { peer, report })
                                    .await
                                    .is_err()
                                {
                                    break "server stopping";
                                }
                            }
                            Err(err) => {
                                // Malformed input is dropped; the peer stays
                                // connected.
                                warn!(%peer, error = %err, "dropping unparseable line");
                            }
                        }
                    }
                    Ok(None) => break "peer closed",
                    Err(err) => {
                        warn!(%peer, error = %err, "read error");
                        break "read error";
                    }
                }
            }
            _ = probe.tick() => {
                if missed >= settings.max_missed_probes {
                    warn!(%peer, missed, "peer unresponsive, terminating");
                    break "unresponsive";
                }
                probe_seq += 1;
                missed += 1;
                let ping = ServerMessage::Ping(ProbeFrame { ping: probe_seq });
                match serialize_line(&ping) {
                    Ok(line) => {
                        if write_line(&mut write_half, &line).await.is_err() {
                            break "probe send failed";
                        }
                    }
                    Err(_) => break "probe serialize failed",
                }
            }
        }
    };

    info!(%peer, id, reason, "peer disconnected");
    let _ = event_tx.send(EngineEvent::Disconnect { id }).await;
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
