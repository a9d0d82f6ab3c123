//! Output backends for emitting reports.

use feedgauge_types::{ClientMessage, PongFrame, ProbeFrame, StatsReport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Where the reporter sends its reports.
#[derive(Debug)]
pub enum Output {
    /// Send NDJSON reports to a feedgauge server.
    ///
    /// The connection is persistent and re-established best-effort: a failed
    /// send drops the report and reconnects on the next one.
    Tcp(String),

    /// Send reports through a channel. Useful for tests and for integrating
    /// with custom transports.
    Channel(mpsc::Sender<StatsReport>),
}

impl Output {
    /// Create a TCP output.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Output::Tcp(addr.into())
    }

    /// Create a channel output and return both the output and the receiver.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StatsReport>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Output::Channel(tx), rx)
    }
}

struct TcpConn {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

/// Runtime state behind an [`Output`], owned by the emission task.
pub(crate) enum Sink {
    Tcp {
        addr: String,
        conn: Option<TcpConn>,
    },
    Channel(mpsc::Sender<StatsReport>),
}

impl Sink {
    pub(crate) fn new(output: Output) -> Self {
        match output {
            Output::Tcp(addr) => Sink::Tcp { addr, conn: None },
            Output::Channel(tx) => Sink::Channel(tx),
        }
    }

    /// Emit one report, best effort. Failures are logged and the report is
    /// dropped; throughput reporting must never stall the instrumented feed.
    pub(crate) async fn emit(&mut self, report: &StatsReport) {
        match self {
            Sink::Channel(tx) => {
                if tx.try_send(report.clone()).is_err() {
                    debug!("report channel full or closed, dropping report");
                }
            }
            Sink::Tcp { addr, conn } => {
                if conn.is_none() {
                    match TcpStream::connect(addr.as_str()).await {
                        Ok(stream) => {
                            let (read_half, writer) = stream.into_split();
                            *conn = Some(TcpConn {
                                lines: BufReader::new(read_half).lines(),
                                writer,
                            });
                            debug!(addr = addr.as_str(), "connected");
                        }
                        Err(err) => {
                            warn!(addr = addr.as_str(), error = %err, "connect failed, dropping report");
                            return;
                        }
                    }
                }

                let line = match serde_json::to_string(report) {
                    Ok(mut line) => {
                        line.push('\n');
                        line
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to serialize report");
                        return;
                    }
                };
                let write_result = match conn.as_mut() {
                    Some(active) => write_all(&mut active.writer, &line).await,
                    None => Ok(()),
                };
                if let Err(err) = write_result {
                    warn!(addr = addr.as_str(), error = %err, "send failed, reconnecting later");
                    *conn = None;
                }
            }
        }
    }

    /// Wait for one inbound line from the server.
    ///
    /// Pends forever for non-TCP sinks and while disconnected, so this can
    /// sit in a `select!` arm unconditionally.
    pub(crate) async fn next_inbound(&mut self) -> String {
        let read = match self {
            Sink::Tcp {
                conn: Some(active), ..
            } => active.lines.next_line().await,
            _ => return std::future::pending().await,
        };
        match read {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => {
                debug!("server closed connection");
                self.disconnect();
                std::future::pending().await
            }
        }
    }

    /// Handle one inbound line: answer liveness probes, ignore snapshots.
    pub(crate) async fn handle_inbound(&mut self, line: &str) {
        let Ok(ping) = serde_json::from_str::<ProbeFrame>(line) else {
            // Anything else is a broadcast frame; producers drain and drop it.
            return;
        };
        let pong = ClientMessage::Pong(PongFrame { pong: ping.ping });
        let Ok(mut reply) = serde_json::to_string(&pong) else {
            return;
        };
        reply.push('\n');
        let failed = match self {
            Sink::Tcp {
                conn: Some(active), ..
            } => write_all(&mut active.writer, &reply).await.is_err(),
            _ => false,
        };
        if failed {
            self.disconnect();
        }
    }

    fn disconnect(&mut self) {
        if let Sink::Tcp { conn, .. } = self {
            *conn = None;
        }
    }
}

async fn write_all(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
