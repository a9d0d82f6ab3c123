//! # feedgauge-server
//!
//! Streaming feed-throughput aggregation and distribution. The server
//! ingests periodic throughput reports from feed producers over persistent
//! NDJSON-over-TCP connections, maintains bounded in-memory history per
//! feed, and pushes full-history snapshots to every connected viewer.
//!
//! Memory stays bounded under unbounded input because every series is a
//! fixed-capacity ring; state stays consistent under concurrent traffic
//! because a single engine task owns all of it; and restarts are cheap
//! because only the bounded history is persisted.

pub mod aggregate;
pub mod broadcast;
pub mod config;
pub mod persist;
pub mod ring;
pub mod server;
pub mod store;

pub use aggregate::{IngestMode, RateAggregator};
pub use broadcast::SnapshotBroadcaster;
pub use config::{ModeSetting, ServerConfig};
pub use persist::PersistenceManager;
pub use ring::RingBuffer;
pub use server::Server;
pub use store::MetricsStore;
