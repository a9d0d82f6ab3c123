//! # feedgauge-sdk
//!
//! Instrumentation SDK for feed producers. Register each (exchange, channel)
//! feed, record traffic as it flows, and a background task periodically
//! computes throughput rates and emits [`feedgauge_types::StatsReport`]
//! lines to a feedgauge server over a persistent NDJSON connection.
//!
//! Reporting is best effort by construction: a slow or absent server drops
//! reports, never blocks the instrumented feed.
//!
//! ## Example
//!
//! ```rust,no_run
//! use feedgauge_sdk::{Output, Reporter};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let reporter = Reporter::builder()
//!     .output(Output::tcp("localhost:3001"))
//!     .interval(Duration::from_secs(15))
//!     .build();
//!
//! let trades = reporter.register("okx", "trade").unwrap();
//! let running = reporter.start();
//!
//! trades.record(512); // one 512-byte message
//! # running.stop();
//! # }
//! ```

mod output;
mod reporter;
mod state;

pub use output::Output;
pub use reporter::{FeedHandle, Reporter, ReporterBuilder, ReporterHandle};
pub use state::{FeedCounters, ReporterState};
