//! # feedgauge-types
//!
//! Wire schema for feed throughput monitoring. This crate defines the message
//! shapes exchanged between feed producers, the feedgauge server, and live
//! viewers, plus the persisted history format.
//!
//! ## Design Goals
//!
//! - **Explicit records**: every message on the wire has a typed shape;
//!   non-conforming input is rejected at the boundary, not at field access.
//! - **NDJSON framing**: each message is one JSON object per line, in both
//!   directions of a persistent TCP connection.
//! - **Stable views**: the broadcast history shape doubles as the persisted
//!   snapshot format, so a saved file hydrates directly.
//!
//! ## Example
//!
//! ```rust
//! use feedgauge_types::StatsReport;
//!
//! let line = r#"{"exchange":"okx","channel":"trade","timestamp":1700000000000,"msg_sec":120.4}"#;
//! let report: StatsReport = serde_json::from_str(line).unwrap();
//! let key = report.feed_key().unwrap();
//! assert_eq!(key.exchange, "okx");
//! assert_eq!(report.rounded_msg_rate(), 120);
//! ```

mod feed;
mod frame;
mod report;
mod signal;
mod time;

pub use feed::*;
pub use frame::*;
pub use report::*;
pub use signal::*;
pub use time::*;
