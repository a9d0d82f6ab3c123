//! Timestamp formatting shared by the server and SDK.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Format an epoch-milliseconds timestamp as ISO-8601 with millisecond
/// precision (`2024-01-01T00:00:00.000Z`).
///
/// Out-of-range inputs fall back to the current time rather than failing:
/// a producer clock anomaly should not drop the sample it annotates.
pub fn iso_from_millis(epoch_ms: i64) -> String {
    let instant = Utc
        .timestamp_millis_opt(epoch_ms)
        .single()
        .unwrap_or_else(Utc::now);
    to_iso(&instant)
}

/// Format the current time as ISO-8601 with millisecond precision.
pub fn iso_now() -> String {
    to_iso(&Utc::now())
}

fn to_iso(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}
