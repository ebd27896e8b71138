//! Timestamp normalization.
//!
//! Every timestamp a mapping produces is rendered in UTC as
//! `YYYY-MM-DD HH:MM:SS.mmm`, whatever unit the exchange used on the wire.

use chrono::{DateTime, Utc};

/// `strftime` pattern for canonical timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Format a UTC instant in the canonical layout.
#[must_use]
pub fn format_utc(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Format epoch milliseconds. `None` when out of chrono's range.
#[must_use]
pub fn from_epoch_millis(millis: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(millis).map(format_utc)
}

/// Format fractional epoch seconds, rounded to the millisecond.
#[must_use]
pub fn from_epoch_seconds(seconds: f64) -> Option<String> {
    if !seconds.is_finite() {
        return None;
    }
    let millis = (seconds * 1000.0).round();
    if millis.abs() > 8.64e18 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    from_epoch_millis(millis as i64)
}
