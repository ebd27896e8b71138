//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: received, accepted as records, skipped by reason
//! - **Export**: snapshot flushes, publishes, store errors, flush latency
//! - **Connection**: reconnects and the connected flag
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Without an
//! installed recorder every call here is a no-op, which keeps tests quiet.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, or return the one already installed.
///
/// # Errors
///
/// Returns [`BuildError`] if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "stream_cache_frames_received_total",
        "Total frames received from the exchange"
    );
    describe_counter!(
        "stream_cache_records_accepted_total",
        "Total canonical records accepted into the state table"
    );
    describe_counter!(
        "stream_cache_frames_skipped_total",
        "Total frames that produced no record, by reason"
    );

    describe_counter!(
        "stream_cache_flushes_total",
        "Total snapshot flushes to the state store"
    );
    describe_counter!(
        "stream_cache_publishes_total",
        "Total records published to the state store"
    );
    describe_counter!(
        "stream_cache_store_errors_total",
        "Total state store failures"
    );

    describe_counter!(
        "stream_cache_reconnects_total",
        "Total reconnection attempts"
    );
    describe_gauge!(
        "stream_cache_connected",
        "1 while the session is streaming, 0 otherwise"
    );

    describe_histogram!(
        "stream_cache_flush_seconds",
        "Time spent processing a record that triggered a snapshot flush"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a frame produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Acknowledgement, heartbeat or ping.
    Control,
    /// Data for a channel without a mapping profile.
    UnknownChannel,
    /// Understood but deliberately dropped (e.g. an open bar).
    Filtered,
    /// Payload did not fit its mapping profile.
    MappingError,
}

impl SkipReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::UnknownChannel => "unknown_channel",
            Self::Filtered => "filtered",
            Self::MappingError => "mapping_error",
        }
    }
}

/// Record a frame received from the exchange.
pub fn record_frame_received(exchange: &'static str) {
    counter!("stream_cache_frames_received_total", "exchange" => exchange).increment(1);
}

/// Record a record accepted into the state table.
pub fn record_record_accepted(exchange: &'static str, channel: &str) {
    counter!(
        "stream_cache_records_accepted_total",
        "exchange" => exchange,
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Record a frame that produced no record.
pub fn record_frame_skipped(exchange: &'static str, reason: SkipReason) {
    counter!(
        "stream_cache_frames_skipped_total",
        "exchange" => exchange,
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a snapshot flush and how long the triggering record took.
pub fn record_flush(exchange: &'static str, duration: Duration) {
    counter!("stream_cache_flushes_total", "exchange" => exchange).increment(1);
    histogram!("stream_cache_flush_seconds", "exchange" => exchange)
        .record(duration.as_secs_f64());
}

/// Record a publish.
pub fn record_publish(exchange: &'static str) {
    counter!("stream_cache_publishes_total", "exchange" => exchange).increment(1);
}

/// Record a state store failure.
pub fn record_store_error(exchange: &'static str) {
    counter!("stream_cache_store_errors_total", "exchange" => exchange).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(exchange: &'static str) {
    counter!("stream_cache_reconnects_total", "exchange" => exchange).increment(1);
}

/// Update the connected flag.
pub fn set_connected(exchange: &'static str, connected: bool) {
    gauge!("stream_cache_connected", "exchange" => exchange).set(if connected {
        1.0
    } else {
        0.0
    });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_reason_as_str() {
        assert_eq!(SkipReason::Control.as_str(), "control");
        assert_eq!(SkipReason::UnknownChannel.as_str(), "unknown_channel");
        assert_eq!(SkipReason::Filtered.as_str(), "filtered");
        assert_eq!(SkipReason::MappingError.as_str(), "mapping_error");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_frame_received("binance");
        record_record_accepted("binance", "trade");
        record_frame_skipped("binance", SkipReason::Control);
        record_flush("binance", Duration::from_millis(3));
        set_connected("binance", true);
    }
}
