//! Prometheus Metrics Module
//!
//! Exposes stream metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames by kind, dropped frames by reason
//! - **Updates**: Normalized order book updates and skipped levels
//! - **Connection**: Lifecycle state, reconnects, heartbeat timeouts
//! - **Latency**: Per-frame routing time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
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
    // Frame counters
    describe_counter!(
        "bybit_stream_frames_received_total",
        "Total frames received from the exchange by kind"
    );
    describe_counter!(
        "bybit_stream_frames_dropped_total",
        "Total inbound frames dropped by reason"
    );
    describe_counter!(
        "bybit_stream_decode_errors_total",
        "Total inbound frames that failed to decode, by error kind"
    );

    // Update counters
    describe_counter!(
        "bybit_stream_updates_emitted_total",
        "Total normalized order book updates emitted"
    );
    describe_counter!(
        "bybit_stream_levels_skipped_total",
        "Total malformed price levels skipped"
    );

    // Connection
    describe_gauge!(
        "bybit_stream_connection_state",
        "Connection state (0=disconnected, 1=connecting, 2=subscribing, 3=live, 4=closing)"
    );
    describe_counter!(
        "bybit_stream_reconnects_total",
        "Total reconnection attempts scheduled"
    );
    describe_counter!(
        "bybit_stream_heartbeat_timeouts_total",
        "Total connections dropped for a missing pong"
    );
    describe_counter!(
        "bybit_stream_subscribe_acks_total",
        "Total subscribe acknowledgments by result"
    );

    // Latency histograms
    describe_histogram!(
        "bybit_stream_frame_processing_seconds",
        "Time to decode, route and normalize one inbound frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for inbound frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Server ping.
    Ping,
    /// Pong for one of our pings.
    Pong,
    /// Subscribe acknowledgment.
    SubscribeAck,
    /// Market data.
    Data,
    /// Could not be classified.
    Unknown,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::SubscribeAck => "subscribe_ack",
            Self::Data => "data",
            Self::Unknown => "unknown",
        }
    }
}

/// Record a frame received from the exchange.
pub fn record_frame_received(kind: FrameKind) {
    counter!(
        "bybit_stream_frames_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a dropped inbound frame.
pub fn record_frame_dropped(reason: &'static str) {
    counter!(
        "bybit_stream_frames_dropped_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error(kind: &'static str) {
    counter!(
        "bybit_stream_decode_errors_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record an emitted order book update.
pub fn record_update_emitted(symbol: &str) {
    counter!(
        "bybit_stream_updates_emitted_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record skipped price levels.
pub fn record_levels_skipped(count: usize) {
    counter!("bybit_stream_levels_skipped_total")
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("bybit_stream_connection_state").set(state.as_gauge());
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("bybit_stream_reconnects_total").increment(1);
}

/// Record a heartbeat timeout.
pub fn record_heartbeat_timeout() {
    counter!("bybit_stream_heartbeat_timeouts_total").increment(1);
}

/// Record a subscribe acknowledgment.
pub fn record_subscribe_ack(success: bool) {
    counter!(
        "bybit_stream_subscribe_acks_total",
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record frame processing duration.
pub fn record_processing_duration(kind: FrameKind, duration: Duration) {
    histogram!(
        "bybit_stream_frame_processing_seconds",
        "kind" => kind.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
