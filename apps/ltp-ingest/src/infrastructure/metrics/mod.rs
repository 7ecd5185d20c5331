//! Prometheus Metrics Module
//!
//! Exposes ingestion metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ticks**: ticks received from the stream and ticks lost to channel lag
//! - **Writes**: price point writes by path, write failures, unresolved observations
//! - **Transport**: fetch failures, reconnects, running flag, subscribed instruments
//! - **Latency**: flush duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::TransportKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe all metrics.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
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
    // Ticks
    describe_counter!(
        "ltp_ticks_received_total",
        "Total price ticks received from the stream"
    );
    describe_counter!(
        "ltp_ticks_dropped_total",
        "Total ticks overwritten in the tick channel before buffering"
    );

    // Writes
    describe_counter!(
        "ltp_price_writes_total",
        "Total price point writes by path (update, insert, upsert)"
    );
    describe_counter!(
        "ltp_price_write_failures_total",
        "Total failed price point writes"
    );
    describe_counter!(
        "ltp_unresolved_observations_total",
        "Observations dropped because the symbol could not be resolved"
    );

    // Transport
    describe_counter!(
        "ltp_fetch_failures_total",
        "Failed broker fetch or subscribe calls by reason"
    );
    describe_counter!(
        "ltp_reconnects_total",
        "Total stream reconnection attempts"
    );
    describe_gauge!(
        "ltp_transport_running",
        "1 while the active transport is running"
    );
    describe_gauge!(
        "ltp_subscribed_instruments",
        "Number of instruments tracked by the active transport"
    );

    // Latency
    describe_histogram!(
        "ltp_flush_duration_seconds",
        "Time to persist one drained tick buffer"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Which store call persisted a price point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePath {
    /// Update-only write of a row known to exist.
    Update,
    /// First write of the day.
    Insert,
    /// Insert-or-update fallback.
    Upsert,
}

impl WritePath {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Insert => "insert",
            Self::Upsert => "upsert",
        }
    }
}

/// Record ticks received from the stream.
pub fn record_ticks_received(count: u64) {
    counter!("ltp_ticks_received_total").increment(count);
}

/// Record ticks lost to channel lag.
pub fn record_ticks_dropped(count: u64) {
    counter!("ltp_ticks_dropped_total").increment(count);
}

/// Record a successful price point write.
pub fn record_price_write(path: WritePath) {
    counter!("ltp_price_writes_total", "path" => path.as_str()).increment(1);
}

/// Record a failed price point write.
pub fn record_price_write_failure() {
    counter!("ltp_price_write_failures_total").increment(1);
}

/// Record an observation dropped for lack of a symbol.
pub fn record_unresolved_observation() {
    counter!("ltp_unresolved_observations_total").increment(1);
}

/// Record a failed broker call.
pub fn record_fetch_failure(reason: &'static str) {
    counter!("ltp_fetch_failures_total", "reason" => reason).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("ltp_reconnects_total").increment(1);
}

/// Update the running flag of a transport.
pub fn set_transport_running(kind: TransportKind, running: bool) {
    gauge!("ltp_transport_running", "transport" => kind.as_str())
        .set(if running { 1.0 } else { 0.0 });
}

/// Update the number of tracked instruments.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribed_instruments(kind: TransportKind, count: usize) {
    gauge!("ltp_subscribed_instruments", "transport" => kind.as_str()).set(count as f64);
}

/// Record how long a flush took.
pub fn record_flush_duration(duration: Duration) {
    histogram!("ltp_flush_duration_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_path_as_str() {
        assert_eq!(WritePath::Update.as_str(), "update");
        assert_eq!(WritePath::Insert.as_str(), "insert");
        assert_eq!(WritePath::Upsert.as_str(), "upsert");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_ticks_received(3);
        record_price_write(WritePath::Update);
        set_transport_running(TransportKind::Polling, true);
        record_flush_duration(Duration::from_millis(5));
    }
}
