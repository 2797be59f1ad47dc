//! Prometheus Metrics Module
//!
//! Exposes ingest metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: frames received by classification
//! - **Records**: records emitted, dropped, and rejected by the sink
//! - **Session**: recoveries, reconnects, bound channels
//! - **Latency**: sink write duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! without an installed recorder is a no-op, so tests need no setup.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::channel::ChannelKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            #[allow(clippy::expect_used)]
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
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
        "bitfinex_ingest_frames_received_total",
        "Frames received from the exchange by classification"
    );
    describe_counter!(
        "bitfinex_ingest_records_emitted_total",
        "Records handed to the sink"
    );
    describe_counter!(
        "bitfinex_ingest_records_dropped_total",
        "Payloads dropped before reaching the sink"
    );
    describe_counter!(
        "bitfinex_ingest_sink_rejected_total",
        "Records the sink refused or failed to store"
    );
    describe_counter!(
        "bitfinex_ingest_recoveries_total",
        "Registry resets after an unknown channel id"
    );
    describe_counter!(
        "bitfinex_ingest_reconnects_total",
        "WebSocket reconnection attempts"
    );
    describe_gauge!(
        "bitfinex_ingest_bound_channels",
        "Channels currently bound in the registry"
    );
    describe_histogram!(
        "bitfinex_ingest_sink_write_seconds",
        "Duration of one sink create call"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Frame classification label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Subscription acknowledgement.
    Ack,
    /// Control event.
    Control,
    /// Channel heartbeat.
    Heartbeat,
    /// Channel data.
    Data,
    /// Unclassifiable frame.
    Malformed,
    /// Frame for an unbound channel.
    UnknownChannel,
}

impl FrameClass {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Control => "control",
            Self::Heartbeat => "heartbeat",
            Self::Data => "data",
            Self::Malformed => "malformed",
            Self::UnknownChannel => "unknown_channel",
        }
    }
}

/// Why a payload was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Translator rejected the payload shape.
    InvalidShape,
    /// Data arrived for a channel not yet bound.
    Unbound,
}

impl DropReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidShape => "invalid_shape",
            Self::Unbound => "unbound",
        }
    }
}

/// Record a received frame.
pub fn record_frame(class: FrameClass) {
    counter!(
        "bitfinex_ingest_frames_received_total",
        "class" => class.as_str()
    )
    .increment(1);
}

/// Record records handed to the sink.
pub fn record_emitted(kind: ChannelKind, count: u64) {
    counter!(
        "bitfinex_ingest_records_emitted_total",
        "kind" => kind.as_str()
    )
    .increment(count);
}

/// Record a dropped payload.
pub fn record_dropped(kind: Option<ChannelKind>, reason: DropReason) {
    counter!(
        "bitfinex_ingest_records_dropped_total",
        "kind" => kind.map_or("unknown", ChannelKind::as_str),
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a sink rejection.
pub fn record_sink_rejected(kind: ChannelKind) {
    counter!(
        "bitfinex_ingest_sink_rejected_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a registry recovery.
pub fn record_recovery() {
    counter!("bitfinex_ingest_recoveries_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("bitfinex_ingest_reconnects_total").increment(1);
}

/// Update the bound channel gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_bound_channels(count: usize) {
    gauge!("bitfinex_ingest_bound_channels").set(count as f64);
}

/// Record one sink write duration.
pub fn record_sink_write(kind: ChannelKind, duration: Duration) {
    histogram!(
        "bitfinex_ingest_sink_write_seconds",
        "kind" => kind.as_str()
    )
    .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_class_labels() {
        assert_eq!(FrameClass::Ack.as_str(), "ack");
        assert_eq!(FrameClass::Heartbeat.as_str(), "heartbeat");
        assert_eq!(FrameClass::UnknownChannel.as_str(), "unknown_channel");
    }

    #[test]
    fn drop_reason_labels() {
        assert_eq!(DropReason::InvalidShape.as_str(), "invalid_shape");
        assert_eq!(DropReason::Unbound.as_str(), "unbound");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame(FrameClass::Data);
        record_emitted(ChannelKind::Trade, 3);
        record_dropped(None, DropReason::Unbound);
        set_bound_channels(6);
    }
}
