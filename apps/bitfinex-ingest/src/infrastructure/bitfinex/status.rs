//! Feed Status
//!
//! Shared view of the stream driver for the health endpoint. The driver and
//! supervisor write; HTTP handlers read.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Stream driver lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    /// No session. Initial and terminal state.
    #[default]
    Disconnected,
    /// Sending subscribe requests.
    Subscribing,
    /// Waiting for every subscription to be acknowledged.
    Learning,
    /// All channels bound; records flow to the sink.
    Streaming,
    /// Registry went stale; about to re-learn.
    Recovering,
}

impl DriverState {
    /// State name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Subscribing => "subscribing",
            Self::Learning => "learning",
            Self::Streaming => "streaming",
            Self::Recovering => "recovering",
        }
    }
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live feed state and counters.
#[derive(Debug, Default)]
pub struct FeedStatus {
    state: parking_lot::RwLock<DriverState>,
    last_streaming_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_error: parking_lot::RwLock<Option<String>>,
    bound_channels: AtomicUsize,
    frames_received: AtomicU64,
    records_emitted: AtomicU64,
    records_dropped: AtomicU64,
    sink_rejections: AtomicU64,
    recoveries: AtomicU64,
    reconnects: AtomicU64,
}

impl FeedStatus {
    /// Create a status in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the driver state.
    pub fn set_state(&self, state: DriverState) {
        *self.state.write() = state;
        if state == DriverState::Streaming {
            *self.last_streaming_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
        }
    }

    /// Current driver state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        *self.state.read()
    }

    /// Remember the error that ended the last session.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Update the bound channel count.
    pub fn set_bound_channels(&self, count: usize) {
        self.bound_channels.store(count, Ordering::Relaxed);
    }

    /// Count one received frame.
    pub fn increment_frames(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count records handed to the sink.
    pub fn add_emitted(&self, count: u64) {
        self.records_emitted.fetch_add(count, Ordering::Relaxed);
    }

    /// Count one dropped payload.
    pub fn increment_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one sink rejection.
    pub fn increment_sink_rejections(&self) {
        self.sink_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one recovery.
    pub fn increment_recoveries(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one reconnection attempt.
    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> FeedStatusSnapshot {
        FeedStatusSnapshot {
            state: self.state(),
            last_streaming_at: *self.last_streaming_at.read(),
            last_error: self.last_error.read().clone(),
            bound_channels: self.bound_channels.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            sink_rejections: self.sink_rejections.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of `FeedStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatusSnapshot {
    /// Driver state.
    pub state: DriverState,
    /// Last time the driver entered `Streaming`.
    pub last_streaming_at: Option<DateTime<Utc>>,
    /// Error that ended the last session.
    pub last_error: Option<String>,
    /// Channels currently bound.
    pub bound_channels: usize,
    /// Frames received.
    pub frames_received: u64,
    /// Records handed to the sink.
    pub records_emitted: u64,
    /// Payloads dropped before the sink.
    pub records_dropped: u64,
    /// Records refused by the sink.
    pub sink_rejections: u64,
    /// Registry recoveries.
    pub recoveries: u64,
    /// Reconnection attempts.
    pub reconnects: u64,
}
