//! Port Interfaces
//!
//! Contracts for the external systems the stream driver talks to. The
//! infrastructure layer provides the adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: bidirectional text message connection to the exchange
//! - `RecordSink`: durable store accepting one record at a time

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::records::MarketRecord;

// =============================================================================
// Transport
// =============================================================================

/// Transport errors. All of them end the current connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Could not establish the connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer closed the connection or the stream ended.
    #[error("connection closed")]
    Closed,

    /// No frame arrived within the idle window.
    #[error("no frame received for {0:?}")]
    IdleTimeout(Duration),

    /// Read or write failed.
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Bidirectional text message connection.
///
/// `receive` is the only suspension point of the stream driver's loop.
#[async_trait]
pub trait Transport: Send {
    /// Send one text message.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next text message.
    async fn receive(&mut self) -> Result<String, TransportError>;

    /// Close the connection. Best effort.
    async fn close(&mut self) {}
}

// =============================================================================
// Record Sink
// =============================================================================

/// Outcome of a create call that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkAck {
    /// Whether the store accepted the document.
    pub accepted: bool,
}

impl SinkAck {
    /// The document was stored.
    pub const ACCEPTED: Self = Self { accepted: true };
    /// The store refused the document.
    pub const REJECTED: Self = Self { accepted: false };
}

/// Sink errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// The request could not be sent or the response not read.
    #[error("sink request failed: {0}")]
    Request(String),

    /// The store answered with a server error.
    #[error("sink server error {status}: {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The record could not be serialized.
    #[error("record serialization failed: {0}")]
    Serialization(String),

    /// The write queue is closed.
    #[error("sink queue closed")]
    QueueClosed,
}

/// Durable store for records.
///
/// Implementations must be safe to call concurrently; the stream driver
/// calls it sequentially, a sharded wrapper may call it from several workers.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Create one document.
    ///
    /// `accepted = false` means the store refused this record; it is not an
    /// error for the stream.
    async fn create(
        &self,
        collection: &str,
        kind: &str,
        id: &str,
        body: &MarketRecord,
    ) -> Result<SinkAck, SinkError>;
}
