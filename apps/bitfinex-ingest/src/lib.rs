#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Bitfinex Ingest - Channel Demultiplexer and Archiver
//!
//! Maintains one WebSocket connection to the Bitfinex public feed, subscribes
//! to the order book, ticker and trades channels of every configured symbol,
//! learns the channel ids the exchange assigns, and writes every translated
//! record to a document store.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Protocol state and pure translation
//!   - `channel`: channel id registry
//!   - `records`: order book entries, ticker snapshots, completed trades
//!   - `translate`: payload to record translation
//!
//! - **Application**: Port definitions
//!   - `ports`: `Transport` and `RecordSink`
//!
//! - **Infrastructure**: Adapters and process plumbing
//!   - `bitfinex`: frame codec, WebSocket transport, stream driver, supervisor
//!   - `elasticsearch` / `persistence`: record sinks
//!   - `pipeline`: sharded background writes
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                  ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! Bitfinex WS ───► │ classify     │──►│ translate   │──►│ RecordSink   │──► Elasticsearch
//!                  │ (+ registry) │   │             │   │ (sharded)    │
//!                  └──────────────┘   └─────────────┘   └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Channel bindings, records, translation.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::channel::{
    ChannelBinding, ChannelId, ChannelKind, ChannelRegistry, RegistryError, expected_channels,
};
pub use domain::records::{CompletedTrade, MarketRecord, OrderBookEntry, Side, TickerSnapshot};
pub use domain::translate::{Payload, TranslateError, translate};

// Ports
pub use application::ports::{RecordSink, SinkAck, SinkError, Transport, TransportError};

// Exchange adapter
pub use infrastructure::bitfinex::{
    BookParams, Classified, ClassifyError, CollectionNames, DriverConfig, DriverError,
    DriverState, DriverSummary, FeedStatus, FeedSupervisor, FeedSupervisorConfig, Frame,
    JsonCodec, ReconnectConfig, StreamDriver, SubscribeRequest, classify,
};

// Configuration
pub use infrastructure::config::{ConfigError, IngestConfig};

// Sinks
pub use infrastructure::elasticsearch::ElasticsearchSink;
pub use infrastructure::persistence::{InMemorySink, StoredRecord};
pub use infrastructure::pipeline::ShardedSink;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
