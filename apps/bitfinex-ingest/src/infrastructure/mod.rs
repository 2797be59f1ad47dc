//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process
//! plumbing around them.

/// Bitfinex WebSocket adapter: codec, transport, stream driver, supervisor.
pub mod bitfinex;

/// Environment configuration.
pub mod config;

/// Elasticsearch record sink.
pub mod elasticsearch;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// In-memory record sink.
pub mod persistence;

/// Sharded background writer in front of a sink.
pub mod pipeline;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
