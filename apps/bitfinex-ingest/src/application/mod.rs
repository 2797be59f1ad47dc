//! Application Layer - Port definitions.
//!
//! The ports describe how the stream driver reaches the outside world
//! without naming a concrete WebSocket library or store.

/// Port interfaces for external systems (transport, sink).
pub mod ports;
