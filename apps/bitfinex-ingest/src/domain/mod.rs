//! Domain Layer - Channel bindings, records, and payload translation.
//!
//! This layer holds the protocol state and the pure translation logic.
//! Nothing here performs I/O.

/// Channel id to `(symbol, kind)` registry.
pub mod channel;

/// Structured market data records.
pub mod records;

/// Payload translators, one per channel kind.
pub mod translate;
