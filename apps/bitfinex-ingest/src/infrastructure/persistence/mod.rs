//! Persistence Adapters
//!
//! In-process `RecordSink` used by tests and dry runs.

pub mod in_memory;

pub use in_memory::{InMemorySink, StoredRecord};
