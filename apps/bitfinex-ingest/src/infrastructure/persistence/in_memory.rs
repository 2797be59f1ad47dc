//! In-memory record sink for testing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{RecordSink, SinkAck, SinkError};
use crate::domain::records::MarketRecord;

/// One stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Target collection.
    pub collection: String,
    /// Document kind.
    pub kind: String,
    /// Document id.
    pub id: String,
    /// Record body.
    pub record: MarketRecord,
}

/// In-memory implementation of `RecordSink`.
///
/// Keeps documents in arrival order and refuses duplicate ids, like the
/// store's create endpoint. Not for production use.
#[derive(Debug, Default)]
pub struct InMemorySink {
    records: RwLock<Vec<StoredRecord>>,
    ids: RwLock<HashSet<String>>,
    refuse_all: AtomicBool,
}

impl InMemorySink {
    /// Create a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or accept again) every subsequent create.
    pub fn set_refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::Relaxed);
    }

    /// Stored documents in arrival order.
    #[must_use]
    pub fn records(&self) -> Vec<StoredRecord> {
        self.records.read().clone()
    }

    /// Stored documents for one collection.
    #[must_use]
    pub fn in_collection(&self, collection: &str) -> Vec<StoredRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.collection == collection)
            .cloned()
            .collect()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordSink for InMemorySink {
    async fn create(
        &self,
        collection: &str,
        kind: &str,
        id: &str,
        body: &MarketRecord,
    ) -> Result<SinkAck, SinkError> {
        if self.refuse_all.load(Ordering::Relaxed) {
            return Ok(SinkAck::REJECTED);
        }

        if !self.ids.write().insert(id.to_string()) {
            return Ok(SinkAck::REJECTED);
        }

        self.records.write().push(StoredRecord {
            collection: collection.to_string(),
            kind: kind.to_string(),
            id: id.to_string(),
            record: body.clone(),
        });
        Ok(SinkAck::ACCEPTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::OrderBookEntry;

    fn record() -> MarketRecord {
        MarketRecord::OrderBook(OrderBookEntry::new("BTCUSD", 100.0, 1.0, 0.5))
    }

    #[tokio::test]
    async fn stores_in_order() {
        let sink = InMemorySink::new();
        let first = record();
        let second = record();

        sink.create("books", "bitfinex", first.id(), &first).await.unwrap();
        sink.create("books", "bitfinex", second.id(), &second).await.unwrap();

        let stored = sink.records();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].id, first.id());
        assert_eq!(stored[1].id, second.id());
        assert_eq!(sink.in_collection("books").len(), 2);
        assert!(sink.in_collection("trades").is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_is_refused() {
        let sink = InMemorySink::new();
        let entry = record();

        let first = sink.create("books", "bitfinex", entry.id(), &entry).await.unwrap();
        let second = sink.create("books", "bitfinex", entry.id(), &entry).await.unwrap();

        assert!(first.accepted);
        assert!(!second.accepted);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn refuse_all_switch() {
        let sink = InMemorySink::new();
        sink.set_refuse_all(true);
        let entry = record();

        let ack = sink.create("books", "bitfinex", entry.id(), &entry).await.unwrap();

        assert_eq!(ack, SinkAck::REJECTED);
        assert!(sink.is_empty());
    }
}
