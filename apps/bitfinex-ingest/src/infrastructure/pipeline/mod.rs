//! Sharded Sink Pipeline
//!
//! Moves sink writes off the driver's receive loop. Each worker owns a
//! bounded queue and writes to the wrapped sink one record at a time.
//! Records are routed by symbol, so one symbol's records are always written
//! by the same worker in receipt order. No ordering holds across symbols.
//!
//! A full queue blocks `create`, which in turn blocks the driver: back
//! pressure rather than unbounded buffering.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::application::ports::{RecordSink, SinkAck, SinkError};
use crate::domain::records::MarketRecord;
use crate::infrastructure::bitfinex::FeedStatus;
use crate::infrastructure::metrics;

/// One queued write.
#[derive(Debug)]
struct WriteJob {
    collection: String,
    kind: String,
    id: String,
    record: MarketRecord,
}

/// `RecordSink` that fans writes out to per-symbol workers.
pub struct ShardedSink {
    senders: parking_lot::RwLock<Vec<mpsc::Sender<WriteJob>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ShardedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedSink")
            .field("workers", &self.senders.read().len())
            .finish()
    }
}

impl ShardedSink {
    /// Spawn `workers` writers over `inner`, each with a queue of `capacity`.
    ///
    /// Rejections seen by workers are counted on `status` when given.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn spawn(
        inner: Arc<dyn RecordSink>,
        workers: usize,
        capacity: usize,
        status: Option<Arc<FeedStatus>>,
    ) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for shard in 0..workers {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(
                shard,
                Arc::clone(&inner),
                rx,
                status.clone(),
            )));
        }

        tracing::info!(workers, capacity, "Sink workers started");

        Self {
            senders: parking_lot::RwLock::new(senders),
            workers: parking_lot::Mutex::new(handles),
        }
    }

    /// Number of workers still accepting writes.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.senders.read().len()
    }

    /// Close the queues and wait for queued writes to finish.
    pub async fn shutdown(&self) {
        self.senders.write().clear();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Sink worker panicked");
            }
        }
        tracing::info!("Sink workers drained");
    }
}

/// Worker index for a symbol.
fn shard_for(symbol: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    symbol.hash(&mut hasher);
    let shards = u64::try_from(shards).unwrap_or(u64::MAX).max(1);
    usize::try_from(hasher.finish() % shards).unwrap_or(0)
}

async fn run_worker(
    shard: usize,
    inner: Arc<dyn RecordSink>,
    mut rx: mpsc::Receiver<WriteJob>,
    status: Option<Arc<FeedStatus>>,
) {
    while let Some(job) = rx.recv().await {
        let kind = job.record.kind();
        let started = Instant::now();
        let outcome = inner
            .create(&job.collection, &job.kind, &job.id, &job.record)
            .await;
        metrics::record_sink_write(kind, started.elapsed());

        let failure = match outcome {
            Ok(ack) if ack.accepted => continue,
            Ok(_) => "refused by store".to_string(),
            Err(e) => e.to_string(),
        };

        tracing::warn!(
            shard,
            symbol = %job.record.symbol(),
            kind = %kind,
            record_id = %job.id,
            reason = %failure,
            raw = %serde_json::to_string(&job.record).unwrap_or_default(),
            "Sink rejected record"
        );
        metrics::record_sink_rejected(kind);
        if let Some(status) = &status {
            status.increment_sink_rejections();
        }
    }
    tracing::debug!(shard, "Sink worker stopped");
}

#[async_trait]
impl RecordSink for ShardedSink {
    async fn create(
        &self,
        collection: &str,
        kind: &str,
        id: &str,
        body: &MarketRecord,
    ) -> Result<SinkAck, SinkError> {
        let sender = {
            let senders = self.senders.read();
            if senders.is_empty() {
                return Err(SinkError::QueueClosed);
            }
            senders[shard_for(body.symbol(), senders.len())].clone()
        };

        sender
            .send(WriteJob {
                collection: collection.to_string(),
                kind: kind.to_string(),
                id: id.to_string(),
                record: body.clone(),
            })
            .await
            .map_err(|_| SinkError::QueueClosed)?;

        Ok(SinkAck::ACCEPTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::OrderBookEntry;
    use crate::infrastructure::persistence::InMemorySink;

    fn entry(symbol: &str, price: f64) -> MarketRecord {
        MarketRecord::OrderBook(OrderBookEntry::new(symbol, price, 1.0, 1.0))
    }

    #[test]
    fn routing_is_stable() {
        for symbol in ["BTCUSD", "LTCUSD", "ETHUSD"] {
            assert_eq!(shard_for(symbol, 4), shard_for(symbol, 4));
            assert!(shard_for(symbol, 4) < 4);
        }
        assert_eq!(shard_for("BTCUSD", 1), 0);
    }

    #[tokio::test]
    async fn per_symbol_order_is_preserved() {
        let inner = Arc::new(InMemorySink::new());
        let sink = ShardedSink::spawn(inner.clone(), 3, 8, None);

        for i in 0..50 {
            for symbol in ["BTCUSD", "LTCUSD", "ETHUSD"] {
                let record = entry(symbol, f64::from(i));
                sink.create("books", "bitfinex", record.id(), &record)
                    .await
                    .unwrap();
            }
        }
        sink.shutdown().await;

        let stored = inner.records();
        assert_eq!(stored.len(), 150);
        for symbol in ["BTCUSD", "LTCUSD", "ETHUSD"] {
            let prices: Vec<f64> = stored
                .iter()
                .filter_map(|r| match &r.record {
                    MarketRecord::OrderBook(e) if e.symbol == symbol => Some(e.price),
                    _ => None,
                })
                .collect();
            let expected: Vec<f64> = (0..50).map(f64::from).collect();
            assert_eq!(prices, expected, "{symbol} out of order");
        }
    }

    #[tokio::test]
    async fn create_after_shutdown_fails() {
        let sink = ShardedSink::spawn(Arc::new(InMemorySink::new()), 2, 4, None);
        sink.shutdown().await;

        let record = entry("BTCUSD", 1.0);
        let err = sink
            .create("books", "bitfinex", record.id(), &record)
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::QueueClosed));
        assert_eq!(sink.worker_count(), 0);
    }

    #[tokio::test]
    async fn worker_rejections_are_counted() {
        let inner = Arc::new(InMemorySink::new());
        inner.set_refuse_all(true);
        let status = Arc::new(FeedStatus::new());
        let sink = ShardedSink::spawn(inner, 2, 4, Some(status.clone()));

        for _ in 0..3 {
            let record = entry("BTCUSD", 1.0);
            let ack = sink
                .create("books", "bitfinex", record.id(), &record)
                .await
                .unwrap();
            assert!(ack.accepted);
        }
        sink.shutdown().await;

        assert_eq!(status.snapshot().sink_rejections, 3);
    }
}
