//! Elasticsearch Sink
//!
//! `RecordSink` over the document store's REST API.
//!
//! # Endpoints
//!
//! - `PUT /{index}` creates an index with explicit mappings
//! - `PUT /{index}/_create/{id}` creates one document
//!
//! # Create Semantics
//!
//! | Response          | Outcome                         |
//! |-------------------|---------------------------------|
//! | 200, 201          | accepted                        |
//! | 400, 409          | `accepted = false`              |
//! | other / transport | `SinkError`                     |
//!
//! Typed endpoints are gone from the store, so the document kind travels
//! as a `doc_type` field in the body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use crate::application::ports::{RecordSink, SinkAck, SinkError};
use crate::domain::channel::ChannelKind;
use crate::domain::records::MarketRecord;
use crate::infrastructure::bitfinex::CollectionNames;

/// Default request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body kept in errors and logs.
const BODY_EXCERPT_LEN: usize = 512;

/// Elasticsearch document sink.
#[derive(Debug, Clone)]
pub struct ElasticsearchSink {
    client: Client,
    base_url: String,
}

impl ElasticsearchSink {
    /// Create a sink for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Request` if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SinkError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create the three collections with explicit mappings.
    ///
    /// An index that already exists counts as success.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the store is unreachable or refuses an index.
    pub async fn ensure_indices(&self, collections: &CollectionNames) -> Result<(), SinkError> {
        for kind in ChannelKind::ALL {
            let index = collections.for_kind(kind);
            self.ensure_index(index, &mappings_for(kind)).await?;
        }
        Ok(())
    }

    async fn ensure_index(&self, index: &str, mappings: &Value) -> Result<(), SinkError> {
        let url = format!("{}/{index}", self.base_url);
        let response = self
            .client
            .put(&url)
            .json(&json!({ "mappings": mappings }))
            .send()
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(index = %index, "Index created");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            tracing::debug!(index = %index, "Index already exists");
            return Ok(());
        }

        Err(SinkError::Server {
            status: status.as_u16(),
            body: excerpt(body),
        })
    }
}

#[async_trait]
impl RecordSink for ElasticsearchSink {
    async fn create(
        &self,
        collection: &str,
        kind: &str,
        id: &str,
        body: &MarketRecord,
    ) -> Result<SinkAck, SinkError> {
        let mut document =
            serde_json::to_value(body).map_err(|e| SinkError::Serialization(e.to_string()))?;
        if let Value::Object(map) = &mut document {
            map.insert("doc_type".to_string(), Value::String(kind.to_string()));
        }

        let url = format!("{}/{collection}/_create/{id}", self.base_url);
        let response = self
            .client
            .put(&url)
            .json(&document)
            .send()
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(SinkAck::ACCEPTED),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT => {
                let body = response.text().await.unwrap_or_default();
                tracing::debug!(
                    collection = %collection,
                    id = %id,
                    status = status.as_u16(),
                    body = %excerpt(body),
                    "Document refused"
                );
                Ok(SinkAck::REJECTED)
            }
            _ => Err(SinkError::Server {
                status: status.as_u16(),
                body: excerpt(response.text().await.unwrap_or_default()),
            }),
        }
    }
}

fn excerpt(mut body: String) -> String {
    if body.len() > BODY_EXCERPT_LEN {
        let mut end = BODY_EXCERPT_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

/// Field mappings for one collection.
#[must_use]
pub fn mappings_for(kind: ChannelKind) -> Value {
    let common = |extra: Value| {
        let mut properties = json!({
            "uuid": { "type": "keyword" },
            "date": { "type": "date" },
            "currency_pair": { "type": "keyword" },
            "doc_type": { "type": "keyword" },
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut properties, extra) {
            base.extend(extra);
        }
        json!({ "properties": properties })
    };

    match kind {
        ChannelKind::OrderBook => common(json!({
            "price": { "type": "double" },
            "count": { "type": "double" },
            "volume": { "type": "double" },
            "absolute_volume": { "type": "double" },
            "order_type": { "type": "keyword" },
        })),
        ChannelKind::Ticker => common(json!({
            "bid": { "type": "double" },
            "bid_volume": { "type": "double" },
            "ask": { "type": "double" },
            "ask_volume": { "type": "double" },
            "daily_change": { "type": "double" },
            "daily_delta": { "type": "double" },
            "last_price": { "type": "double" },
            "volume": { "type": "double" },
            "high": { "type": "double" },
            "low": { "type": "double" },
            "timestamp": { "type": "keyword" },
        })),
        ChannelKind::Trade => common(json!({
            "sequence_id": { "type": "keyword" },
            "timestamp": { "type": "keyword" },
            "price": { "type": "double" },
            "volume": { "type": "double" },
            "absolute_volume": { "type": "double" },
            "order_type": { "type": "keyword" },
        })),
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::domain::records::{CompletedTrade, OrderBookEntry};

    fn trade() -> MarketRecord {
        MarketRecord::Trade(CompletedTrade::new("BTCUSD", None, None, 400.0, -1.5))
    }

    #[tokio::test]
    async fn created_document_is_accepted() {
        let server = MockServer::start().await;
        let record = trade();
        Mock::given(method("PUT"))
            .and(path(format!("/live_crypto_trades/_create/{}", record.id())))
            .and(body_partial_json(json!({
                "doc_type": "bitfinex",
                "currency_pair": "BTCUSD",
                "order_type": "ASK",
                "absolute_volume": 1.5,
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"result": "created"})))
            .expect(1)
            .mount(&server)
            .await;

        let sink = ElasticsearchSink::new(&server.uri()).unwrap();
        let ack = sink
            .create("live_crypto_trades", "bitfinex", record.id(), &record)
            .await
            .unwrap();

        assert!(ack.accepted);
    }

    #[tokio::test]
    async fn conflict_is_refused_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_string("version_conflict_engine_exception"))
            .mount(&server)
            .await;

        let sink = ElasticsearchSink::new(&server.uri()).unwrap();
        let record = trade();
        let ack = sink
            .create("live_crypto_trades", "bitfinex", record.id(), &record)
            .await
            .unwrap();

        assert_eq!(ack, SinkAck::REJECTED);
    }

    #[tokio::test]
    async fn server_error_is_sink_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let sink = ElasticsearchSink::new(&server.uri()).unwrap();
        let record = MarketRecord::OrderBook(OrderBookEntry::new("BTCUSD", 1.0, 1.0, 1.0));
        let err = sink
            .create("live_crypto_orderbooks", "bitfinex", record.id(), &record)
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::Server { status: 503, .. }));
    }

    #[tokio::test]
    async fn unreachable_store_is_request_error() {
        let sink = ElasticsearchSink::new("http://127.0.0.1:1").unwrap();
        let record = trade();
        let err = sink
            .create("live_crypto_trades", "bitfinex", record.id(), &record)
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::Request(_)));
    }

    #[tokio::test]
    async fn ensure_indices_creates_all_three() {
        let server = MockServer::start().await;
        for index in ["live_crypto_orderbooks", "live_crypto_tickers", "live_crypto_trades"] {
            Mock::given(method("PUT"))
                .and(path(format!("/{index}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
                .expect(1)
                .mount(&server)
                .await;
        }

        let sink = ElasticsearchSink::new(&server.uri()).unwrap();
        sink.ensure_indices(&CollectionNames::default()).await.unwrap();
    }

    #[tokio::test]
    async fn existing_index_is_fine() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"type": "resource_already_exists_exception"},
                "status": 400
            })))
            .mount(&server)
            .await;

        let sink = ElasticsearchSink::new(&server.uri()).unwrap();
        sink.ensure_indices(&CollectionNames::default()).await.unwrap();
    }

    #[tokio::test]
    async fn refused_index_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let sink = ElasticsearchSink::new(&server.uri()).unwrap();
        let err = sink
            .ensure_indices(&CollectionNames::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::Server { status: 403, .. }));
    }

    #[test]
    fn mappings_cover_stored_fields() {
        let book = mappings_for(ChannelKind::OrderBook);
        assert_eq!(book["properties"]["order_type"]["type"], "keyword");
        assert_eq!(book["properties"]["absolute_volume"]["type"], "double");
        assert_eq!(book["properties"]["uuid"]["type"], "keyword");

        let ticker = mappings_for(ChannelKind::Ticker);
        assert_eq!(ticker["properties"]["daily_delta"]["type"], "double");

        let trades = mappings_for(ChannelKind::Trade);
        assert_eq!(trades["properties"]["sequence_id"]["type"], "keyword");
        assert_eq!(trades["properties"]["date"]["type"], "date");
    }

    #[test]
    fn excerpt_truncates_long_bodies() {
        assert_eq!(excerpt("short".to_string()), "short");
        assert_eq!(excerpt("x".repeat(2_000)).len(), BODY_EXCERPT_LEN);
    }
}
