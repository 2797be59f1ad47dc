//! Market Data Records
//!
//! Structured records produced from exchange payloads and handed to the
//! sink. Field names on the wire match the stored document schema
//! (`uuid`, `date`, `currency_pair`, `order_type`, ...).
//!
//! Every record gets a fresh UUID and a UTC timestamp when it is built.
//! The exchange does not always supply a timestamp, so `date` is the
//! observation time, not the exchange emission time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::ChannelKind;

// =============================================================================
// Side
// =============================================================================

/// Book side or trade aggressor, derived from the sign of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Non-negative volume.
    Bid,
    /// Negative volume.
    Ask,
}

impl Side {
    /// Derive the side from a signed volume: `Ask` iff `volume < 0`.
    #[must_use]
    pub fn from_volume(volume: f64) -> Self {
        if volume < 0.0 { Self::Ask } else { Self::Bid }
    }
}

fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// Order Book Entry
// =============================================================================

/// One order book price level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    /// Unique record id.
    #[serde(rename = "uuid")]
    pub id: String,
    /// Observation time.
    #[serde(rename = "date")]
    pub observed_at: DateTime<Utc>,
    /// Currency pair.
    #[serde(rename = "currency_pair")]
    pub symbol: String,
    /// Price level.
    pub price: f64,
    /// Number of orders at the level.
    pub count: f64,
    /// Signed volume (negative on the ask side).
    pub volume: f64,
    /// `|volume|`.
    pub absolute_volume: f64,
    /// Side derived from the volume sign.
    #[serde(rename = "order_type")]
    pub side: Side,
}

impl OrderBookEntry {
    /// Build an entry, deriving side and absolute volume.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: f64, count: f64, volume: f64) -> Self {
        Self {
            id: new_record_id(),
            observed_at: Utc::now(),
            symbol: symbol.into(),
            price,
            count,
            volume,
            absolute_volume: volume.abs(),
            side: Side::from_volume(volume),
        }
    }
}

// =============================================================================
// Ticker Snapshot
// =============================================================================

/// Ticker fields in exchange order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickerFields {
    /// Best bid.
    pub bid: f64,
    /// Size at best bid.
    pub bid_volume: f64,
    /// Best ask.
    pub ask: f64,
    /// Size at best ask.
    pub ask_volume: f64,
    /// Absolute change over 24h.
    pub daily_change: f64,
    /// Relative change over 24h.
    pub daily_delta: f64,
    /// Last traded price.
    pub last_price: f64,
    /// 24h volume.
    pub volume: f64,
    /// 24h high.
    pub high: f64,
    /// 24h low.
    pub low: f64,
}

/// One ticker update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    /// Unique record id.
    #[serde(rename = "uuid")]
    pub id: String,
    /// Observation time.
    #[serde(rename = "date")]
    pub observed_at: DateTime<Utc>,
    /// Currency pair.
    #[serde(rename = "currency_pair")]
    pub symbol: String,
    /// Best bid.
    pub bid: f64,
    /// Size at best bid.
    pub bid_volume: f64,
    /// Best ask.
    pub ask: f64,
    /// Size at best ask.
    pub ask_volume: f64,
    /// Absolute change over 24h.
    pub daily_change: f64,
    /// Relative change over 24h.
    pub daily_delta: f64,
    /// Last traded price.
    pub last_price: f64,
    /// 24h volume.
    pub volume: f64,
    /// 24h high.
    pub high: f64,
    /// 24h low.
    pub low: f64,
    /// Exchange timestamp, when the payload carried one.
    #[serde(rename = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub exchange_timestamp: Option<String>,
}

impl TickerSnapshot {
    /// Build a snapshot from positional fields.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        fields: TickerFields,
        exchange_timestamp: Option<String>,
    ) -> Self {
        Self {
            id: new_record_id(),
            observed_at: Utc::now(),
            symbol: symbol.into(),
            bid: fields.bid,
            bid_volume: fields.bid_volume,
            ask: fields.ask,
            ask_volume: fields.ask_volume,
            daily_change: fields.daily_change,
            daily_delta: fields.daily_delta,
            last_price: fields.last_price,
            volume: fields.volume,
            high: fields.high,
            low: fields.low,
            exchange_timestamp,
        }
    }
}

// =============================================================================
// Completed Trade
// =============================================================================

/// One executed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTrade {
    /// Unique record id.
    #[serde(rename = "uuid")]
    pub id: String,
    /// Observation time.
    #[serde(rename = "date")]
    pub observed_at: DateTime<Utc>,
    /// Currency pair.
    #[serde(rename = "currency_pair")]
    pub symbol: String,
    /// Exchange sequence id (richer payload shapes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<String>,
    /// Exchange timestamp (richer payload shapes only).
    #[serde(rename = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub exchange_timestamp: Option<String>,
    /// Execution price.
    pub price: f64,
    /// Signed amount (negative = sell).
    pub volume: f64,
    /// `|volume|`.
    pub absolute_volume: f64,
    /// Side derived from the volume sign.
    #[serde(rename = "order_type")]
    pub side: Side,
}

impl CompletedTrade {
    /// Build a trade, deriving side and absolute volume.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        sequence_id: Option<String>,
        exchange_timestamp: Option<String>,
        price: f64,
        volume: f64,
    ) -> Self {
        Self {
            id: new_record_id(),
            observed_at: Utc::now(),
            symbol: symbol.into(),
            sequence_id,
            exchange_timestamp,
            price,
            volume,
            absolute_volume: volume.abs(),
            side: Side::from_volume(volume),
        }
    }
}

// =============================================================================
// Market Record
// =============================================================================

/// Any record produced by a translator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MarketRecord {
    /// Order book level.
    OrderBook(OrderBookEntry),
    /// Ticker update.
    Ticker(TickerSnapshot),
    /// Completed trade.
    Trade(CompletedTrade),
}

impl MarketRecord {
    /// Channel kind the record came from.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        match self {
            Self::OrderBook(_) => ChannelKind::OrderBook,
            Self::Ticker(_) => ChannelKind::Ticker,
            Self::Trade(_) => ChannelKind::Trade,
        }
    }

    /// Unique record id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::OrderBook(r) => &r.id,
            Self::Ticker(r) => &r.id,
            Self::Trade(r) => &r.id,
        }
    }

    /// Currency pair.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::OrderBook(r) => &r.symbol,
            Self::Ticker(r) => &r.symbol,
            Self::Trade(r) => &r.symbol,
        }
    }

    /// Observation time.
    #[must_use]
    pub const fn observed_at(&self) -> DateTime<Utc> {
        match self {
            Self::OrderBook(r) => r.observed_at,
            Self::Ticker(r) => r.observed_at,
            Self::Trade(r) => r.observed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_from_volume() {
        assert_eq!(Side::from_volume(1.5), Side::Bid);
        assert_eq!(Side::from_volume(0.0), Side::Bid);
        assert_eq!(Side::from_volume(-2.0), Side::Ask);
    }

    #[test]
    fn order_book_entry_derives_side_and_magnitude() {
        let entry = OrderBookEntry::new("BTCUSD", 101.0, 2.0, -0.3);
        assert_eq!(entry.side, Side::Ask);
        assert!((entry.absolute_volume - 0.3).abs() < f64::EPSILON);
        assert!((entry.volume + 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn records_get_unique_ids() {
        let a = OrderBookEntry::new("BTCUSD", 1.0, 1.0, 1.0);
        let b = OrderBookEntry::new("BTCUSD", 1.0, 1.0, 1.0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn order_book_entry_document_shape() {
        let entry = OrderBookEntry::new("BTCUSD", 100.0, 1.0, 0.5);
        let doc = serde_json::to_value(&entry).unwrap();

        assert_eq!(doc["currency_pair"], "BTCUSD");
        assert_eq!(doc["order_type"], "BID");
        assert_eq!(doc["absolute_volume"], 0.5);
        assert!(doc["uuid"].is_string());
        assert!(doc["date"].is_string());
    }

    #[test]
    fn trade_without_sequence_omits_optional_fields() {
        let trade = CompletedTrade::new("BTCUSD", None, None, 400.0, -1.0);
        let doc = serde_json::to_value(MarketRecord::Trade(trade)).unwrap();

        assert_eq!(doc["order_type"], "ASK");
        assert!(doc.get("sequence_id").is_none());
        assert!(doc.get("timestamp").is_none());
    }

    #[test]
    fn market_record_accessors() {
        let record = MarketRecord::Ticker(TickerSnapshot::new(
            "LTCUSD",
            TickerFields::default(),
            None,
        ));
        assert_eq!(record.kind(), ChannelKind::Ticker);
        assert_eq!(record.symbol(), "LTCUSD");
        assert!(!record.id().is_empty());
    }
}
