//! Payload Translators
//!
//! Pure functions turning a classified data payload into records, one per
//! channel kind. Translators are total over well-formed input and reject
//! every other shape with `TranslateError::InvalidPayloadShape`; nothing is
//! silently skipped.
//!
//! # Accepted Shapes
//!
//! | Kind       | Delta                                      | Snapshot                 |
//! |------------|--------------------------------------------|--------------------------|
//! | Order book | `[price, count, amount]`                   | list of deltas           |
//! | Ticker     | 10 fields, or 10 fields + exchange timestamp | the same, wrapped once |
//! | Trades     | `[price, amount]` or `[seq, ts, price, amount]` | list of deltas      |

use serde_json::Value;

use super::channel::{ChannelBinding, ChannelKind};
use super::records::{CompletedTrade, MarketRecord, OrderBookEntry, TickerFields, TickerSnapshot};

const ORDER_BOOK_FIELDS: usize = 3;
const TICKER_FIELDS: usize = 10;
const TICKER_FIELDS_WITH_TIMESTAMP: usize = 11;
const TRADE_FIELDS_SHORT: usize = 2;
const TRADE_FIELDS_SEQUENCED: usize = 4;

/// Data content of a frame once the channel id has been stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `[chanId, [ ... ]]`: the elements of the nested list.
    Snapshot(Vec<Value>),
    /// `[chanId, a, b, ...]`: the elements after the channel id.
    Delta(Vec<Value>),
}

impl Payload {
    /// The payload as a JSON value, for diagnostics.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Snapshot(items) | Self::Delta(items) => Value::Array(items.clone()),
        }
    }

    /// Whether this is a snapshot.
    #[must_use]
    pub const fn is_snapshot(&self) -> bool {
        matches!(self, Self::Snapshot(_))
    }
}

/// Translation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    /// The payload does not match any accepted shape for its channel kind.
    #[error("invalid {kind} payload shape: {reason}")]
    InvalidPayloadShape {
        /// Channel kind the payload arrived on.
        kind: ChannelKind,
        /// What was wrong.
        reason: String,
    },
}

impl TranslateError {
    fn shape(kind: ChannelKind, reason: impl Into<String>) -> Self {
        Self::InvalidPayloadShape {
            kind,
            reason: reason.into(),
        }
    }
}

/// Translate a payload according to the channel it arrived on.
///
/// # Errors
///
/// Returns `TranslateError::InvalidPayloadShape` for any unaccepted shape.
pub fn translate(
    binding: &ChannelBinding,
    payload: &Payload,
) -> Result<Vec<MarketRecord>, TranslateError> {
    let symbol = binding.symbol.as_str();
    match binding.kind {
        ChannelKind::OrderBook => Ok(translate_order_book(payload, symbol)?
            .into_iter()
            .map(MarketRecord::OrderBook)
            .collect()),
        ChannelKind::Ticker => Ok(vec![MarketRecord::Ticker(translate_ticker(
            payload, symbol,
        )?)]),
        ChannelKind::Trade => Ok(translate_trades(payload, symbol)?
            .into_iter()
            .map(MarketRecord::Trade)
            .collect()),
    }
}

// =============================================================================
// Order Book
// =============================================================================

/// Translate an order book snapshot or delta.
///
/// # Errors
///
/// Returns `InvalidPayloadShape` if any level is not a 3-element numeric tuple.
pub fn translate_order_book(
    payload: &Payload,
    symbol: &str,
) -> Result<Vec<OrderBookEntry>, TranslateError> {
    const KIND: ChannelKind = ChannelKind::OrderBook;
    match payload {
        Payload::Snapshot(levels) => levels
            .iter()
            .enumerate()
            .map(|(index, level)| {
                let fields = as_tuple(KIND, level, index)?;
                order_book_entry(fields, symbol)
                    .map_err(|e| at_index(e, index))
            })
            .collect(),
        Payload::Delta(fields) => Ok(vec![order_book_entry(fields, symbol)?]),
    }
}

fn order_book_entry(fields: &[Value], symbol: &str) -> Result<OrderBookEntry, TranslateError> {
    const KIND: ChannelKind = ChannelKind::OrderBook;
    if fields.len() != ORDER_BOOK_FIELDS {
        return Err(TranslateError::shape(
            KIND,
            format!("expected {ORDER_BOOK_FIELDS} fields, got {}", fields.len()),
        ));
    }
    let price = coerce_f64(KIND, &fields[0], "price")?;
    let count = coerce_f64(KIND, &fields[1], "count")?;
    let volume = coerce_f64(KIND, &fields[2], "amount")?;
    Ok(OrderBookEntry::new(symbol, price, count, volume))
}

// =============================================================================
// Ticker
// =============================================================================

/// Translate a ticker update.
///
/// # Errors
///
/// Returns `InvalidPayloadShape` unless the payload has 10 numeric fields,
/// optionally followed by an exchange timestamp.
pub fn translate_ticker(payload: &Payload, symbol: &str) -> Result<TickerSnapshot, TranslateError> {
    const KIND: ChannelKind = ChannelKind::Ticker;
    let (Payload::Snapshot(fields) | Payload::Delta(fields)) = payload;

    let exchange_timestamp = match fields.len() {
        TICKER_FIELDS => None,
        TICKER_FIELDS_WITH_TIMESTAMP => Some(coerce_token(KIND, &fields[10], "timestamp")?),
        n => {
            return Err(TranslateError::shape(
                KIND,
                format!("expected {TICKER_FIELDS} or {TICKER_FIELDS_WITH_TIMESTAMP} fields, got {n}"),
            ));
        }
    };

    let ticker = TickerFields {
        bid: coerce_f64(KIND, &fields[0], "bid")?,
        bid_volume: coerce_f64(KIND, &fields[1], "bid_volume")?,
        ask: coerce_f64(KIND, &fields[2], "ask")?,
        ask_volume: coerce_f64(KIND, &fields[3], "ask_volume")?,
        daily_change: coerce_f64(KIND, &fields[4], "daily_change")?,
        daily_delta: coerce_f64(KIND, &fields[5], "daily_delta")?,
        last_price: coerce_f64(KIND, &fields[6], "last_price")?,
        volume: coerce_f64(KIND, &fields[7], "volume")?,
        high: coerce_f64(KIND, &fields[8], "high")?,
        low: coerce_f64(KIND, &fields[9], "low")?,
    };

    Ok(TickerSnapshot::new(symbol, ticker, exchange_timestamp))
}

// =============================================================================
// Trades
// =============================================================================

/// Translate a trade snapshot or a single trade delta.
///
/// # Errors
///
/// Returns `InvalidPayloadShape` if any trade tuple has a length other than
/// 2 or 4, or carries non-numeric price/amount.
pub fn translate_trades(
    payload: &Payload,
    symbol: &str,
) -> Result<Vec<CompletedTrade>, TranslateError> {
    const KIND: ChannelKind = ChannelKind::Trade;
    match payload {
        Payload::Snapshot(trades) => trades
            .iter()
            .enumerate()
            .map(|(index, trade)| {
                let fields = as_tuple(KIND, trade, index)?;
                completed_trade(fields, symbol).map_err(|e| at_index(e, index))
            })
            .collect(),
        Payload::Delta(fields) => Ok(vec![completed_trade(fields, symbol)?]),
    }
}

fn completed_trade(fields: &[Value], symbol: &str) -> Result<CompletedTrade, TranslateError> {
    const KIND: ChannelKind = ChannelKind::Trade;
    match fields.len() {
        TRADE_FIELDS_SHORT => {
            let price = coerce_f64(KIND, &fields[0], "price")?;
            let volume = coerce_f64(KIND, &fields[1], "amount")?;
            Ok(CompletedTrade::new(symbol, None, None, price, volume))
        }
        TRADE_FIELDS_SEQUENCED => {
            let sequence_id = coerce_token(KIND, &fields[0], "sequence_id")?;
            let timestamp = coerce_token(KIND, &fields[1], "timestamp")?;
            let price = coerce_f64(KIND, &fields[2], "price")?;
            let volume = coerce_f64(KIND, &fields[3], "amount")?;
            Ok(CompletedTrade::new(
                symbol,
                Some(sequence_id),
                Some(timestamp),
                price,
                volume,
            ))
        }
        n => Err(TranslateError::shape(
            KIND,
            format!("expected {TRADE_FIELDS_SHORT} or {TRADE_FIELDS_SEQUENCED} fields, got {n}"),
        )),
    }
}

// =============================================================================
// Coercion Helpers
// =============================================================================

fn as_tuple(kind: ChannelKind, value: &Value, index: usize) -> Result<&[Value], TranslateError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| TranslateError::shape(kind, format!("snapshot entry {index} is not a list")))
}

fn at_index(error: TranslateError, index: usize) -> TranslateError {
    match error {
        TranslateError::InvalidPayloadShape { kind, reason } => TranslateError::InvalidPayloadShape {
            kind,
            reason: format!("snapshot entry {index}: {reason}"),
        },
    }
}

/// Numbers and numeric strings both coerce to `f64`. NaN and infinities
/// are rejected; they would be stored as `null`.
fn coerce_f64(kind: ChannelKind, value: &Value, field: &str) -> Result<f64, TranslateError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| TranslateError::shape(kind, format!("{field} is not a finite number: {value}")))
}

/// Identifiers and timestamps are kept as opaque strings.
fn coerce_token(kind: ChannelKind, value: &Value, field: &str) -> Result<String, TranslateError> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        _ => Err(TranslateError::shape(
            kind,
            format!("{field} is not a number or string: {value}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::Side;
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    fn values(v: Value) -> Vec<Value> {
        v.as_array().cloned().unwrap()
    }

    #[test]
    fn order_book_snapshot_splits_sides() {
        let payload = Payload::Snapshot(values(json!([[100.0, 1, 0.5], [101.0, 2, -0.3]])));
        let entries = translate_order_book(&payload, "BTCUSD").unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].price, 100.0);
        assert_eq!(entries[0].side, Side::Bid);
        assert_eq!(entries[0].absolute_volume, 0.5);
        assert_eq!(entries[1].price, 101.0);
        assert_eq!(entries[1].side, Side::Ask);
        assert_eq!(entries[1].absolute_volume, 0.3);
    }

    #[test_case(1.5, Side::Bid, 1.5 ; "positive volume is bid")]
    #[test_case(-2.0, Side::Ask, 2.0 ; "negative volume is ask")]
    #[test_case(0.0, Side::Bid, 0.0 ; "zero volume is bid")]
    fn order_book_delta_side(volume: f64, side: Side, absolute: f64) {
        let payload = Payload::Delta(values(json!([250.0, 3, volume])));
        let entries = translate_order_book(&payload, "BTCUSD").unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].side, side);
        assert_eq!(entries[0].absolute_volume, absolute);
    }

    #[test]
    fn order_book_coerces_numeric_strings() {
        let payload = Payload::Delta(values(json!(["250.5", "3", "-1.25"])));
        let entries = translate_order_book(&payload, "BTCUSD").unwrap();

        assert_eq!(entries[0].price, 250.5);
        assert_eq!(entries[0].count, 3.0);
        assert_eq!(entries[0].side, Side::Ask);
    }

    #[test_case(json!([1.0, 2.0]) ; "too short")]
    #[test_case(json!([1.0, 2.0, 3.0, 4.0]) ; "too long")]
    #[test_case(json!([1.0, "x", 3.0]) ; "non numeric")]
    #[test_case(json!(["NaN", 1, 0.5]) ; "nan price")]
    #[test_case(json!([100.0, 1, "inf"]) ; "infinite volume")]
    #[test_case(json!([100.0, 1, "-inf"]) ; "negative infinite volume")]
    fn order_book_rejects_bad_delta(fields: Value) {
        let payload = Payload::Delta(values(fields));
        let err = translate_order_book(&payload, "BTCUSD").unwrap_err();
        assert!(matches!(
            err,
            TranslateError::InvalidPayloadShape {
                kind: ChannelKind::OrderBook,
                ..
            }
        ));
    }

    #[test]
    fn order_book_snapshot_reports_bad_entry_index() {
        let payload = Payload::Snapshot(values(json!([[100.0, 1, 0.5], [101.0, 2]])));
        let err = translate_order_book(&payload, "BTCUSD").unwrap_err();
        assert!(err.to_string().contains("snapshot entry 1"));
    }

    #[test]
    fn empty_order_book_snapshot_yields_nothing() {
        let entries = translate_order_book(&Payload::Snapshot(vec![]), "BTCUSD").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn ticker_maps_fields_in_exchange_order() {
        let payload = Payload::Delta(values(json!([
            236.62, 9.0, 236.88, 7.1, -1.02, -0.0043, 236.52, 5191.36, 250.01, 220.05
        ])));
        let ticker = translate_ticker(&payload, "BTCUSD").unwrap();

        assert_eq!(ticker.bid, 236.62);
        assert_eq!(ticker.bid_volume, 9.0);
        assert_eq!(ticker.ask, 236.88);
        assert_eq!(ticker.ask_volume, 7.1);
        assert_eq!(ticker.daily_change, -1.02);
        assert_eq!(ticker.daily_delta, -0.0043);
        assert_eq!(ticker.last_price, 236.52);
        assert_eq!(ticker.volume, 5191.36);
        assert_eq!(ticker.high, 250.01);
        assert_eq!(ticker.low, 220.05);
        assert_eq!(ticker.exchange_timestamp, None);
    }

    #[test]
    fn ticker_keeps_trailing_timestamp() {
        let payload = Payload::Delta(values(json!([
            1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1_444_266_681
        ])));
        let ticker = translate_ticker(&payload, "BTCUSD").unwrap();
        assert_eq!(ticker.exchange_timestamp.as_deref(), Some("1444266681"));
    }

    #[test]
    fn ticker_snapshot_wrapper_is_unwrapped() {
        let payload = Payload::Snapshot(values(json!([1, 2, 3, 4, 5, 6, 7, 8, 9, 10])));
        let ticker = translate_ticker(&payload, "BTCUSD").unwrap();
        assert_eq!(ticker.low, 10.0);
    }

    #[test_case(9 ; "nine fields")]
    #[test_case(12 ; "twelve fields")]
    fn ticker_rejects_other_lengths(len: usize) {
        let payload = Payload::Delta(vec![json!(1.0); len]);
        assert!(translate_ticker(&payload, "BTCUSD").is_err());
    }

    #[test]
    fn trade_short_delta() {
        let payload = Payload::Delta(values(json!([400.5, -0.25])));
        let trades = translate_trades(&payload, "BTCUSD").unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Ask);
        assert_eq!(trades[0].absolute_volume, 0.25);
        assert_eq!(trades[0].sequence_id, None);
    }

    #[test]
    fn trade_sequenced_delta() {
        let payload = Payload::Delta(values(json!(["1234-BTCUSD", 1_444_266_681, 400.5, 0.75])));
        let trades = translate_trades(&payload, "BTCUSD").unwrap();

        assert_eq!(trades[0].sequence_id.as_deref(), Some("1234-BTCUSD"));
        assert_eq!(trades[0].exchange_timestamp.as_deref(), Some("1444266681"));
        assert_eq!(trades[0].side, Side::Bid);
    }

    #[test_case("NaN", "1.0" ; "nan price")]
    #[test_case("400.5", "-inf" ; "infinite amount")]
    fn trade_rejects_non_finite_numbers(price: &str, amount: &str) {
        let payload = Payload::Delta(vec![json!(price), json!(amount)]);
        assert!(translate_trades(&payload, "BTCUSD").is_err());
    }

    #[test]
    fn trade_snapshot_translates_each_item() {
        let payload = Payload::Snapshot(values(json!([
            [5001, 1_444_266_681, 400.0, 1.0],
            [5002, 1_444_266_682, 401.0, -2.0],
            [402.0, 0.5]
        ])));
        let trades = translate_trades(&payload, "LTCUSD").unwrap();

        assert_eq!(trades.len(), 3);
        assert_eq!(trades[1].side, Side::Ask);
        assert!(trades.iter().all(|t| t.symbol == "LTCUSD"));
    }

    #[test_case(1 ; "one field")]
    #[test_case(3 ; "three fields")]
    #[test_case(5 ; "five fields")]
    #[test_case(6 ; "six fields")]
    fn trade_rejects_unexpected_length(len: usize) {
        let payload = Payload::Delta(vec![json!(1.0); len]);
        let err = translate_trades(&payload, "BTCUSD").unwrap_err();
        assert!(matches!(
            err,
            TranslateError::InvalidPayloadShape {
                kind: ChannelKind::Trade,
                ..
            }
        ));
    }

    #[test]
    fn translate_dispatches_on_binding_kind() {
        let binding = ChannelBinding::new(7, "BTCUSD", ChannelKind::Trade);
        let records = translate(&binding, &Payload::Delta(values(json!([1.0, 2.0])))).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), ChannelKind::Trade);
        assert_eq!(records[0].symbol(), "BTCUSD");
    }

    proptest! {
        #[test]
        fn side_follows_volume_sign(volume in -1.0e9f64..1.0e9f64) {
            let payload = Payload::Delta(vec![json!(100.0), json!(1.0), json!(volume)]);
            let entries = translate_order_book(&payload, "BTCUSD").unwrap();

            let expected = if volume < 0.0 { Side::Ask } else { Side::Bid };
            prop_assert_eq!(entries[0].side, expected);
            prop_assert_eq!(entries[0].absolute_volume, volume.abs());
        }

        #[test]
        fn trade_side_follows_amount_sign(amount in -1.0e6f64..1.0e6f64) {
            let payload = Payload::Delta(vec![json!(100.0), json!(amount)]);
            let trades = translate_trades(&payload, "BTCUSD").unwrap();

            prop_assert_eq!(trades[0].side == Side::Ask, amount < 0.0);
        }
    }
}
