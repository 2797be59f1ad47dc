//! Bitfinex WebSocket Message Types
//!
//! Wire format types for the v1 public WebSocket API.
//!
//! # Message Types
//!
//! ## Control Messages (JSON objects)
//! - `info`: sent once on connect with the API version
//! - `subscribed`: subscription acknowledgement carrying the channel id
//! - `error`: subscription failure
//!
//! ## Channel Messages (JSON arrays)
//! - `[chanId, "hb"]`: heartbeat
//! - `[chanId, [ ... ]]`: snapshot
//! - `[chanId, f1, f2, ...]`: delta

use serde::{Deserialize, Serialize};

use crate::domain::channel::{ChannelId, ChannelKind};

/// Literal second element of a heartbeat frame.
pub const HEARTBEAT_MARKER: &str = "hb";

/// Event name of a subscription acknowledgement.
pub const EVENT_SUBSCRIBED: &str = "subscribed";

/// Error code for a subscribe request naming a channel that is already subscribed.
pub const ERROR_DUPLICATE_SUBSCRIPTION: i64 = 10301;

// =============================================================================
// Outbound
// =============================================================================

/// Book subscription parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookParams {
    /// Price aggregation level (`P0`..`P3`, or `R0` for raw).
    pub precision: String,
    /// Number of levels per side.
    pub length: String,
}

impl Default for BookParams {
    fn default() -> Self {
        Self {
            precision: "P0".to_string(),
            length: "100".to_string(),
        }
    }
}

/// Subscribe request for one `(symbol, channel)` pair.
///
/// # Wire Format (JSON)
/// ```json
/// {"event": "subscribe", "channel": "book", "pair": "BTCUSD", "prec": "P0", "len": "100"}
/// {"event": "subscribe", "channel": "ticker", "pair": "BTCUSD"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Always "subscribe".
    pub event: String,
    /// Channel name.
    pub channel: String,
    /// Currency pair.
    pub pair: String,
    /// Book precision (book channel only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prec: Option<String>,
    /// Book length (book channel only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<String>,
}

impl SubscribeRequest {
    /// Build the subscribe request for a symbol and kind.
    #[must_use]
    pub fn new(symbol: &str, kind: ChannelKind, book: &BookParams) -> Self {
        let (prec, len) = match kind {
            ChannelKind::OrderBook => (Some(book.precision.clone()), Some(book.length.clone())),
            ChannelKind::Ticker | ChannelKind::Trade => (None, None),
        };
        Self {
            event: "subscribe".to_string(),
            channel: kind.wire_name().to_string(),
            pair: symbol.to_string(),
            prec,
            len,
        }
    }

    /// All requests for a symbol list, three per symbol.
    #[must_use]
    pub fn for_symbols(symbols: &[String], book: &BookParams) -> Vec<Self> {
        symbols
            .iter()
            .flat_map(|symbol| {
                ChannelKind::ALL
                    .iter()
                    .map(move |kind| Self::new(symbol, *kind, book))
            })
            .collect()
    }
}

/// Unsubscribe request for one channel id.
///
/// # Wire Format (JSON)
/// ```json
/// {"event": "unsubscribe", "chanId": 5}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    /// Always "unsubscribe".
    pub event: String,
    /// Channel to drop.
    #[serde(rename = "chanId")]
    pub chan_id: ChannelId,
}

impl UnsubscribeRequest {
    /// Build the request for a channel id.
    #[must_use]
    pub fn new(chan_id: ChannelId) -> Self {
        Self {
            event: "unsubscribe".to_string(),
            chan_id,
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Subscription acknowledgement.
///
/// # Wire Format (JSON)
/// ```json
/// {"event": "subscribed", "channel": "book", "chanId": 5, "pair": "BTCUSD", "prec": "P0", "len": "100"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedEvent {
    /// Always "subscribed".
    pub event: String,
    /// Channel name.
    pub channel: String,
    /// Assigned channel id.
    #[serde(rename = "chanId")]
    pub chan_id: ChannelId,
    /// Currency pair.
    pub pair: String,
}

/// Error event, e.g. a rejected subscription.
///
/// # Wire Format (JSON)
/// ```json
/// {"event": "error", "msg": "subscribe: dup", "code": 10301, "channel": "book", "pair": "BTCUSD"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Always "error".
    pub event: String,
    /// Error description.
    #[serde(default)]
    pub msg: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<i64>,
    /// Channel the error refers to.
    #[serde(default)]
    pub channel: Option<String>,
    /// Pair the error refers to.
    #[serde(default)]
    pub pair: Option<String>,
}
