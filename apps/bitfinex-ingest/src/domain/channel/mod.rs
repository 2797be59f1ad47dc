//! Channel Registry
//!
//! Maps the numeric channel ids the exchange assigns at subscribe time to
//! the `(symbol, kind)` pair that was subscribed.
//!
//! # Design
//!
//! Channel ids are only learned by observing subscription acknowledgements,
//! and they change on every reconnect. The registry is therefore owned by a
//! single stream driver, filled while learning, and cleared wholesale before
//! each fresh subscribe cycle. It never guesses a binding.

use std::collections::HashMap;

/// Numeric channel id assigned by the exchange.
pub type ChannelId = u64;

/// A currency pair symbol (e.g. `BTCUSD`).
pub type Symbol = String;

// =============================================================================
// Channel Kind
// =============================================================================

/// Kind of market data carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Order book price levels.
    OrderBook,
    /// Ticker summaries.
    Ticker,
    /// Completed trades.
    Trade,
}

impl ChannelKind {
    /// All kinds, in the order they are subscribed for each symbol.
    pub const ALL: [Self; 3] = [Self::OrderBook, Self::Ticker, Self::Trade];

    /// Channel name used on the wire.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::OrderBook => "book",
            Self::Ticker => "ticker",
            Self::Trade => "trades",
        }
    }

    /// Parse a wire channel name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "book" => Some(Self::OrderBook),
            "ticker" => Some(Self::Ticker),
            "trades" => Some(Self::Trade),
            _ => None,
        }
    }

    /// Label used for metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderBook => "order_book",
            Self::Ticker => "ticker",
            Self::Trade => "trade",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of channels expected once every kind is bound for every symbol.
#[must_use]
pub const fn expected_channels(symbol_count: usize) -> usize {
    symbol_count * ChannelKind::ALL.len()
}

// =============================================================================
// Channel Binding
// =============================================================================

/// Binding of a channel id to the subscription that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    /// Exchange-assigned channel id.
    pub channel_id: ChannelId,
    /// Subscribed symbol.
    pub symbol: Symbol,
    /// Subscribed channel kind.
    pub kind: ChannelKind,
}

impl ChannelBinding {
    /// Create a new binding.
    #[must_use]
    pub fn new(channel_id: ChannelId, symbol: impl Into<Symbol>, kind: ChannelKind) -> Self {
        Self {
            channel_id,
            symbol: symbol.into(),
            kind,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registry lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No binding has been recorded for the channel id.
    #[error("unknown channel id {0}")]
    UnknownChannel(ChannelId),
}

/// Channel id to binding map for one connection.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    bindings: HashMap<ChannelId, ChannelBinding>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a binding. Re-recording an id replaces the previous binding.
    pub fn record_binding(&mut self, channel_id: ChannelId, symbol: &str, kind: ChannelKind) {
        let binding = ChannelBinding::new(channel_id, symbol, kind);
        if let Some(previous) = self.bindings.insert(channel_id, binding)
            && (previous.symbol != symbol || previous.kind != kind)
        {
            tracing::debug!(
                chan_id = channel_id,
                old_symbol = %previous.symbol,
                old_kind = %previous.kind,
                symbol,
                %kind,
                "Channel rebound"
            );
        }
    }

    /// Resolve a channel id.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownChannel` if the id has not been bound.
    pub fn resolve(&self, channel_id: ChannelId) -> Result<&ChannelBinding, RegistryError> {
        self.bindings
            .get(&channel_id)
            .ok_or(RegistryError::UnknownChannel(channel_id))
    }

    /// Drop every binding.
    pub fn reset(&mut self) {
        self.bindings.clear();
    }

    /// True once exactly `expected_count` distinct channels are bound.
    #[must_use]
    pub fn is_complete(&self, expected_count: usize) -> bool {
        self.bindings.len() == expected_count
    }

    /// Number of bound channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Iterate over current bindings (unordered).
    pub fn bindings(&self) -> impl Iterator<Item = &ChannelBinding> {
        self.bindings.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_before_any_binding_fails() {
        let registry = ChannelRegistry::new();
        assert_eq!(
            registry.resolve(5),
            Err(RegistryError::UnknownChannel(5))
        );
    }

    #[test]
    fn record_then_resolve() {
        let mut registry = ChannelRegistry::new();
        registry.record_binding(5, "BTCUSD", ChannelKind::OrderBook);

        let binding = registry.resolve(5).unwrap();
        assert_eq!(binding.symbol, "BTCUSD");
        assert_eq!(binding.kind, ChannelKind::OrderBook);
    }

    #[test]
    fn last_write_wins() {
        let mut registry = ChannelRegistry::new();
        registry.record_binding(5, "BTCUSD", ChannelKind::OrderBook);
        registry.record_binding(5, "LTCUSD", ChannelKind::Ticker);

        assert_eq!(registry.len(), 1);
        let binding = registry.resolve(5).unwrap();
        assert_eq!(binding.symbol, "LTCUSD");
        assert_eq!(binding.kind, ChannelKind::Ticker);
    }

    #[test]
    fn completeness_requires_exact_count() {
        let symbols = ["BTCUSD", "LTCUSD"];
        let expected = expected_channels(symbols.len());
        assert_eq!(expected, 6);

        let mut registry = ChannelRegistry::new();
        let mut chan_id = 10;
        for symbol in symbols {
            for kind in ChannelKind::ALL {
                assert!(!registry.is_complete(expected));
                registry.record_binding(chan_id, symbol, kind);
                chan_id += 1;
            }
        }

        assert_eq!(registry.len(), 6);
        assert!(registry.is_complete(expected));
    }

    #[test]
    fn duplicate_acks_do_not_count_twice() {
        let mut registry = ChannelRegistry::new();
        registry.record_binding(1, "BTCUSD", ChannelKind::OrderBook);
        registry.record_binding(1, "BTCUSD", ChannelKind::OrderBook);
        registry.record_binding(2, "BTCUSD", ChannelKind::Ticker);

        assert!(!registry.is_complete(3));
    }

    #[test]
    fn reset_clears_bindings() {
        let mut registry = ChannelRegistry::new();
        registry.record_binding(1, "BTCUSD", ChannelKind::Trade);
        registry.reset();

        assert!(registry.is_empty());
        assert!(registry.resolve(1).is_err());
    }

    #[test]
    fn wire_names_round_trip() {
        for kind in ChannelKind::ALL {
            assert_eq!(ChannelKind::from_wire(kind.wire_name()), Some(kind));
        }
        assert_eq!(ChannelKind::from_wire("candles"), None);
    }
}
