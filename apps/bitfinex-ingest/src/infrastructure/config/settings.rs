//! Ingest Configuration Settings
//!
//! Configuration types for the ingest service, loaded from environment variables.
//! Numeric values that fail to parse fall back to their defaults; URLs must parse.

use std::time::Duration;

use reqwest::Url;

/// Default exchange WebSocket endpoint.
pub const DEFAULT_WS_URL: &str = "wss://api2.bitfinex.com:3000/ws";

/// Default exchange REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.bitfinex.com/v1";

/// Default document store endpoint.
pub const DEFAULT_ELASTICSEARCH_URL: &str = "http://localhost:9200";

/// Exchange connection settings.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    /// WebSocket URL.
    pub ws_url: String,
    /// REST URL used for symbol discovery.
    pub api_url: String,
    /// Configured symbols. Empty means discover at startup.
    pub symbols: Vec<String>,
    /// Book precision sent with book subscriptions.
    pub book_precision: String,
    /// Book length sent with book subscriptions.
    pub book_length: String,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            symbols: Vec::new(),
            book_precision: "P0".to_string(),
            book_length: "100".to_string(),
        }
    }
}

/// Document store settings.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    /// Store base URL.
    pub elasticsearch_url: String,
    /// Collection for order book entries.
    pub order_book_index: String,
    /// Collection for ticker snapshots.
    pub ticker_index: String,
    /// Collection for trades.
    pub trades_index: String,
    /// Document kind label.
    pub doc_kind: String,
    /// Write workers (0 = write inline from the driver).
    pub workers: usize,
    /// Per-worker queue capacity.
    pub queue_capacity: usize,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            elasticsearch_url: DEFAULT_ELASTICSEARCH_URL.to_string(),
            order_book_index: "live_crypto_orderbooks".to_string(),
            ticker_index: "live_crypto_tickers".to_string(),
            trades_index: "live_crypto_trades".to_string(),
            doc_kind: "bitfinex".to_string(),
            workers: 4,
            queue_capacity: 10_000,
        }
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// No frame within this window counts as a transport failure.
    pub idle_timeout: Duration,
    /// Window for the exchange to acknowledge every subscription.
    pub learning_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            learning_timeout: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete ingest configuration.
#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    /// Exchange connection settings.
    pub exchange: ExchangeSettings,
    /// Document store settings.
    pub sink: SinkSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl IngestConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL does not parse or a name is empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL does not parse or a name is empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let exchange = ExchangeSettings {
            ws_url: parse_url(&lookup, "BITFINEX_WS_URL", &defaults.exchange.ws_url)?,
            api_url: parse_url(&lookup, "BITFINEX_API_URL", &defaults.exchange.api_url)?,
            symbols: lookup("BITFINEX_SYMBOLS")
                .map(|v| parse_symbols(&v))
                .unwrap_or_default(),
            book_precision: parse_name(
                &lookup,
                "BITFINEX_BOOK_PRECISION",
                &defaults.exchange.book_precision,
            )?,
            book_length: parse_name(&lookup, "BITFINEX_BOOK_LENGTH", &defaults.exchange.book_length)?,
        };

        let sink = SinkSettings {
            elasticsearch_url: parse_url(
                &lookup,
                "ELASTICSEARCH_URL",
                &defaults.sink.elasticsearch_url,
            )?,
            order_book_index: parse_name(
                &lookup,
                "INGEST_ORDERBOOK_INDEX",
                &defaults.sink.order_book_index,
            )?,
            ticker_index: parse_name(&lookup, "INGEST_TICKER_INDEX", &defaults.sink.ticker_index)?,
            trades_index: parse_name(&lookup, "INGEST_TRADES_INDEX", &defaults.sink.trades_index)?,
            doc_kind: parse_name(&lookup, "INGEST_DOC_KIND", &defaults.sink.doc_kind)?,
            workers: parse_or(&lookup, "INGEST_SINK_WORKERS", defaults.sink.workers),
            queue_capacity: parse_or(
                &lookup,
                "INGEST_SINK_QUEUE_CAPACITY",
                defaults.sink.queue_capacity,
            )
            .max(1),
        };

        let websocket = WebSocketSettings {
            idle_timeout: parse_duration_secs(
                &lookup,
                "INGEST_IDLE_TIMEOUT_SECS",
                defaults.websocket.idle_timeout,
            ),
            learning_timeout: parse_duration_secs(
                &lookup,
                "INGEST_LEARNING_TIMEOUT_SECS",
                defaults.websocket.learning_timeout,
            )
            .max(Duration::from_secs(1)),
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "INGEST_RECONNECT_DELAY_INITIAL_MS",
                defaults.websocket.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "INGEST_RECONNECT_DELAY_MAX_SECS",
                defaults.websocket.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "INGEST_RECONNECT_DELAY_MULTIPLIER",
                defaults.websocket.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "INGEST_MAX_RECONNECT_ATTEMPTS",
                defaults.websocket.max_reconnect_attempts,
            ),
        };

        let server = ServerSettings {
            health_port: parse_or(&lookup, "INGEST_HEALTH_PORT", defaults.server.health_port),
        };

        Ok(Self {
            exchange,
            sink,
            websocket,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// URL does not parse.
    #[error("invalid URL in {key} ({value}): {reason}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// Parser message.
        reason: String,
    },
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

/// Split a comma-separated symbol list, trimming and upper-casing.
fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect()
}

fn parse_url<F>(lookup: &F, key: &str, default: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).unwrap_or_else(|| default.to_string());
    let value = value.trim().trim_end_matches('/').to_string();
    Url::parse(&value).map_err(|e| ConfigError::InvalidUrl {
        key: key.to_string(),
        value: value.clone(),
        reason: e.to_string(),
    })?;
    Ok(value)
}

fn parse_name<F>(lookup: &F, key: &str, default: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
        Some(value) => Ok(value.trim().to_string()),
        None => Ok(default.to_string()),
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
