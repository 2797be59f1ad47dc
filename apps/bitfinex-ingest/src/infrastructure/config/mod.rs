//! Configuration Module
//!
//! Configuration loading for the ingest service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_API_URL, DEFAULT_ELASTICSEARCH_URL, DEFAULT_WS_URL, ExchangeSettings,
    IngestConfig, ServerSettings, SinkSettings, WebSocketSettings,
};
