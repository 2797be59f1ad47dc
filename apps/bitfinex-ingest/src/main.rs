//! Bitfinex Ingest Binary
//!
//! Streams order books, tickers and trades from Bitfinex into Elasticsearch.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin bitfinex-ingest
//! ```
//!
//! # Environment Variables
//!
//! - `BITFINEX_WS_URL`: WebSocket endpoint (default: <wss://api2.bitfinex.com:3000/ws>)
//! - `BITFINEX_API_URL`: REST endpoint for symbol discovery (default: <https://api.bitfinex.com/v1>)
//! - `BITFINEX_SYMBOLS`: Comma-separated pairs; empty means discover all
//! - `BITFINEX_BOOK_PRECISION` / `BITFINEX_BOOK_LENGTH`: Book subscription (default: P0 / 100)
//! - `ELASTICSEARCH_URL`: Document store (default: <http://localhost:9200>)
//! - `INGEST_ORDERBOOK_INDEX` / `INGEST_TICKER_INDEX` / `INGEST_TRADES_INDEX`: Collections
//! - `INGEST_DOC_KIND`: Document kind label (default: bitfinex)
//! - `INGEST_SINK_WORKERS`: Write workers, 0 writes inline (default: 4)
//! - `INGEST_SINK_QUEUE_CAPACITY`: Per-worker queue (default: 10000)
//! - `INGEST_IDLE_TIMEOUT_SECS`: Quiet connection timeout (default: 30)
//! - `INGEST_LEARNING_TIMEOUT_SECS`: Window to bind every channel (default: 30)
//! - `INGEST_RECONNECT_DELAY_INITIAL_MS` / `INGEST_RECONNECT_DELAY_MAX_SECS`
//! - `INGEST_RECONNECT_DELAY_MULTIPLIER` / `INGEST_MAX_RECONNECT_ATTEMPTS` (0 = unlimited)
//! - `INGEST_HEALTH_PORT`: Health and metrics HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use bitfinex_ingest::infrastructure::bitfinex::{BookParams, discover_symbols};
use bitfinex_ingest::infrastructure::health::{HealthServer, HealthServerState};
use bitfinex_ingest::infrastructure::telemetry;
use bitfinex_ingest::{
    CollectionNames, DriverConfig, ElasticsearchSink, FeedStatus, FeedSupervisor,
    FeedSupervisorConfig, IngestConfig, RecordSink, ReconnectConfig, ShardedSink, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Longest wait for queued writes after the feed stops.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[allow(clippy::expect_used)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Bitfinex ingest");

    let _metrics_handle = init_metrics();

    let config = IngestConfig::from_env()?;
    log_config(&config);

    let symbols = if config.exchange.symbols.is_empty() {
        discover_symbols(&config.exchange.api_url).await?
    } else {
        config.exchange.symbols.clone()
    };
    tracing::info!(count = symbols.len(), symbols = ?symbols, "Symbols selected");

    let collections = CollectionNames::from_settings(&config.sink);

    let store = Arc::new(ElasticsearchSink::new(&config.sink.elasticsearch_url)?);
    store.ensure_indices(&collections).await?;

    let shutdown_token = CancellationToken::new();
    let status = Arc::new(FeedStatus::new());

    let (sink, sharded): (Arc<dyn RecordSink>, Option<Arc<ShardedSink>>) =
        if config.sink.workers == 0 {
            (store as Arc<dyn RecordSink>, None)
        } else {
            let sharded = Arc::new(ShardedSink::spawn(
                store,
                config.sink.workers,
                config.sink.queue_capacity,
                Some(Arc::clone(&status)),
            ));
            (Arc::clone(&sharded) as Arc<dyn RecordSink>, Some(sharded))
        };

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            symbols.len(),
            Arc::clone(&status),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let supervisor = FeedSupervisor::new(
        FeedSupervisorConfig {
            url: config.exchange.ws_url.clone(),
            idle_timeout: config.websocket.idle_timeout,
            reconnect: ReconnectConfig::from_settings(&config.websocket),
            driver: DriverConfig {
                symbols,
                book: BookParams {
                    precision: config.exchange.book_precision.clone(),
                    length: config.exchange.book_length.clone(),
                },
                collections,
                learning_timeout: config.websocket.learning_timeout,
            },
        },
        sink,
        status,
        shutdown_token.clone(),
    );

    tracing::info!("Ingest ready");

    let outcome = supervisor.run().await;
    shutdown_token.cancel();

    if let Some(sharded) = sharded
        && tokio::time::timeout(SHUTDOWN_TIMEOUT, sharded.shutdown())
            .await
            .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Queued writes not drained before timeout"
        );
    }

    let totals = outcome?;
    tracing::info!(
        frames = totals.frames_received,
        emitted = totals.records_emitted,
        dropped = totals.records_dropped,
        rejected = totals.sink_rejections,
        recoveries = totals.recoveries,
        "Ingest stopped"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        ws_url = %config.exchange.ws_url,
        elasticsearch_url = %config.sink.elasticsearch_url,
        workers = config.sink.workers,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        order_book_index = %config.sink.order_book_index,
        ticker_index = %config.sink.ticker_index,
        trades_index = %config.sink.trades_index,
        idle_timeout_secs = config.websocket.idle_timeout.as_secs(),
        "Ingest settings"
    );
}

/// Load .env from the current directory or the nearest ancestor that has one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM or SIGINT, then cancel the token.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();
}
