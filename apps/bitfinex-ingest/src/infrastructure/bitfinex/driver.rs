//! Stream Driver
//!
//! Owns one exchange session: sends the subscribe requests, learns channel
//! ids from the acknowledgements, and pushes every data payload through
//! classification and translation into the sink.
//!
//! # State Machine
//!
//! ```text
//! Disconnected -> Subscribing -> Learning -> Streaming
//!                                   ^            |
//!                                   |   unknown channel id
//!                                   +-- Recovering
//! ```
//!
//! Per-message failures (malformed frames, bad payload shapes, sink
//! rejections) are logged and counted; the loop keeps going. A transport
//! failure ends `run` with an error, as does a re-learn the exchange refuses
//! or a Learning phase that outlives its deadline. Reconnecting is left to
//! the caller, which starts over with an empty registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::codec::{Classified, ClassifyError, JsonCodec, classify};
use super::messages::{
    BookParams, ERROR_DUPLICATE_SUBSCRIPTION, ErrorEvent, SubscribeRequest, UnsubscribeRequest,
};
use super::status::{DriverState, FeedStatus};
use crate::application::ports::{RecordSink, Transport, TransportError};
use crate::domain::channel::{ChannelBinding, ChannelId, ChannelKind, ChannelRegistry, expected_channels};
use crate::domain::records::MarketRecord;
use crate::domain::translate::{Payload, translate};
use crate::infrastructure::config::SinkSettings;
use crate::infrastructure::metrics::{self, DropReason, FrameClass};

// =============================================================================
// Configuration
// =============================================================================

/// Target collection per channel kind, plus the document kind label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNames {
    /// Collection for order book entries.
    pub order_book: String,
    /// Collection for ticker snapshots.
    pub ticker: String,
    /// Collection for trades.
    pub trades: String,
    /// Document kind passed to the sink.
    pub doc_kind: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            order_book: "live_crypto_orderbooks".to_string(),
            ticker: "live_crypto_tickers".to_string(),
            trades: "live_crypto_trades".to_string(),
            doc_kind: "bitfinex".to_string(),
        }
    }
}

impl CollectionNames {
    /// Names taken from the sink settings.
    #[must_use]
    pub fn from_settings(settings: &SinkSettings) -> Self {
        Self {
            order_book: settings.order_book_index.clone(),
            ticker: settings.ticker_index.clone(),
            trades: settings.trades_index.clone(),
            doc_kind: settings.doc_kind.clone(),
        }
    }

    /// Collection for a channel kind.
    #[must_use]
    pub fn for_kind(&self, kind: ChannelKind) -> &str {
        match kind {
            ChannelKind::OrderBook => &self.order_book,
            ChannelKind::Ticker => &self.ticker,
            ChannelKind::Trade => &self.trades,
        }
    }
}

/// Default window for binding every channel.
pub const DEFAULT_LEARNING_TIMEOUT: Duration = Duration::from_secs(30);

/// Stream driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Symbols to subscribe, three channels each.
    pub symbols: Vec<String>,
    /// Book subscription parameters.
    pub book: BookParams,
    /// Sink collection names.
    pub collections: CollectionNames,
    /// A Learning phase that has not bound every channel by then ends the session.
    pub learning_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            book: BookParams::default(),
            collections: CollectionNames::default(),
            learning_timeout: DEFAULT_LEARNING_TIMEOUT,
        }
    }
}

impl DriverConfig {
    /// Configuration for the given symbols with default book parameters and collections.
    #[must_use]
    pub fn new(symbols: Vec<String>) -> Self {
        Self {
            symbols,
            ..Self::default()
        }
    }
}

// =============================================================================
// Results and Errors
// =============================================================================

/// Counters for one driver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverSummary {
    /// Frames received.
    pub frames_received: u64,
    /// Records the sink accepted.
    pub records_emitted: u64,
    /// Payloads dropped before the sink.
    pub records_dropped: u64,
    /// Records the sink refused or failed to store.
    pub sink_rejections: u64,
    /// Registry recoveries.
    pub recoveries: u64,
    /// Whether every channel was bound at some point.
    pub reached_streaming: bool,
}

impl DriverSummary {
    /// Add another run's counters.
    pub const fn merge(&mut self, other: &Self) {
        self.frames_received += other.frames_received;
        self.records_emitted += other.records_emitted;
        self.records_dropped += other.records_dropped;
        self.sink_rejections += other.sink_rejections;
        self.recoveries += other.recoveries;
        self.reached_streaming |= other.reached_streaming;
    }
}

/// Errors that end a driver run.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The connection failed.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// A subscribe request could not be encoded.
    #[error("failed to encode subscribe request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Not every channel was bound within the learning window.
    #[error("channels not bound within {0:?}")]
    LearningTimeout(Duration),

    /// The exchange refused a resubscribe while re-learning channel ids.
    #[error("re-learn refused by exchange (code {code}): {msg}")]
    RelearnRefused {
        /// Exchange error code.
        code: i64,
        /// Exchange error message.
        msg: String,
    },
}

// =============================================================================
// Stream Driver
// =============================================================================

/// One exchange session.
pub struct StreamDriver<T: Transport> {
    transport: T,
    sink: Arc<dyn RecordSink>,
    config: DriverConfig,
    status: Arc<FeedStatus>,
    codec: JsonCodec,
    registry: ChannelRegistry,
    state: DriverState,
    summary: DriverSummary,
    learning_deadline: Option<tokio::time::Instant>,
    relearning: bool,
    unbound_warned: bool,
}

impl<T: Transport> StreamDriver<T> {
    /// Create a driver over a connected transport.
    #[must_use]
    pub fn new(
        transport: T,
        sink: Arc<dyn RecordSink>,
        config: DriverConfig,
        status: Arc<FeedStatus>,
    ) -> Self {
        Self {
            transport,
            sink,
            config,
            status,
            codec: JsonCodec::new(),
            registry: ChannelRegistry::new(),
            state: DriverState::Disconnected,
            summary: DriverSummary::default(),
            learning_deadline: None,
            relearning: false,
            unbound_warned: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> DriverState {
        self.state
    }

    /// Channel bindings learned so far.
    #[must_use]
    pub const fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Counters so far.
    #[must_use]
    pub const fn summary(&self) -> DriverSummary {
        self.summary
    }

    /// Give back the transport, e.g. to close it.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run the session until cancelled or the transport fails.
    ///
    /// Cancellation is observed between frames; a sink write in progress
    /// runs to completion.
    ///
    /// # Errors
    ///
    /// Returns `DriverError` when the transport fails. Per-message failures
    /// are reported through logs and metrics instead.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<DriverSummary, DriverError> {
        let result = self.run_session(&cancel).await;
        self.set_state(DriverState::Disconnected);
        self.status.set_bound_channels(0);
        metrics::set_bound_channels(0);

        match &result {
            Ok(summary) => tracing::info!(
                records_emitted = summary.records_emitted,
                records_dropped = summary.records_dropped,
                sink_rejections = summary.sink_rejections,
                recoveries = summary.recoveries,
                "Stream driver stopped"
            ),
            Err(e) => tracing::warn!(error = %e, "Stream driver ended"),
        }
        result
    }

    async fn run_session(&mut self, cancel: &CancellationToken) -> Result<DriverSummary, DriverError> {
        if cancel.is_cancelled() {
            return Ok(self.summary);
        }

        self.subscribe_all().await?;

        loop {
            let deadline = self.learning_deadline;
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(self.summary),
                () = learning_expired(deadline) => {
                    tracing::warn!(
                        bound = self.registry.len(),
                        expected = expected_channels(self.config.symbols.len()),
                        timeout_secs = self.config.learning_timeout.as_secs_f64(),
                        "Channels not bound in time, ending session"
                    );
                    return Err(DriverError::LearningTimeout(self.config.learning_timeout));
                }
                received = self.transport.receive() => received,
            };

            let text = received?;
            self.handle_text(&text).await?;
        }
    }

    /// Send one subscribe request per `(symbol, kind)` and start learning.
    async fn subscribe_all(&mut self) -> Result<(), DriverError> {
        self.set_state(DriverState::Subscribing);

        let requests = SubscribeRequest::for_symbols(&self.config.symbols, &self.config.book);
        for request in &requests {
            let text = self.codec.encode(request)?;
            tracing::debug!(channel = %request.channel, pair = %request.pair, "Sending subscribe request");
            self.transport.send(text).await?;
        }

        tracing::info!(
            symbols = self.config.symbols.len(),
            subscriptions = requests.len(),
            "Subscribe requests sent"
        );

        self.set_state(DriverState::Learning);
        self.learning_deadline = Some(tokio::time::Instant::now() + self.config.learning_timeout);
        self.unbound_warned = false;
        self.check_learning_complete();
        Ok(())
    }

    async fn handle_text(&mut self, text: &str) -> Result<(), DriverError> {
        self.summary.frames_received += 1;
        self.status.increment_frames();

        let classified = self
            .codec
            .decode(text)
            .and_then(|frame| classify(frame, &self.registry));

        match classified {
            Ok(Classified::Ack(binding)) => {
                metrics::record_frame(FrameClass::Ack);
                self.on_ack(&binding);
            }
            Ok(Classified::Control { event, raw }) => {
                metrics::record_frame(FrameClass::Control);
                if let Some(error) = on_control(&event, raw)
                    && self.relearning
                    && error.code == Some(ERROR_DUPLICATE_SUBSCRIPTION)
                {
                    return Err(DriverError::RelearnRefused {
                        code: ERROR_DUPLICATE_SUBSCRIPTION,
                        msg: error.msg,
                    });
                }
            }
            Ok(Classified::Heartbeat(binding)) => {
                metrics::record_frame(FrameClass::Heartbeat);
                tracing::trace!(chan_id = binding.channel_id, symbol = %binding.symbol, "Heartbeat");
            }
            Ok(Classified::Data { binding, payload }) => {
                metrics::record_frame(FrameClass::Data);
                self.on_data(&binding, &payload).await;
            }
            Err(ClassifyError::UnknownChannel(chan_id)) => {
                metrics::record_frame(FrameClass::UnknownChannel);
                self.on_unknown_channel(chan_id, text).await?;
            }
            Err(ClassifyError::MalformedFrame { reason }) => {
                metrics::record_frame(FrameClass::Malformed);
                tracing::warn!(reason = %reason, raw = %text, "Discarding malformed frame");
            }
        }

        Ok(())
    }

    fn on_ack(&mut self, binding: &ChannelBinding) {
        tracing::info!(
            chan_id = binding.channel_id,
            symbol = %binding.symbol,
            kind = %binding.kind,
            "Subscription acknowledged"
        );
        self.registry
            .record_binding(binding.channel_id, &binding.symbol, binding.kind);
        self.status.set_bound_channels(self.registry.len());
        metrics::set_bound_channels(self.registry.len());

        if self.state == DriverState::Learning {
            self.check_learning_complete();
        }
    }

    fn check_learning_complete(&mut self) {
        let expected = expected_channels(self.config.symbols.len());
        if self.registry.is_complete(expected) {
            tracing::info!(channels = expected, "All channels bound, streaming");
            self.summary.reached_streaming = true;
            self.learning_deadline = None;
            self.relearning = false;
            self.set_state(DriverState::Streaming);
        }
    }

    async fn on_unknown_channel(&mut self, chan_id: ChannelId, raw: &str) -> Result<(), DriverError> {
        if self.state == DriverState::Streaming {
            tracing::warn!(chan_id, raw = %raw, "Frame for unknown channel, re-learning channel ids");
            self.recover().await
        } else {
            // Expected briefly while learning; a steady stream of these means the acks are not coming.
            if self.unbound_warned {
                tracing::debug!(chan_id, state = %self.state, raw = %raw, "Dropping frame for unbound channel");
            } else {
                self.unbound_warned = true;
                tracing::warn!(
                    chan_id,
                    state = %self.state,
                    bound = self.registry.len(),
                    raw = %raw,
                    "Dropping frames for unbound channels while learning"
                );
            }
            metrics::record_dropped(None, DropReason::Unbound);
            self.summary.records_dropped += 1;
            self.status.increment_dropped();
            Ok(())
        }
    }

    async fn recover(&mut self) -> Result<(), DriverError> {
        self.set_state(DriverState::Recovering);
        self.summary.recoveries += 1;
        self.status.increment_recoveries();
        metrics::record_recovery();

        let mut stale: Vec<ChannelId> = self.registry.bindings().map(|b| b.channel_id).collect();
        stale.sort_unstable();
        for chan_id in stale {
            let text = self.codec.encode(&UnsubscribeRequest::new(chan_id))?;
            self.transport.send(text).await?;
        }
        tracing::info!(channels = self.registry.len(), "Stale channels unsubscribed");

        self.registry.reset();
        self.status.set_bound_channels(0);
        metrics::set_bound_channels(0);

        self.relearning = true;
        self.subscribe_all().await
    }

    async fn on_data(&mut self, binding: &ChannelBinding, payload: &Payload) {
        let records = match translate(binding, payload) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    chan_id = binding.channel_id,
                    symbol = %binding.symbol,
                    kind = %binding.kind,
                    error = %e,
                    raw = %payload.to_value(),
                    "Dropping payload"
                );
                metrics::record_dropped(Some(binding.kind), DropReason::InvalidShape);
                self.summary.records_dropped += 1;
                self.status.increment_dropped();
                return;
            }
        };

        let mut count = 0;
        for record in records {
            if self.emit(binding, record).await {
                count += 1;
            }
        }

        self.summary.records_emitted += count;
        self.status.add_emitted(count);
        metrics::record_emitted(binding.kind, count);
    }

    /// Write one record; true if the sink accepted it.
    async fn emit(&mut self, binding: &ChannelBinding, record: MarketRecord) -> bool {
        let collection = self.config.collections.for_kind(binding.kind);
        let started = Instant::now();
        let outcome = self
            .sink
            .create(collection, &self.config.collections.doc_kind, record.id(), &record)
            .await;
        metrics::record_sink_write(binding.kind, started.elapsed());

        let failure = match outcome {
            Ok(ack) if ack.accepted => return true,
            Ok(_) => "refused by store".to_string(),
            Err(e) => e.to_string(),
        };

        tracing::warn!(
            chan_id = binding.channel_id,
            symbol = %binding.symbol,
            kind = %binding.kind,
            record_id = %record.id(),
            reason = %failure,
            raw = %serde_json::to_string(&record).unwrap_or_default(),
            "Sink rejected record"
        );
        metrics::record_sink_rejected(binding.kind);
        self.summary.sink_rejections += 1;
        self.status.increment_sink_rejections();
        false
    }

    fn set_state(&mut self, state: DriverState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Driver state change");
        }
        self.state = state;
        self.status.set_state(state);
    }
}

/// Log a control event, handing back error events for the caller to act on.
fn on_control(event: &str, raw: serde_json::Value) -> Option<ErrorEvent> {
    if event != "error" {
        tracing::debug!(event = %event, raw = %raw, "Control event");
        return None;
    }

    match serde_json::from_value::<ErrorEvent>(raw.clone()) {
        Ok(error) => {
            tracing::warn!(
                code = ?error.code,
                msg = %error.msg,
                channel = ?error.channel,
                pair = ?error.pair,
                "Exchange error event"
            );
            Some(error)
        }
        Err(_) => {
            tracing::warn!(raw = %raw, "Exchange error event");
            None
        }
    }
}

/// Resolves at the learning deadline; never resolves without one.
async fn learning_expired(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;
    use crate::infrastructure::persistence::InMemorySink;

    /// Replays canned frames, then reports the connection closed.
    struct Replay {
        frames: VecDeque<String>,
        sent: Vec<String>,
    }

    impl Replay {
        fn new(frames: &[&str]) -> Self {
            Self {
                frames: frames.iter().map(|f| (*f).to_string()).collect(),
                sent: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Transport for Replay {
        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            self.sent.push(text);
            Ok(())
        }

        async fn receive(&mut self) -> Result<String, TransportError> {
            self.frames.pop_front().ok_or(TransportError::Closed)
        }
    }

    const ACKS: [&str; 3] = [
        r#"{"event":"subscribed","channel":"book","chanId":5,"pair":"BTCUSD","prec":"P0","len":"100"}"#,
        r#"{"event":"subscribed","channel":"ticker","chanId":6,"pair":"BTCUSD"}"#,
        r#"{"event":"subscribed","channel":"trades","chanId":7,"pair":"BTCUSD"}"#,
    ];

    fn driver(frames: &[&str]) -> (StreamDriver<Replay>, Arc<InMemorySink>) {
        let sink = Arc::new(InMemorySink::new());
        let driver = StreamDriver::new(
            Replay::new(frames),
            sink.clone(),
            DriverConfig::new(vec!["BTCUSD".to_string()]),
            Arc::new(FeedStatus::new()),
        );
        (driver, sink)
    }

    #[tokio::test]
    async fn sends_three_subscribes_per_symbol() {
        let (mut driver, _sink) = driver(&[]);
        let result = driver.run(CancellationToken::new()).await;

        assert!(matches!(result, Err(DriverError::Transport(TransportError::Closed))));
        let sent = &driver.transport.sent;
        assert_eq!(sent.len(), 3);
        assert!(sent[0].contains(r#""channel":"book""#));
        assert!(sent[0].contains(r#""prec":"P0""#));
        assert!(sent[1].contains(r#""channel":"ticker""#));
        assert!(sent[2].contains(r#""channel":"trades""#));
    }

    #[tokio::test]
    async fn learns_then_streams() {
        let mut frames = ACKS.to_vec();
        frames.push("[7,400.5,-1.25]");
        let (mut driver, sink) = driver(&frames);

        let _ = driver.run(CancellationToken::new()).await;

        assert_eq!(driver.registry().len(), 3);
        assert_eq!(driver.summary().records_emitted, 1);
        let stored = sink.records();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].collection, "live_crypto_trades");
        assert_eq!(stored[0].kind, "bitfinex");
    }

    #[tokio::test]
    async fn ends_disconnected() {
        let (mut driver, _sink) = driver(&ACKS);
        let _ = driver.run(CancellationToken::new()).await;
        assert_eq!(driver.state(), DriverState::Disconnected);
        assert_eq!(driver.status.state(), DriverState::Disconnected);
    }

    #[tokio::test]
    async fn cancelled_before_start_sends_nothing() {
        let (mut driver, _sink) = driver(&ACKS);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = driver.run(cancel).await.unwrap();

        assert_eq!(summary, DriverSummary::default());
        assert!(driver.transport.sent.is_empty());
    }

    #[tokio::test]
    async fn unknown_channel_while_learning_is_dropped_without_recovery() {
        let frames = [ACKS[0], "[9,1.0,2.0,3.0]", ACKS[1], ACKS[2]];
        let (mut driver, _sink) = driver(&frames);

        let _ = driver.run(CancellationToken::new()).await;

        let summary = driver.summary();
        assert_eq!(summary.recoveries, 0);
        assert_eq!(summary.records_dropped, 1);
        assert_eq!(driver.transport.sent.len(), 3);
    }

    #[tokio::test]
    async fn unbound_frames_warn_once_per_learning_phase() {
        let frames = [ACKS[0], "[9,1.0,2.0,3.0]", "[9,1.0,2.0,3.0]", ACKS[1], ACKS[2]];
        let (mut driver, _sink) = driver(&frames);
        assert!(!driver.unbound_warned);

        let _ = driver.run(CancellationToken::new()).await;

        assert!(driver.unbound_warned);
        assert_eq!(driver.summary().records_dropped, 2);

        // A new learning phase warns again.
        driver.subscribe_all().await.unwrap();
        assert!(!driver.unbound_warned);
        assert!(driver.learning_deadline.is_some());
    }

    #[tokio::test]
    async fn refused_sink_writes_are_not_counted_as_emitted() {
        let mut frames = ACKS.to_vec();
        frames.push("[7,400.5,-1.25]");
        let (mut driver, sink) = driver(&frames);
        sink.set_refuse_all(true);

        let _ = driver.run(CancellationToken::new()).await;

        let summary = driver.summary();
        assert_eq!(summary.records_emitted, 0);
        assert_eq!(summary.sink_rejections, 1);
        assert_eq!(driver.status.snapshot().records_emitted, 0);
    }

    #[tokio::test]
    async fn error_event_is_not_fatal() {
        let mut frames = vec![r#"{"event":"error","msg":"subscribe: dup","code":10301}"#];
        frames.extend(ACKS);
        frames.push("[5,100.0,1,0.5]");
        let (mut driver, sink) = driver(&frames);

        let _ = driver.run(CancellationToken::new()).await;

        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn collections_by_kind() {
        let names = CollectionNames::default();
        assert_eq!(names.for_kind(ChannelKind::OrderBook), "live_crypto_orderbooks");
        assert_eq!(names.for_kind(ChannelKind::Ticker), "live_crypto_tickers");
        assert_eq!(names.for_kind(ChannelKind::Trade), "live_crypto_trades");
    }

    #[test]
    fn collections_follow_sink_settings() {
        let settings = SinkSettings {
            trades_index: "archive_trades".to_string(),
            doc_kind: "bfx".to_string(),
            ..SinkSettings::default()
        };

        let names = CollectionNames::from_settings(&settings);

        assert_eq!(names.for_kind(ChannelKind::Trade), "archive_trades");
        assert_eq!(names.for_kind(ChannelKind::OrderBook), "live_crypto_orderbooks");
        assert_eq!(names.doc_kind, "bfx");
    }
}
