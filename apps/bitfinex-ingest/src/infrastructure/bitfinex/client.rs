//! Feed Supervisor
//!
//! Keeps a stream driver running: connect, run the session, and on transport
//! failure back off and start a fresh session with an empty registry. The
//! backoff resets once a session has bound every channel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::driver::{DriverConfig, DriverSummary, StreamDriver};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::status::FeedStatus;
use super::transport::WsTransport;
use crate::application::ports::{RecordSink, Transport, TransportError};
use crate::infrastructure::metrics;

/// Supervisor errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Gave up reconnecting.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct FeedSupervisorConfig {
    /// WebSocket URL.
    pub url: String,
    /// Idle window before a quiet connection is dropped.
    pub idle_timeout: Duration,
    /// Backoff between sessions.
    pub reconnect: ReconnectConfig,
    /// Per-session driver configuration.
    pub driver: DriverConfig,
}

/// Runs stream driver sessions until cancelled.
pub struct FeedSupervisor {
    config: FeedSupervisorConfig,
    sink: Arc<dyn RecordSink>,
    status: Arc<FeedStatus>,
    cancel: CancellationToken,
}

impl FeedSupervisor {
    /// Create a supervisor.
    #[must_use]
    pub fn new(
        config: FeedSupervisorConfig,
        sink: Arc<dyn RecordSink>,
        status: Arc<FeedStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            sink,
            status,
            cancel,
        }
    }

    /// Shared feed status.
    #[must_use]
    pub fn status(&self) -> Arc<FeedStatus> {
        Arc::clone(&self.status)
    }

    /// Run against the configured WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::MaxReconnectAttemptsExceeded` when the
    /// backoff policy gives up.
    pub async fn run(&self) -> Result<DriverSummary, SupervisorError> {
        let url = self.config.url.clone();
        let idle_timeout = self.config.idle_timeout;
        self.run_with(move || {
            let url = url.clone();
            async move { WsTransport::connect(&url, idle_timeout).await }
        })
        .await
    }

    /// Run with a custom connector. Each call to `connect` opens one session.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::MaxReconnectAttemptsExceeded` when the
    /// backoff policy gives up.
    pub async fn run_with<C, Fut, T>(&self, mut connect: C) -> Result<DriverSummary, SupervisorError>
    where
        C: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
        T: Transport,
    {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut totals = DriverSummary::default();

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Feed supervisor cancelled");
                return Ok(totals);
            }

            match connect().await {
                Ok(transport) => {
                    let mut driver = StreamDriver::new(
                        transport,
                        Arc::clone(&self.sink),
                        self.config.driver.clone(),
                        Arc::clone(&self.status),
                    );
                    let result = driver.run(self.cancel.clone()).await;
                    let session = driver.summary();
                    totals.merge(&session);
                    driver.into_transport().close().await;

                    match result {
                        Ok(_) => {
                            tracing::info!("Feed session stopped");
                            return Ok(totals);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Feed session failed");
                            self.status.set_error(e.to_string());
                            if session.reached_streaming {
                                policy.reset();
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Connection attempt failed");
                    self.status.set_error(e.to_string());
                }
            }

            let Some(delay) = policy.next_delay() else {
                return Err(SupervisorError::MaxReconnectAttemptsExceeded(
                    policy.attempt_count(),
                ));
            };

            let attempt = policy.attempt_count();
            tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting to exchange stream");
            self.status.increment_reconnects();
            metrics::record_reconnect();

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Feed supervisor cancelled during reconnect delay");
                    return Ok(totals);
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;
    use crate::infrastructure::persistence::InMemorySink;

    struct Canned(VecDeque<String>);

    #[async_trait]
    impl Transport for Canned {
        async fn send(&mut self, _text: String) -> Result<(), TransportError> {
            Ok(())
        }

        async fn receive(&mut self) -> Result<String, TransportError> {
            self.0.pop_front().ok_or(TransportError::Closed)
        }
    }

    fn supervisor(max_attempts: u32, cancel: CancellationToken) -> (FeedSupervisor, Arc<InMemorySink>) {
        let sink = Arc::new(InMemorySink::new());
        let config = FeedSupervisorConfig {
            url: "ws://unused".to_string(),
            idle_timeout: Duration::from_secs(1),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
                jitter_factor: 0.0,
                max_attempts,
            },
            driver: DriverConfig::new(vec!["BTCUSD".to_string()]),
        };
        let supervisor = FeedSupervisor::new(config, sink.clone(), Arc::new(FeedStatus::new()), cancel);
        (supervisor, sink)
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (supervisor, _sink) = supervisor(2, CancellationToken::new());
        let mut calls = 0;

        let err = supervisor
            .run_with(|| {
                calls += 1;
                async { Err::<Canned, _>(TransportError::ConnectionFailed("refused".to_string())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::MaxReconnectAttemptsExceeded(2)));
        assert_eq!(calls, 3);
        assert_eq!(supervisor.status().snapshot().reconnects, 2);
    }

    #[tokio::test]
    async fn each_session_starts_with_fresh_registry() {
        let (supervisor, sink) = supervisor(1, CancellationToken::new());
        let session = vec![
            r#"{"event":"subscribed","channel":"book","chanId":5,"pair":"BTCUSD"}"#.to_string(),
            r#"{"event":"subscribed","channel":"ticker","chanId":6,"pair":"BTCUSD"}"#.to_string(),
            r#"{"event":"subscribed","channel":"trades","chanId":7,"pair":"BTCUSD"}"#.to_string(),
            "[5,100.0,1,0.5]".to_string(),
        ];
        let mut sessions = VecDeque::from([session.clone(), session]);

        let result = supervisor
            .run_with(|| {
                let frames = sessions.pop_front().unwrap_or_default();
                async move { Ok(Canned(frames.into())) }
            })
            .await;

        // Both sessions stream, so the backoff resets and the third, empty session exhausts it.
        assert!(result.is_err());
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn refused_relearn_is_retried_on_a_new_connection() {
        let (supervisor, sink) = supervisor(1, CancellationToken::new());
        let acks = [
            r#"{"event":"subscribed","channel":"book","chanId":5,"pair":"BTCUSD"}"#,
            r#"{"event":"subscribed","channel":"ticker","chanId":6,"pair":"BTCUSD"}"#,
            r#"{"event":"subscribed","channel":"trades","chanId":7,"pair":"BTCUSD"}"#,
        ];
        let mut wedged: Vec<String> = acks.iter().map(|f| (*f).to_string()).collect();
        wedged.push("[5,100.0,1,0.5]".to_string());
        wedged.push("[99,1.0,1,1.0]".to_string());
        wedged.push(r#"{"event":"error","msg":"subscribe: dup","code":10301,"channel":"book","pair":"BTCUSD"}"#.to_string());
        let mut fresh: Vec<String> = acks.iter().map(|f| (*f).to_string()).collect();
        fresh.push("[5,101.0,1,0.5]".to_string());
        let mut sessions = VecDeque::from([wedged, fresh]);
        let mut calls = 0;

        let _ = supervisor
            .run_with(|| {
                calls += 1;
                let frames = sessions.pop_front().unwrap_or_default();
                async move { Ok(Canned(frames.into())) }
            })
            .await;

        assert!(calls >= 2);
        assert_eq!(sink.len(), 2);
        let snapshot = supervisor.status().snapshot();
        assert_eq!(snapshot.recoveries, 1);
    }

    #[tokio::test]
    async fn cancelled_supervisor_does_not_connect() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (supervisor, _sink) = supervisor(0, cancel);
        let mut calls = 0;

        let summary = supervisor
            .run_with(|| {
                calls += 1;
                async { Err::<Canned, _>(TransportError::Closed) }
            })
            .await
            .unwrap();

        assert_eq!(calls, 0);
        assert_eq!(summary, DriverSummary::default());
    }
}
