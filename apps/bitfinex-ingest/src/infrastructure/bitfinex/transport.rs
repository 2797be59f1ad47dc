//! WebSocket Transport
//!
//! `Transport` adapter over tokio-tungstenite. Text frames are handed to the
//! driver; pings are answered here; a close frame or end of stream is
//! `TransportError::Closed`. A quiet connection is treated as dead after the
//! idle timeout, since the exchange heartbeats every bound channel.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live WebSocket connection to the exchange.
pub struct WsTransport {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    idle_timeout: Duration,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl WsTransport {
    /// Open a connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the handshake fails.
    pub async fn connect(url: &str, idle_timeout: Duration) -> Result<Self, TransportError> {
        tracing::info!(url = %url, "Connecting to exchange stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (write, read) = ws_stream.split();

        Ok(Self {
            write,
            read,
            idle_timeout,
        })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        loop {
            let next = tokio::time::timeout(self.idle_timeout, self.read.next())
                .await
                .map_err(|_| TransportError::IdleTimeout(self.idle_timeout))?;

            match next {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(text),
                    Err(_) => tracing::debug!(len = data.len(), "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(data))) => {
                    self.write
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| TransportError::Io(e.to_string()))?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Server sent close frame");
                    return Err(TransportError::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
                None => {
                    tracing::info!("WebSocket stream ended");
                    return Err(TransportError::Closed);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.write.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "Close frame not sent");
        }
    }
}
