//! WebSocket Transport
//!
//! [`Connector`] and [`FrameTransport`] over `tokio-tungstenite` with rustls.
//! Text and binary frames are handed to the session as raw bytes; protocol
//! pings are answered by tungstenite itself (it queues the pong and flushes
//! it on the next read), pongs are ignored, and a close frame ends the
//! stream.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{ConnectionError, Connector, FrameTransport, Outbound};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, url: &str) -> Result<WsTransport, ConnectionError> {
        tracing::info!(url = %url, "Connecting to exchange stream");

        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(map_connect_error)?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(WsTransport { stream })
    }
}

/// An open WebSocket connection.
#[derive(Debug)]
pub struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn send(&mut self, frame: Outbound) -> Result<(), ConnectionError> {
        let message = match frame {
            Outbound::Text(text) => Message::Text(text.into()),
            Outbound::Ping(payload) => Message::Ping(payload.into()),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Server sent close frame");
                    return Ok(None);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    tracing::info!("WebSocket stream ended");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
            }
        }
    }
}

fn map_connect_error(err: tungstenite::Error) -> ConnectionError {
    match err {
        tungstenite::Error::Url(url_err) => ConnectionError::InvalidUrl(url_err.to_string()),
        tungstenite::Error::HttpFormat(http_err) => ConnectionError::InvalidUrl(http_err.to_string()),
        other => ConnectionError::Handshake(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_url_is_invalid() {
        let err = WsConnector::new().connect("not a url").await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidUrl(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unsupported_scheme_is_invalid() {
        let err = WsConnector::new().connect("http://example.com/ws").await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidUrl(_)), "{err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_handshake_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = WsConnector::new()
            .connect(&format!("ws://127.0.0.1:{port}/"))
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionError::Handshake(_)), "{err:?}");
    }
}
