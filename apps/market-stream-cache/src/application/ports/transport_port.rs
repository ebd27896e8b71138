//! Transport Port (Driven Port)
//!
//! A connected, bidirectional stream of frames. The production adapter is a
//! WebSocket; tests script frames directly.

use async_trait::async_trait;

/// Frame sent to the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame (JSON subscription or keep-alive).
    Text(String),
    /// Protocol-level ping with payload.
    Ping(Vec<u8>),
}

impl Outbound {
    /// Text frame from anything displayable, typically a `serde_json::Value`.
    #[must_use]
    pub fn text(body: impl ToString) -> Self {
        Self::Text(body.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Endpoint URL cannot be used at all. Retrying will not help.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// Connecting or the protocol handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Reading or writing on an established connection failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// An established frame stream.
#[async_trait]
pub trait FrameTransport: Send {
    /// Send one frame.
    async fn send(&mut self, frame: Outbound) -> Result<(), ConnectionError>;

    /// Receive the next data frame (text or binary payload).
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. Must be
    /// cancel-safe: dropping the future loses no frame.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ConnectionError>;
}

/// Opens frame streams.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Transport produced by a successful connect.
    type Transport: FrameTransport;

    /// Connect to `url`.
    async fn connect(&self, url: &str) -> Result<Self::Transport, ConnectionError>;
}
