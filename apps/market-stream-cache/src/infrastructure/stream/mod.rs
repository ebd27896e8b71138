//! Streaming Session
//!
//! Drives one exchange feed end to end:
//!
//! - **Codec**: JSON and gzip-compressed JSON frame decoding
//! - **Heartbeat**: keep-alive scheduling and idle detection
//! - **Reconnect**: bounded retry with backoff and jitter
//! - **WebSocket**: `tokio-tungstenite` transport
//! - **Session**: the connect / subscribe / stream / reconnect state machine

pub mod codec;
pub mod heartbeat;
pub mod reconnect;
pub mod session;
pub mod websocket;

pub use codec::{GzipJsonCodec, JsonCodec};
pub use heartbeat::{HeartbeatConfig, HeartbeatScheduler};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::{
    ConnectionSession, Disposition, SessionError, SessionOutcome, SessionState, SessionStatus,
};
pub use websocket::{WsConnector, WsTransport};
