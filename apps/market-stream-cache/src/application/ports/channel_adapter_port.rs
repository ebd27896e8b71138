//! Channel Adapter Port
//!
//! Everything exchange-specific lives behind this trait: how to subscribe,
//! how to decode a raw frame, how to tell data from control traffic, and
//! which mapping profile turns a data message into a canonical record.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::transport_port::Outbound;
use crate::domain::mapping::MappingError;
use crate::domain::record::CanonicalRecord;

/// Raw frame decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Frame is not valid JSON.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compressed frame could not be inflated.
    #[error("decompression error: {0}")]
    Decompress(#[from] std::io::Error),
}

/// Result of classifying a decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified<C> {
    /// Market data for a supported channel.
    Data {
        /// Channel identifier used as the state table key (e.g. `kline_1m`).
        channel: String,
        /// Adapter's channel kind, selects the mapping profile.
        kind: C,
        /// Native market name, before alias translation.
        market: String,
    },
    /// Control message that must be answered on the wire (e.g. a ping).
    Reply(Outbound),
    /// Acknowledgement, heartbeat or status message. Ignored.
    Control,
    /// Data-bearing message for a channel the adapter does not support.
    Unknown(String),
}

/// Exchange-specific protocol and mapping.
pub trait ChannelAdapter: Send + Sync {
    /// Supported channel kinds.
    type Channel: Copy + Send + Sync + std::fmt::Debug;

    /// Exchange name, used in logs, metrics and default keys.
    fn exchange(&self) -> &'static str;

    /// Subscription frames for the configured markets and channels.
    fn build_subscriptions(&self, markets: &[String], channels: &[String]) -> Vec<Outbound>;

    /// Decode one raw frame. Empty frames decode to an empty object.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for malformed or undecompressable frames.
    fn decode_frame(&self, raw: &[u8]) -> Result<Value, DecodeError>;

    /// Classify a decoded message.
    fn classify(&self, message: &Value) -> Classified<Self::Channel>;

    /// Map a data message to a canonical record.
    ///
    /// `Ok(None)` means the message was understood but deliberately not
    /// emitted (e.g. an unfinished bar). `received_at` stands in for the
    /// exchange timestamp when the wire carries none.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError`] when the payload does not fit its profile.
    fn dispatch(
        &self,
        channel: Self::Channel,
        message: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<Option<CanonicalRecord>, MappingError>;

    /// Frame sent periodically to keep the connection alive, if any.
    fn keep_alive(&self) -> Option<Outbound>;
}
