//! Application Ports (Driver and Driven)
//!
//! Ports define the seams between the streaming pipeline and the outside
//! world, so sessions can be driven by scripted transports and in-memory
//! stores in tests.
//!
//! - `ChannelAdapter`: per-exchange subscription, decoding and mapping
//! - `Connector` / `FrameTransport`: a bidirectional frame stream
//! - `StateStore`: snapshot `SET` and pub/sub `PUBLISH`

mod channel_adapter_port;
mod state_store_port;
mod transport_port;

pub use channel_adapter_port::{ChannelAdapter, Classified, DecodeError};
pub use state_store_port::{StateStore, StoreError};
pub use transport_port::{ConnectionError, Connector, FrameTransport, Outbound};
