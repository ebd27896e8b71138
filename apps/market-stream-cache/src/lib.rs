#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Stream Cache - Exchange Feed Normalizer
//!
//! Maintains one streaming connection per exchange feed, turns every
//! exchange-specific wire message into a canonical record, keeps the latest
//! record per (channel, market) and exports that table to Redis, both as
//! rate-limited snapshots and as per-update pub/sub messages.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Canonical records and declarative field mapping
//!   - `record`: Canonical records and field values
//!   - `mapping`: Mapping profiles, coercions and the schema mapper
//!   - `state`: Latest-value table keyed by channel then market
//!   - `translator`: Market alias translation
//!   - `cadence`: Fixed-interval gates used by flush and heartbeat
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Channel adapter, transport and state store contracts
//!   - `services`: The rate-limited state cache
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchanges`: Binance, Bybit, Huobi and Kraken adapters
//!   - `stream`: Codec, heartbeat, reconnect policy, WebSocket transport, session
//!   - `store`: Redis and in-memory state stores
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Exchange WS ──► decode ──► classify ──► dispatch ──► StateCache ──┬──► SET key:channel (snapshot)
//!                                                                   └──► PUBLISH topic:channel
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Canonical records and mapping with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cadence::Cadence;
pub use domain::mapping::{
    Coercion, FragmentShape, MappingError, MappingProfile, MappingRule, SchemaMapper, SourceKey,
};
pub use domain::record::{CanonicalRecord, FieldValue, RESPOND_TIME_FIELD};
pub use domain::state::{ChannelState, StateTable};
pub use domain::translator::Translator;

// Ports and services
pub use application::ports::{
    ChannelAdapter, Classified, ConnectionError, Connector, DecodeError, FrameTransport, Outbound,
    StateStore, StoreError,
};
pub use application::services::state_cache::{CacheSettings, StateCache};

// Exchanges
pub use infrastructure::exchanges::{
    Exchange, binance::BinanceAdapter, bybit::BybitAdapter, huobi::HuobiAdapter,
    kraken::KrakenAdapter,
};

// Streaming
pub use infrastructure::stream::heartbeat::{HeartbeatConfig, HeartbeatScheduler};
pub use infrastructure::stream::reconnect::{ReconnectConfig, ReconnectPolicy};
pub use infrastructure::stream::session::{
    ConnectionSession, Disposition, SessionError, SessionOutcome, SessionState, SessionStatus,
};
pub use infrastructure::stream::websocket::{WsConnector, WsTransport};

// Stores
pub use infrastructure::store::{memory::InMemoryStore, redis::RedisStore};

// Infrastructure config
pub use infrastructure::config::{
    AppConfig, ConfigError, ServerSettings, SessionConfig, StoreSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{SkipReason, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init_with_config as init_telemetry};
