//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Exchange adapters (Binance, Bybit, Huobi, Kraken).
pub mod exchanges;

/// Streaming session: codec, heartbeat, reconnect policy, WebSocket transport.
pub mod stream;

/// State store adapters (Redis, in-memory).
pub mod store;

/// Configuration from environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
