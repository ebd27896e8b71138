//! Market Stream Cache Binary
//!
//! Streams one exchange feed into the Redis state cache.
//!
//! # Usage
//!
//! ```bash
//! STREAM_EXCHANGE=kraken cargo run --bin market-stream-cache
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `STREAM_EXCHANGE`: binance | bybit | huobi | kraken
//!
//! ## Optional
//! - `STREAM_URL`, `STREAM_MARKETS`, `STREAM_CHANNELS`: override exchange defaults
//! - `STREAM_TRANSLATE`: market aliases, `native=alias,...`
//! - `STREAM_DO_CACHE`, `STREAM_CACHING_FREQ_MS`, `STREAM_CACHING_KEY`, `STREAM_CACHE_TTL_SECS`
//! - `STREAM_DO_PUBLISH`, `STREAM_PUBLISH_CHANNEL`
//! - `STREAM_HEARTBEAT_INTERVAL_SECS`, `STREAM_IDLE_TIMEOUT_SECS`
//! - `STREAM_RECONNECT_DELAY_MS`, `STREAM_RECONNECT_DELAY_MAX_MS`,
//!   `STREAM_RECONNECT_MULTIPLIER`, `STREAM_MAX_RECONNECT_ATTEMPTS`
//! - `STREAM_VERBOSITY`: 0..=10 (default: 0)
//! - `REDIS_URL`: store endpoint, `memory://` for a dry run (default: redis://127.0.0.1:6379)
//! - `STREAM_HEALTH_PORT`: health and metrics HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`, `RUST_LOG`

use std::sync::Arc;

use anyhow::anyhow;
use market_stream_cache::infrastructure::telemetry::{self, TelemetryConfig};
use market_stream_cache::{
    AppConfig, BinanceAdapter, BybitAdapter, ChannelAdapter, ConnectionSession, Exchange,
    HealthServer, HealthServerState, HuobiAdapter, InMemoryStore, KrakenAdapter, RedisStore,
    SessionOutcome, StateStore, WsConnector, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let config = AppConfig::from_env()?;

    let _telemetry_guard =
        telemetry::init_with_config(TelemetryConfig::from_env().with_verbosity(config.verbosity));

    tracing::info!("Starting Market Stream Cache");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    log_config(&config);

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let outcome = if config.store.is_memory() {
        tracing::warn!("Using in-memory store, nothing leaves this process");
        run_exchange(&config, InMemoryStore::new(), shutdown_token.clone()).await
    } else {
        let store = RedisStore::open(&config.store.url)?;
        run_exchange(&config, store, shutdown_token.clone()).await
    };

    // Stops the health server.
    shutdown_token.cancel();

    match outcome {
        SessionOutcome::Shutdown => {
            tracing::info!("Market Stream Cache stopped");
            Ok(())
        }
        SessionOutcome::Failed { attempts, error } => {
            tracing::error!(attempts, error = %error, "Market Stream Cache gave up");
            Err(anyhow!("session failed after {attempts} attempt(s): {error}"))
        }
    }
}

/// Pick the adapter for the configured exchange.
async fn run_exchange<S: StateStore>(
    config: &AppConfig,
    store: S,
    cancel: CancellationToken,
) -> SessionOutcome {
    match config.session.exchange {
        Exchange::Binance => run_session(config, BinanceAdapter::new(), store, cancel).await,
        Exchange::Bybit => run_session(config, BybitAdapter::new(), store, cancel).await,
        Exchange::Huobi => run_session(config, HuobiAdapter::new(), store, cancel).await,
        Exchange::Kraken => run_session(config, KrakenAdapter::new(), store, cancel).await,
    }
}

async fn run_session<A, S>(
    config: &AppConfig,
    adapter: A,
    store: S,
    cancel: CancellationToken,
) -> SessionOutcome
where
    A: ChannelAdapter,
    S: StateStore,
{
    let mut session = ConnectionSession::new(
        config.session.clone(),
        adapter,
        WsConnector::new(),
        store,
        cancel.clone(),
    );

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            session.status(),
        ));
        let health_server = HealthServer::new(config.server.health_port, health_state, cancel);
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    session.run().await
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    let session = &config.session;
    tracing::info!(
        exchange = session.exchange.as_str(),
        url = %session.url,
        markets = ?session.markets,
        channels = ?session.channels,
        do_cache = session.cache.do_cache,
        do_publish = session.cache.do_publish,
        health_port = config.server.health_port,
        verbosity = config.verbosity,
        "Configuration loaded"
    );
    tracing::debug!(
        caching_key = %session.cache.caching_key,
        publish_channel = %session.cache.publish_channel,
        caching_freq_ms = u64::try_from(session.cache.caching_freq.as_millis()).unwrap_or(u64::MAX),
        max_reconnect_attempts = session.reconnect.max_attempts,
        aliases = session.translate.len(),
        "Session settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
