//! Stream Cache Configuration Settings
//!
//! Configuration types for one exchange feed, loaded from environment
//! variables. Unset or malformed optional values fall back to defaults;
//! only the exchange itself is required.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::application::services::state_cache::{
    CacheSettings, DEFAULT_CACHE_TTL, DEFAULT_CACHING_FREQ,
};
use crate::domain::translator::Translator;
use crate::infrastructure::exchanges::Exchange;
use crate::infrastructure::store::is_memory_url;
use crate::infrastructure::stream::heartbeat::{DEFAULT_IDLE_TIMEOUT, HeartbeatConfig};
use crate::infrastructure::stream::reconnect::ReconnectConfig;

/// Default Redis endpoint.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Highest meaningful verbosity level.
pub const MAX_VERBOSITY: u8 = 10;

/// Everything one [`ConnectionSession`](crate::ConnectionSession) needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Exchange served by this session.
    pub exchange: Exchange,
    /// WebSocket endpoint.
    pub url: String,
    /// Native market names to subscribe to.
    pub markets: Vec<String>,
    /// Channel names to subscribe to; also pre-seed the state table.
    pub channels: Vec<String>,
    /// Native market name to alias.
    pub translate: Translator,
    /// Snapshot and publish settings.
    pub cache: CacheSettings,
    /// Keep-alive and idle detection.
    pub heartbeat: HeartbeatConfig,
    /// Retry bound and backoff.
    pub reconnect: ReconnectConfig,
}

impl SessionConfig {
    /// Exchange defaults for everything but the exchange itself.
    #[must_use]
    pub fn for_exchange(exchange: Exchange) -> Self {
        Self {
            exchange,
            url: exchange.default_url().to_string(),
            markets: to_strings(exchange.default_markets()),
            channels: to_strings(exchange.default_channels()),
            translate: Translator::default(),
            cache: CacheSettings::for_exchange(exchange.as_str()),
            heartbeat: HeartbeatConfig::new(
                exchange.default_heartbeat_interval(),
                Some(DEFAULT_IDLE_TIMEOUT),
            ),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// State store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// `redis://..` or `memory://`.
    pub url: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

impl StoreSettings {
    /// Whether the in-memory store is selected.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        is_memory_url(&self.url)
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health and metrics HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Exchange session settings.
    pub session: SessionConfig,
    /// State store settings.
    pub store: StoreSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Log verbosity, 0..=10.
    pub verbosity: u8,
}

impl AppConfig {
    /// Create configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `STREAM_EXCHANGE` is missing or unknown, or
    /// `STREAM_TRANSLATE` is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from a `.env` style file, with process
    /// environment variables taking precedence over the file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DotEnv`] if the file cannot be read or parsed,
    /// otherwise the same errors as [`Self::from_env`].
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        let file: HashMap<String, String> = dotenvy::from_path_iter(path)
            .map_err(|e| ConfigError::DotEnv(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| ConfigError::DotEnv(e.to_string()))?;

        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file.get(key).cloned()))
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvSource { lookup: &lookup };

        let exchange_name = env
            .get("STREAM_EXCHANGE")
            .ok_or_else(|| ConfigError::MissingEnvVar("STREAM_EXCHANGE".to_string()))?;
        let exchange: Exchange = exchange_name
            .parse()
            .map_err(|_| ConfigError::UnknownExchange(exchange_name.clone()))?;

        let defaults = SessionConfig::for_exchange(exchange);
        let cache_defaults = &defaults.cache;
        let reconnect_defaults = &defaults.reconnect;

        let cache = CacheSettings {
            do_cache: env.bool("STREAM_DO_CACHE", cache_defaults.do_cache),
            caching_freq: env.duration_millis("STREAM_CACHING_FREQ_MS", DEFAULT_CACHING_FREQ),
            caching_key: env
                .get("STREAM_CACHING_KEY")
                .unwrap_or_else(|| cache_defaults.caching_key.clone()),
            ttl: env.duration_secs("STREAM_CACHE_TTL_SECS", DEFAULT_CACHE_TTL),
            do_publish: env.bool("STREAM_DO_PUBLISH", cache_defaults.do_publish),
            publish_channel: env
                .get("STREAM_PUBLISH_CHANNEL")
                .unwrap_or_else(|| cache_defaults.publish_channel.clone()),
        };

        let idle_timeout = env.duration_secs("STREAM_IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT);
        let heartbeat = HeartbeatConfig::new(
            env.duration_secs(
                "STREAM_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat.interval,
            ),
            (!idle_timeout.is_zero()).then_some(idle_timeout),
        );

        let reconnect = ReconnectConfig::new(
            env.duration_millis("STREAM_RECONNECT_DELAY_MS", reconnect_defaults.initial_delay),
            env.duration_millis(
                "STREAM_RECONNECT_DELAY_MAX_MS",
                reconnect_defaults.max_delay,
            ),
            env.parse("STREAM_RECONNECT_MULTIPLIER", reconnect_defaults.multiplier),
            reconnect_defaults.jitter_factor,
            env.parse(
                "STREAM_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
        );

        let translate = match env.get("STREAM_TRANSLATE") {
            Some(pairs) => parse_translate(&pairs)?,
            None => Translator::default(),
        };

        let session = SessionConfig {
            exchange,
            url: env.get("STREAM_URL").unwrap_or(defaults.url),
            markets: env.list("STREAM_MARKETS").unwrap_or(defaults.markets),
            channels: env.list("STREAM_CHANNELS").unwrap_or(defaults.channels),
            translate,
            cache,
            heartbeat,
            reconnect,
        };

        Ok(Self {
            session,
            store: StoreSettings {
                url: env
                    .get("REDIS_URL")
                    .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            },
            server: ServerSettings {
                health_port: env.parse(
                    "STREAM_HEALTH_PORT",
                    ServerSettings::default().health_port,
                ),
            },
            verbosity: env.parse::<u8>("STREAM_VERBOSITY", 0).min(MAX_VERBOSITY),
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// `STREAM_EXCHANGE` names no supported exchange.
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),
    /// A value is present but unusable.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
    /// The `.env` file could not be read.
    #[error("failed to load env file: {0}")]
    DotEnv(String),
}

/// Variable lookup that treats blank values as unset.
struct EnvSource<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvSource<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("true" | "1" | "yes" | "on") => true,
            Some("false" | "0" | "no" | "off") => false,
            _ => default,
        }
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

/// Parse `native=alias,native=alias`.
fn parse_translate(pairs: &str) -> Result<Translator, ConfigError> {
    pairs
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((native, alias)) if !native.trim().is_empty() && !alias.trim().is_empty() => {
                Ok((native.trim().to_string(), alias.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidValue {
                key: "STREAM_TRANSLATE",
                value: pair.to_string(),
            }),
        })
        .collect()
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}
