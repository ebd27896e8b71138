//! Exchange Adapters
//!
//! One [`ChannelAdapter`](crate::application::ports::ChannelAdapter) per
//! supported exchange. Each adapter pairs a small amount of protocol code
//! (subscription frames, classification) with static mapping tables; all
//! field-level knowledge lives in the tables.
//!
//! | Exchange | Frames | Channels |
//! |----------|--------|----------|
//! | Binance  | JSON   | `trade`, `ticker`, `index`, `kline_<i>` |
//! | Bybit v5 | JSON   | `tickers`, `publicTrade`, `orderbook.<n>`, `kline.<i>` |
//! | Huobi    | gzip   | `ticker`, `bbo`, `detail`, `trade.detail`, `depth.step<n>`, `mbp.refresh.<n>`, `kline.<p>` |
//! | Kraken v1| JSON   | `ticker`, `trade`, `spread`, `book-<d>`, `ohlc-<i>` |

pub mod binance;
pub mod bybit;
pub mod huobi;
pub mod kraken;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::mapping::{
    Coercion, FragmentShape, MappingError, MappingProfile, MappingRule, SchemaMapper,
};
use crate::domain::record::{CanonicalRecord, FieldValue, RESPOND_TIME_FIELD};
use crate::infrastructure::stream::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;

// =============================================================================
// Exchange selection
// =============================================================================

/// Supported exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    /// Binance spot.
    Binance,
    /// Bybit v5 public spot.
    Bybit,
    /// Huobi (HTX) spot.
    Huobi,
    /// Kraken websocket v1.
    Kraken,
}

impl Exchange {
    /// All supported exchanges.
    pub const ALL: [Self; 4] = [Self::Binance, Self::Bybit, Self::Huobi, Self::Kraken];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Huobi => "huobi",
            Self::Kraken => "kraken",
        }
    }

    /// Public market-data endpoint.
    #[must_use]
    pub const fn default_url(self) -> &'static str {
        match self {
            Self::Binance => binance::DEFAULT_URL,
            Self::Bybit => bybit::DEFAULT_URL,
            Self::Huobi => huobi::DEFAULT_URL,
            Self::Kraken => kraken::DEFAULT_URL,
        }
    }

    /// Markets subscribed when none are configured.
    #[must_use]
    pub const fn default_markets(self) -> &'static [&'static str] {
        match self {
            Self::Binance => binance::DEFAULT_MARKETS,
            Self::Bybit => bybit::DEFAULT_MARKETS,
            Self::Huobi => huobi::DEFAULT_MARKETS,
            Self::Kraken => kraken::DEFAULT_MARKETS,
        }
    }

    /// Channels subscribed when none are configured.
    #[must_use]
    pub const fn default_channels(self) -> &'static [&'static str] {
        match self {
            Self::Binance => binance::DEFAULT_CHANNELS,
            Self::Bybit => bybit::DEFAULT_CHANNELS,
            Self::Huobi => huobi::DEFAULT_CHANNELS,
            Self::Kraken => kraken::DEFAULT_CHANNELS,
        }
    }

    /// Keep-alive interval. Bybit drops connections silent for 30 s.
    #[must_use]
    pub const fn default_heartbeat_interval(self) -> Duration {
        match self {
            Self::Bybit => bybit::HEARTBEAT_INTERVAL,
            Self::Binance | Self::Huobi | Self::Kraken => DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognized exchange names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown exchange: {0}")]
pub struct UnknownExchange(pub String);

impl FromStr for Exchange {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|exchange| exchange.as_str() == name)
            .ok_or_else(|| UnknownExchange(s.to_string()))
    }
}

// =============================================================================
// Channel resolution
// =============================================================================

/// How a wire channel name selects a channel kind.
#[derive(Debug, Clone, Copy)]
pub enum ChannelMatch {
    /// Whole name must match.
    Exact(&'static str),
    /// Name must start with the prefix (parameterized channels).
    Prefix(&'static str),
}

impl ChannelMatch {
    fn matches(self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => name == exact,
            Self::Prefix(prefix) => name.starts_with(prefix),
        }
    }
}

/// First channel kind in `table` whose pattern matches `name`.
pub fn resolve_channel<C: Copy>(table: &[(ChannelMatch, C)], name: &str) -> Option<C> {
    table
        .iter()
        .find(|(pattern, _)| pattern.matches(name))
        .map(|(_, kind)| *kind)
}

// =============================================================================
// Shared tables and helpers
// =============================================================================

/// `[price, volume]` book level.
pub static BOOK_LEVEL: MappingProfile = MappingProfile::new(
    "book_level",
    FragmentShape::Indexed,
    &[
        MappingRule::indexed(0, "price", Coercion::Float),
        MappingRule::indexed(1, "volume", Coercion::Float),
    ],
);

/// Stamp [`RESPOND_TIME_FIELD`] from an exchange timestamp, falling back to
/// the local receive time when the frame carries none.
///
/// # Errors
///
/// Returns [`MappingError`] when the timestamp is present but unusable.
pub fn stamp_respond_time(
    record: &mut CanonicalRecord,
    exchange_time: Option<&Value>,
    coercion: Coercion,
    received_at: DateTime<Utc>,
) -> Result<(), MappingError> {
    match exchange_time {
        Some(value) => {
            let stamped = SchemaMapper::coerce(value, coercion, RESPOND_TIME_FIELD)?;
            record.insert(RESPOND_TIME_FIELD, stamped);
        }
        None => record.set_respond_time(received_at),
    }
    Ok(())
}

/// Drop bars whose `completed` flag is false.
#[must_use]
pub fn completed_bar(record: CanonicalRecord) -> Option<CanonicalRecord> {
    match record.get("completed").and_then(FieldValue::as_bool) {
        Some(false) => None,
        _ => Some(record),
    }
}

/// Wrap a batch of rows as `{field: [rows...]}`.
#[must_use]
pub fn batch_record(field: &str, rows: Vec<CanonicalRecord>) -> CanonicalRecord {
    CanonicalRecord::new().with(field, rows)
}
