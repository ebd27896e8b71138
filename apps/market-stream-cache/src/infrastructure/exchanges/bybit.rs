//! Bybit v5 public spot streams.
//!
//! Every data frame is `{"topic": "<channel>.<symbol>", "ts": .., "data": ..}`
//! where `<channel>` may itself contain dots (`orderbook.50`, `kline.1`).
//! Operation replies (`{"op": "subscribe", "success": true}`, pongs) carry
//! no topic.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::{
    BOOK_LEVEL, ChannelMatch, batch_record, completed_bar, resolve_channel, stamp_respond_time,
};
use crate::application::ports::{ChannelAdapter, Classified, DecodeError, Outbound};
use crate::domain::mapping::{
    Coercion, FragmentShape, MappingError, MappingProfile, MappingRule, SchemaMapper,
};
use crate::domain::record::CanonicalRecord;
use crate::infrastructure::stream::codec::JsonCodec;

/// Public spot stream endpoint.
pub const DEFAULT_URL: &str = "wss://stream.bybit.com/v5/public/spot";

/// Default markets.
pub const DEFAULT_MARKETS: &[&str] = &["BTCUSDT", "ETHUSDT"];

/// Default channels.
pub const DEFAULT_CHANNELS: &[&str] = &["tickers"];

/// Bybit closes connections that send nothing for 30 s.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Bybit channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BybitChannel {
    /// `tickers` snapshots.
    Ticker,
    /// `publicTrade` batches.
    Trade,
    /// `orderbook.<depth>` snapshots and deltas.
    Depth,
    /// `kline.<interval>` bars.
    Kline,
}

const CHANNELS: &[(ChannelMatch, BybitChannel)] = &[
    (ChannelMatch::Exact("tickers"), BybitChannel::Ticker),
    (ChannelMatch::Exact("publicTrade"), BybitChannel::Trade),
    (ChannelMatch::Prefix("orderbook."), BybitChannel::Depth),
    (ChannelMatch::Prefix("kline."), BybitChannel::Kline),
];

// =============================================================================
// Mapping tables
// =============================================================================

/// `tickers` data object.
pub static TICKER: MappingProfile = MappingProfile::new(
    "bybit.ticker",
    FragmentShape::Object,
    &[
        MappingRule::named("symbol", "symbol", Coercion::Text),
        MappingRule::named("prevPrice24h", "open", Coercion::Float),
        MappingRule::named("highPrice24h", "high", Coercion::Float),
        MappingRule::named("lowPrice24h", "low", Coercion::Float),
        MappingRule::named("lastPrice", "close", Coercion::Float),
        MappingRule::named("bid1Price", "bid", Coercion::Float),
        MappingRule::named("bid1Size", "bid_quantity", Coercion::Float),
        MappingRule::named("ask1Price", "ask", Coercion::Float),
        MappingRule::named("ask1Size", "ask_quantity", Coercion::Float),
        MappingRule::named("volume24h", "volume", Coercion::Float),
        MappingRule::named("turnover24h", "turnover", Coercion::Float),
        MappingRule::named("price24hPcnt", "price_change_pct", Coercion::Float),
        MappingRule::named("usdIndexPrice", "usd_index_price", Coercion::Float),
    ],
)
.with_default_subset(&[
    "open",
    "high",
    "low",
    "close",
    "bid",
    "ask",
    "volume",
    "turnover",
    "price_change_pct",
    "usd_index_price",
]);

/// One `publicTrade` row.
pub static TRADE_ROW: MappingProfile = MappingProfile::new(
    "bybit.trade",
    FragmentShape::Object,
    &[
        MappingRule::named("i", "trade_id", Coercion::Text),
        MappingRule::named("T", "trade_time_utc", Coercion::EpochMillis),
        MappingRule::named("p", "price", Coercion::Float),
        MappingRule::named("v", "quantity", Coercion::Float),
        MappingRule::named("S", "side", Coercion::Text),
        MappingRule::named("s", "symbol", Coercion::Text),
        MappingRule::named("L", "tick_direction", Coercion::Text),
        MappingRule::named("BT", "block_trade", Coercion::Boolean),
    ],
)
.with_default_subset(&["trade_id", "trade_time_utc", "price", "quantity", "side"]);

/// `orderbook.<depth>` data object.
pub static DEPTH: MappingProfile = MappingProfile::new(
    "bybit.depth",
    FragmentShape::Object,
    &[
        MappingRule::named("s", "symbol", Coercion::Text),
        MappingRule::named("b", "bids", Coercion::Rows(&BOOK_LEVEL)),
        MappingRule::named("a", "asks", Coercion::Rows(&BOOK_LEVEL)),
        MappingRule::named("u", "update_id", Coercion::Integer),
        MappingRule::named("seq", "seq", Coercion::Integer),
    ],
)
.with_default_subset(&["bids", "asks", "update_id", "seq"]);

/// One `kline.<interval>` bar.
pub static KLINE: MappingProfile = MappingProfile::new(
    "bybit.kline",
    FragmentShape::Object,
    &[
        MappingRule::named("start", "start_time_utc", Coercion::EpochMillis),
        MappingRule::named("end", "end_time_utc", Coercion::EpochMillis),
        MappingRule::named("interval", "period", Coercion::Text),
        MappingRule::named("open", "open", Coercion::Float),
        MappingRule::named("close", "close", Coercion::Float),
        MappingRule::named("high", "high", Coercion::Float),
        MappingRule::named("low", "low", Coercion::Float),
        MappingRule::named("volume", "volume", Coercion::Float),
        MappingRule::named("turnover", "turnover", Coercion::Float),
        MappingRule::named("confirm", "completed", Coercion::Boolean),
        MappingRule::named("timestamp", "event_time_utc", Coercion::EpochMillis),
    ],
);

/// Every Bybit table.
pub static PROFILES: [&MappingProfile; 4] = [&TICKER, &TRADE_ROW, &DEPTH, &KLINE];

// =============================================================================
// Adapter
// =============================================================================

/// Bybit v5 spot adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct BybitAdapter {
    codec: JsonCodec,
}

impl BybitAdapter {
    /// Create a new adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            codec: JsonCodec::new(),
        }
    }

    fn data<'m>(message: &'m Value, profile: &MappingProfile) -> Result<&'m Value, MappingError> {
        message.get("data").ok_or(MappingError::MissingField {
            profile: profile.name,
            field: "data",
        })
    }
}

impl ChannelAdapter for BybitAdapter {
    type Channel = BybitChannel;

    fn exchange(&self) -> &'static str {
        "bybit"
    }

    fn build_subscriptions(&self, markets: &[String], channels: &[String]) -> Vec<Outbound> {
        markets
            .iter()
            .flat_map(|market| {
                channels.iter().map(move |channel| {
                    Outbound::text(json!({
                        "op": "subscribe",
                        "args": [format!("{channel}.{market}")],
                    }))
                })
            })
            .collect()
    }

    fn decode_frame(&self, raw: &[u8]) -> Result<Value, DecodeError> {
        self.codec.decode(raw)
    }

    fn classify(&self, message: &Value) -> Classified<BybitChannel> {
        let Some(topic) = message.get("topic").and_then(Value::as_str) else {
            return Classified::Control;
        };
        let Some((channel, market)) = topic.rsplit_once('.') else {
            return Classified::Unknown(topic.to_string());
        };
        match resolve_channel(CHANNELS, channel) {
            Some(kind) => Classified::Data {
                channel: channel.to_string(),
                kind,
                market: market.to_string(),
            },
            None => Classified::Unknown(channel.to_string()),
        }
    }

    fn dispatch(
        &self,
        channel: BybitChannel,
        message: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<Option<CanonicalRecord>, MappingError> {
        let mut record = match channel {
            BybitChannel::Ticker => SchemaMapper::parse(Self::data(message, &TICKER)?, &TICKER, None)?,
            BybitChannel::Depth => {
                let mut record = SchemaMapper::parse(Self::data(message, &DEPTH)?, &DEPTH, None)?;
                if let Some(kind) = message.get("type").and_then(Value::as_str) {
                    record.insert("update_type", kind);
                }
                record
            }
            BybitChannel::Trade => {
                let rows = SchemaMapper::parse_rows(Self::data(message, &TRADE_ROW)?, &TRADE_ROW, None)?;
                batch_record("trade", rows)
            }
            BybitChannel::Kline => {
                let bar = Self::data(message, &KLINE)?
                    .get(0)
                    .ok_or(MappingError::UnexpectedShape {
                        profile: KLINE.name,
                        expected: "non-empty bar list",
                    })?;
                SchemaMapper::parse(bar, &KLINE, None)?
            }
        };

        stamp_respond_time(&mut record, message.get("ts"), Coercion::EpochMillis, received_at)?;

        Ok(match channel {
            BybitChannel::Kline => completed_bar(record),
            _ => Some(record),
        })
    }

    fn keep_alive(&self) -> Option<Outbound> {
        Some(Outbound::text(json!({"op": "ping"})))
    }
}
