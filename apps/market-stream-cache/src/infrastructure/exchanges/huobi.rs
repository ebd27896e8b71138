//! Huobi (HTX) spot streams.
//!
//! Every frame is gzip-compressed JSON. Data frames look like
//! `{"ch": "market.btcusdt.ticker", "ts": .., "tick": {..}}`; the server
//! pings with `{"ping": n}` and drops connections that do not answer
//! `{"pong": n}`.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::{BOOK_LEVEL, ChannelMatch, batch_record, resolve_channel, stamp_respond_time};
use crate::application::ports::{ChannelAdapter, Classified, DecodeError, Outbound};
use crate::domain::mapping::{
    Coercion, FragmentShape, MappingError, MappingProfile, MappingRule, SchemaMapper,
};
use crate::domain::record::CanonicalRecord;
use crate::infrastructure::stream::codec::GzipJsonCodec;

/// Public spot stream endpoint.
pub const DEFAULT_URL: &str = "wss://api.huobi.pro/ws";

/// Default markets.
pub const DEFAULT_MARKETS: &[&str] = &["btcusdt", "ethusdt"];

/// Default channels.
pub const DEFAULT_CHANNELS: &[&str] = &["ticker"];

/// Huobi channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuobiChannel {
    /// 24h rolling ticker.
    Ticker,
    /// Best bid and offer.
    Bbo,
    /// 24h market detail.
    Detail,
    /// Trade batches.
    Trade,
    /// `depth.step<n>` and `mbp.refresh.<n>` books.
    Depth,
    /// `kline.<period>` bars.
    Kline,
}

const CHANNELS: &[(ChannelMatch, HuobiChannel)] = &[
    (ChannelMatch::Exact("ticker"), HuobiChannel::Ticker),
    (ChannelMatch::Exact("bbo"), HuobiChannel::Bbo),
    (ChannelMatch::Exact("detail"), HuobiChannel::Detail),
    (ChannelMatch::Exact("trade.detail"), HuobiChannel::Trade),
    (ChannelMatch::Prefix("depth.step"), HuobiChannel::Depth),
    (ChannelMatch::Prefix("mbp.refresh."), HuobiChannel::Depth),
    (ChannelMatch::Prefix("kline."), HuobiChannel::Kline),
];

// =============================================================================
// Mapping tables
// =============================================================================

/// `ticker` tick.
pub static TICKER: MappingProfile = MappingProfile::new(
    "huobi.ticker",
    FragmentShape::Object,
    &[
        MappingRule::named("open", "open", Coercion::Float),
        MappingRule::named("high", "high", Coercion::Float),
        MappingRule::named("low", "low", Coercion::Float),
        MappingRule::named("close", "close", Coercion::Float),
        MappingRule::named("amount", "volume_base", Coercion::Float),
        MappingRule::named("vol", "volume_quote", Coercion::Float),
        MappingRule::named("count", "number_trades", Coercion::Integer),
        MappingRule::named("bid", "bid", Coercion::Float),
        MappingRule::named("bidSize", "bid_quantity", Coercion::Float),
        MappingRule::named("ask", "ask", Coercion::Float),
        MappingRule::named("askSize", "ask_quantity", Coercion::Float),
        MappingRule::named("lastPrice", "last", Coercion::Float),
        MappingRule::named("lastSize", "last_quantity", Coercion::Float),
    ],
);

/// `bbo` tick.
pub static BBO: MappingProfile = MappingProfile::new(
    "huobi.bbo",
    FragmentShape::Object,
    &[
        MappingRule::named("seqId", "seq", Coercion::Integer),
        MappingRule::named("bid", "bid", Coercion::Float),
        MappingRule::named("bidSize", "bid_quantity", Coercion::Float),
        MappingRule::named("ask", "ask", Coercion::Float),
        MappingRule::named("askSize", "ask_quantity", Coercion::Float),
        MappingRule::named("quoteTime", "quote_time_utc", Coercion::EpochMillis),
        MappingRule::named("symbol", "symbol", Coercion::Text),
    ],
)
.with_default_subset(&[
    "seq",
    "bid",
    "bid_quantity",
    "ask",
    "ask_quantity",
    "quote_time_utc",
]);

/// `detail` tick.
pub static DETAIL: MappingProfile = MappingProfile::new(
    "huobi.detail",
    FragmentShape::Object,
    &[
        MappingRule::named("id", "id", Coercion::Integer),
        MappingRule::named("open", "open", Coercion::Float),
        MappingRule::named("high", "high", Coercion::Float),
        MappingRule::named("low", "low", Coercion::Float),
        MappingRule::named("close", "close", Coercion::Float),
        MappingRule::named("amount", "volume_base", Coercion::Float),
        MappingRule::named("vol", "volume_quote", Coercion::Float),
        MappingRule::named("count", "number_trades", Coercion::Integer),
        MappingRule::named("version", "version", Coercion::Integer),
    ],
)
.with_default_subset(&[
    "open",
    "high",
    "low",
    "close",
    "volume_base",
    "volume_quote",
    "number_trades",
]);

/// One `trade.detail` row. Trade `id`s overflow 64 bits and stay unmapped.
pub static TRADE_ROW: MappingProfile = MappingProfile::new(
    "huobi.trade",
    FragmentShape::Object,
    &[
        MappingRule::named("tradeId", "trade_id", Coercion::Integer),
        MappingRule::named("ts", "trade_time_utc", Coercion::EpochMillis),
        MappingRule::named("price", "price", Coercion::Float),
        MappingRule::named("amount", "quantity", Coercion::Float),
        MappingRule::named("direction", "side", Coercion::Text),
    ],
);

/// `depth.step<n>` and `mbp.refresh.<n>` tick.
pub static DEPTH: MappingProfile = MappingProfile::new(
    "huobi.depth",
    FragmentShape::Object,
    &[
        MappingRule::named("bids", "bids", Coercion::Rows(&BOOK_LEVEL)),
        MappingRule::named("asks", "asks", Coercion::Rows(&BOOK_LEVEL)),
        MappingRule::named("version", "version", Coercion::Integer),
        MappingRule::named("seqNum", "seq", Coercion::Integer),
        MappingRule::named("ts", "time_utc", Coercion::EpochMillis),
    ],
);

/// `kline.<period>` tick. `id` is the bar open time in epoch seconds.
pub static KLINE: MappingProfile = MappingProfile::new(
    "huobi.kline",
    FragmentShape::Object,
    &[
        MappingRule::named("id", "start_time_utc", Coercion::EpochSeconds),
        MappingRule::named("open", "open", Coercion::Float),
        MappingRule::named("close", "close", Coercion::Float),
        MappingRule::named("low", "low", Coercion::Float),
        MappingRule::named("high", "high", Coercion::Float),
        MappingRule::named("amount", "volume_base", Coercion::Float),
        MappingRule::named("vol", "volume_quote", Coercion::Float),
        MappingRule::named("count", "number_trades", Coercion::Integer),
    ],
);

/// Every Huobi table.
pub static PROFILES: [&MappingProfile; 6] = [&TICKER, &BBO, &DETAIL, &TRADE_ROW, &DEPTH, &KLINE];

// =============================================================================
// Adapter
// =============================================================================

/// Huobi spot adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct HuobiAdapter {
    codec: GzipJsonCodec,
}

impl HuobiAdapter {
    /// Create a new adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            codec: GzipJsonCodec::new(),
        }
    }

    const fn profile(channel: HuobiChannel) -> &'static MappingProfile {
        match channel {
            HuobiChannel::Ticker => &TICKER,
            HuobiChannel::Bbo => &BBO,
            HuobiChannel::Detail => &DETAIL,
            HuobiChannel::Trade => &TRADE_ROW,
            HuobiChannel::Depth => &DEPTH,
            HuobiChannel::Kline => &KLINE,
        }
    }
}

impl ChannelAdapter for HuobiAdapter {
    type Channel = HuobiChannel;

    fn exchange(&self) -> &'static str {
        "huobi"
    }

    fn build_subscriptions(&self, markets: &[String], channels: &[String]) -> Vec<Outbound> {
        markets
            .iter()
            .flat_map(|market| {
                channels.iter().map(move |channel| {
                    let topic = format!("market.{}.{channel}", market.to_lowercase());
                    Outbound::text(json!({"sub": topic, "id": topic}))
                })
            })
            .collect()
    }

    fn decode_frame(&self, raw: &[u8]) -> Result<Value, DecodeError> {
        self.codec.decode(raw)
    }

    fn classify(&self, message: &Value) -> Classified<HuobiChannel> {
        if let Some(ping) = message.get("ping") {
            return Classified::Reply(Outbound::text(json!({"pong": ping})));
        }
        let Some(topic) = message.get("ch").and_then(Value::as_str) else {
            return Classified::Control;
        };

        let mut parts = topic.splitn(3, '.');
        let (Some("market"), Some(market), Some(channel)) = (parts.next(), parts.next(), parts.next())
        else {
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
        channel: HuobiChannel,
        message: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<Option<CanonicalRecord>, MappingError> {
        let profile = Self::profile(channel);
        let tick = message.get("tick").ok_or(MappingError::MissingField {
            profile: profile.name,
            field: "tick",
        })?;

        let mut record = if channel == HuobiChannel::Trade {
            let rows = tick.get("data").ok_or(MappingError::MissingField {
                profile: profile.name,
                field: "data",
            })?;
            batch_record("trade", SchemaMapper::parse_rows(rows, profile, None)?)
        } else {
            SchemaMapper::parse(tick, profile, None)?
        };

        stamp_respond_time(&mut record, message.get("ts"), Coercion::EpochMillis, received_at)?;
        Ok(Some(record))
    }

    fn keep_alive(&self) -> Option<Outbound> {
        None
    }
}
