//! Binance spot streams.
//!
//! Subscriptions are `{"method":"SUBSCRIBE","params":["btcusdt@trade"],"id":n}`.
//! Data frames are flat objects tagged by `e` (event type) and `s` (symbol);
//! kline frames nest the bar under `k`.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::{ChannelMatch, completed_bar, resolve_channel, stamp_respond_time};
use crate::application::ports::{ChannelAdapter, Classified, DecodeError, Outbound};
use crate::domain::mapping::{
    Coercion, FragmentShape, MappingError, MappingProfile, MappingRule, SchemaMapper,
};
use crate::domain::record::{CanonicalRecord, FieldValue};
use crate::infrastructure::stream::codec::JsonCodec;

/// Public spot stream endpoint.
pub const DEFAULT_URL: &str = "wss://stream.binance.com:9443/ws";

/// Default markets.
pub const DEFAULT_MARKETS: &[&str] = &["btcusdt", "ethusdt"];

/// Default channels.
pub const DEFAULT_CHANNELS: &[&str] = &["ticker"];

/// Binance channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinanceChannel {
    /// `24hrTicker` events, stored under `ticker`.
    Ticker,
    /// Individual trades.
    Trade,
    /// Index price updates.
    Index,
    /// Candlesticks, stored under `kline_<interval>`.
    Kline,
}

const CHANNELS: &[(ChannelMatch, BinanceChannel)] = &[
    (ChannelMatch::Exact("24hrTicker"), BinanceChannel::Ticker),
    (ChannelMatch::Exact("trade"), BinanceChannel::Trade),
    (ChannelMatch::Exact("index"), BinanceChannel::Index),
    (ChannelMatch::Exact("kline"), BinanceChannel::Kline),
];

// =============================================================================
// Mapping tables
// =============================================================================

/// `trade` events.
pub static TRADE: MappingProfile = MappingProfile::new(
    "binance.trade",
    FragmentShape::Object,
    &[
        MappingRule::named("e", "event_type", Coercion::Text),
        MappingRule::named("E", "event_time_utc", Coercion::EpochMillis),
        MappingRule::named("s", "symbol", Coercion::Text),
        MappingRule::named("t", "trade_id", Coercion::Integer),
        MappingRule::named("p", "price", Coercion::Float),
        MappingRule::named("q", "quantity", Coercion::Float),
        MappingRule::named("b", "buy_order_id", Coercion::Integer),
        MappingRule::named("a", "sell_order_id", Coercion::Integer),
        MappingRule::named("T", "trade_time_utc", Coercion::EpochMillis),
        MappingRule::named("m", "buyer_is_maker", Coercion::Boolean),
    ],
)
.with_default_subset(&[
    "event_type",
    "event_time_utc",
    "trade_id",
    "price",
    "quantity",
    "buyer_is_maker",
]);

/// `24hrTicker` events.
pub static TICKER: MappingProfile = MappingProfile::new(
    "binance.ticker",
    FragmentShape::Object,
    &[
        MappingRule::named("e", "event_type", Coercion::Text),
        MappingRule::named("E", "event_time_utc", Coercion::EpochMillis),
        MappingRule::named("s", "symbol", Coercion::Text),
        MappingRule::named("p", "price_change", Coercion::Float),
        MappingRule::named("P", "price_change_pct", Coercion::Float),
        MappingRule::named("w", "weighted_avg_price", Coercion::Float),
        MappingRule::named("x", "prev_close", Coercion::Float),
        MappingRule::named("c", "close", Coercion::Float),
        MappingRule::named("Q", "last_quantity", Coercion::Float),
        MappingRule::named("b", "bid", Coercion::Float),
        MappingRule::named("B", "bid_quantity", Coercion::Float),
        MappingRule::named("a", "ask", Coercion::Float),
        MappingRule::named("A", "ask_quantity", Coercion::Float),
        MappingRule::named("o", "open", Coercion::Float),
        MappingRule::named("h", "high", Coercion::Float),
        MappingRule::named("l", "low", Coercion::Float),
        MappingRule::named("v", "traded_volume_base", Coercion::Float),
        MappingRule::named("q", "traded_volume_quote", Coercion::Float),
        MappingRule::named("O", "open_time_utc", Coercion::EpochMillis),
        MappingRule::named("C", "close_time_utc", Coercion::EpochMillis),
        MappingRule::named("F", "first_trade_id", Coercion::Integer),
        MappingRule::named("L", "last_trade_id", Coercion::Integer),
        MappingRule::named("n", "number_trades", Coercion::Integer),
    ],
)
.with_default_subset(&[
    "event_type",
    "event_time_utc",
    "open",
    "high",
    "low",
    "close",
    "bid",
    "ask",
    "bid_quantity",
    "ask_quantity",
    "price_change_pct",
    "traded_volume_quote",
]);

/// `index` events.
pub static INDEX: MappingProfile = MappingProfile::new(
    "binance.index",
    FragmentShape::Object,
    &[
        MappingRule::named("e", "event_type", Coercion::Text),
        MappingRule::named("E", "event_time_utc", Coercion::EpochMillis),
        MappingRule::named("s", "symbol", Coercion::Text),
        MappingRule::named("p", "price", Coercion::Float),
    ],
)
.with_default_subset(&["event_type", "event_time_utc", "price"]);

/// `kline` events, bar fields merged up from `k`.
pub static KLINE: MappingProfile = MappingProfile::new(
    "binance.kline",
    FragmentShape::Nested("k"),
    &[
        MappingRule::named("e", "event_type", Coercion::Text),
        MappingRule::named("E", "event_time_utc", Coercion::EpochMillis),
        MappingRule::named("s", "symbol", Coercion::Text),
        MappingRule::named("t", "start_time_utc", Coercion::EpochMillis),
        MappingRule::named("T", "end_time_utc", Coercion::EpochMillis),
        MappingRule::named("i", "period", Coercion::Text),
        MappingRule::named("f", "first_trade_id", Coercion::Integer),
        MappingRule::named("L", "last_trade_id", Coercion::Integer),
        MappingRule::named("o", "open", Coercion::Float),
        MappingRule::named("c", "close", Coercion::Float),
        MappingRule::named("h", "high", Coercion::Float),
        MappingRule::named("l", "low", Coercion::Float),
        MappingRule::named("v", "traded_volume_base", Coercion::Float),
        MappingRule::named("n", "number_trades", Coercion::Integer),
        MappingRule::named("x", "completed", Coercion::Boolean),
        MappingRule::named("q", "traded_volume_quote", Coercion::Float),
        MappingRule::named("V", "taker_buy_volume_base", Coercion::Float),
        MappingRule::named("Q", "taker_buy_volume_quote", Coercion::Float),
    ],
)
.with_default_subset(&[
    "event_type",
    "event_time_utc",
    "start_time_utc",
    "end_time_utc",
    "period",
    "open",
    "high",
    "low",
    "close",
    "traded_volume_base",
    "number_trades",
    "completed",
]);

/// Every Binance table.
pub static PROFILES: [&MappingProfile; 4] = [&TRADE, &TICKER, &INDEX, &KLINE];

// =============================================================================
// Adapter
// =============================================================================

/// Binance spot adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinanceAdapter {
    codec: JsonCodec,
}

impl BinanceAdapter {
    /// Create a new adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            codec: JsonCodec::new(),
        }
    }

    const fn profile(channel: BinanceChannel) -> &'static MappingProfile {
        match channel {
            BinanceChannel::Ticker => &TICKER,
            BinanceChannel::Trade => &TRADE,
            BinanceChannel::Index => &INDEX,
            BinanceChannel::Kline => &KLINE,
        }
    }
}

impl ChannelAdapter for BinanceAdapter {
    type Channel = BinanceChannel;

    fn exchange(&self) -> &'static str {
        "binance"
    }

    fn build_subscriptions(&self, markets: &[String], channels: &[String]) -> Vec<Outbound> {
        if markets.is_empty() {
            return Vec::new();
        }
        channels
            .iter()
            .enumerate()
            .map(|(id, channel)| {
                let params: Vec<String> = markets
                    .iter()
                    .map(|market| format!("{}@{channel}", market.to_lowercase()))
                    .collect();
                Outbound::text(json!({
                    "method": "SUBSCRIBE",
                    "params": params,
                    "id": id + 1,
                }))
            })
            .collect()
    }

    fn decode_frame(&self, raw: &[u8]) -> Result<Value, DecodeError> {
        self.codec.decode(raw)
    }

    fn classify(&self, message: &Value) -> Classified<BinanceChannel> {
        let Some(event) = message.get("e").and_then(Value::as_str) else {
            // `{"result":null,"id":1}` acknowledgements and the like.
            return Classified::Control;
        };
        let Some(kind) = resolve_channel(CHANNELS, event) else {
            return Classified::Unknown(event.to_string());
        };
        let Some(symbol) = message.get("s").and_then(Value::as_str) else {
            return Classified::Unknown(event.to_string());
        };

        let channel = match kind {
            BinanceChannel::Ticker => "ticker".to_string(),
            BinanceChannel::Trade => "trade".to_string(),
            BinanceChannel::Index => "index".to_string(),
            BinanceChannel::Kline => {
                match message.pointer("/k/i").and_then(Value::as_str) {
                    Some(interval) => format!("kline_{interval}"),
                    None => return Classified::Unknown(event.to_string()),
                }
            }
        };

        Classified::Data {
            channel,
            kind,
            market: symbol.to_lowercase(),
        }
    }

    fn dispatch(
        &self,
        channel: BinanceChannel,
        message: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<Option<CanonicalRecord>, MappingError> {
        let mut record = SchemaMapper::parse(message, Self::profile(channel), None)?;

        if channel == BinanceChannel::Trade {
            // Spot trades carry the maker flag only; the aggressor side follows from it.
            if let Some(maker) = record.get("buyer_is_maker").and_then(FieldValue::as_bool) {
                record.insert("side", if maker { "sell" } else { "buy" });
            }
        }

        stamp_respond_time(&mut record, message.get("E"), Coercion::EpochMillis, received_at)?;

        Ok(match channel {
            BinanceChannel::Kline => completed_bar(record),
            _ => Some(record),
        })
    }

    fn keep_alive(&self) -> Option<Outbound> {
        Some(Outbound::Ping(b"keepalive".to_vec()))
    }
}
