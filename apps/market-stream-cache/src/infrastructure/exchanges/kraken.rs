//! Kraken websocket v1.
//!
//! Data frames are arrays `[channelID, payload, channelName, pair]`; book
//! updates touching both sides carry two payload objects
//! (`[id, {"a": ..}, {"b": .., "c": ..}, "book-10", "XBT/USD"]`). Objects
//! are always events (`heartbeat`, `systemStatus`, `subscriptionStatus`,
//! `pong`). Kraken frames carry no frame-level timestamp, so records are
//! stamped with the local receive time.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use super::{ChannelMatch, batch_record, resolve_channel, stamp_respond_time};
use crate::application::ports::{ChannelAdapter, Classified, DecodeError, Outbound};
use crate::domain::mapping::{
    Coercion, FragmentShape, MappingError, MappingProfile, MappingRule, SchemaMapper,
};
use crate::domain::record::{CanonicalRecord, FieldValue};
use crate::infrastructure::stream::codec::JsonCodec;

/// Public stream endpoint.
pub const DEFAULT_URL: &str = "wss://ws.kraken.com";

/// Default markets.
pub const DEFAULT_MARKETS: &[&str] = &["XBT/USD", "ETH/USD"];

/// Default channels.
pub const DEFAULT_CHANNELS: &[&str] = &["ticker"];

/// Kraken channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrakenChannel {
    /// Ticker (object of arrays).
    Ticker,
    /// Trade batches.
    Trade,
    /// Best bid/ask spread.
    Spread,
    /// `book-<depth>` snapshots and updates.
    Book,
    /// `ohlc-<interval>` bars.
    Ohlc,
}

const CHANNELS: &[(ChannelMatch, KrakenChannel)] = &[
    (ChannelMatch::Exact("ticker"), KrakenChannel::Ticker),
    (ChannelMatch::Exact("trade"), KrakenChannel::Trade),
    (ChannelMatch::Exact("spread"), KrakenChannel::Spread),
    (ChannelMatch::Prefix("book-"), KrakenChannel::Book),
    (ChannelMatch::Prefix("ohlc-"), KrakenChannel::Ohlc),
];

// =============================================================================
// Mapping tables
// =============================================================================

/// Ticker payload, arrays flattened to `a0`, `a1`, ...
pub static TICKER: MappingProfile = MappingProfile::new(
    "kraken.ticker",
    FragmentShape::Suffixed,
    &[
        MappingRule::named("a0", "ask", Coercion::Float),
        MappingRule::named("a1", "ask_whole_lot_volume", Coercion::Integer),
        MappingRule::named("a2", "ask_volume", Coercion::Float),
        MappingRule::named("b0", "bid", Coercion::Float),
        MappingRule::named("b1", "bid_whole_lot_volume", Coercion::Integer),
        MappingRule::named("b2", "bid_volume", Coercion::Float),
        MappingRule::named("c0", "close", Coercion::Float),
        MappingRule::named("c1", "close_volume", Coercion::Float),
        MappingRule::named("v0", "volume_today", Coercion::Float),
        MappingRule::named("v1", "volume", Coercion::Float),
        MappingRule::named("p0", "vwap_today", Coercion::Float),
        MappingRule::named("p1", "vwap", Coercion::Float),
        MappingRule::named("t0", "number_trades_today", Coercion::Integer),
        MappingRule::named("t1", "number_trades", Coercion::Integer),
        MappingRule::named("l0", "low_today", Coercion::Float),
        MappingRule::named("l1", "low", Coercion::Float),
        MappingRule::named("h0", "high_today", Coercion::Float),
        MappingRule::named("h1", "high", Coercion::Float),
        MappingRule::named("o0", "open_today", Coercion::Float),
        MappingRule::named("o1", "open", Coercion::Float),
    ],
)
.with_default_subset(&[
    "ask",
    "ask_volume",
    "bid",
    "bid_volume",
    "close",
    "close_volume",
    "open",
    "high",
    "low",
    "volume",
    "vwap",
    "number_trades",
]);

/// One trade row.
pub static TRADE_ROW: MappingProfile = MappingProfile::new(
    "kraken.trade",
    FragmentShape::Indexed,
    &[
        MappingRule::indexed(0, "price", Coercion::Float),
        MappingRule::indexed(1, "quantity", Coercion::Float),
        MappingRule::indexed(2, "trade_time_utc", Coercion::EpochSeconds),
        MappingRule::indexed(3, "side", Coercion::Text),
        MappingRule::indexed(4, "order_type", Coercion::Text),
        MappingRule::indexed(5, "misc", Coercion::Text),
    ],
)
.with_default_subset(&["price", "quantity", "trade_time_utc", "side", "order_type"]);

/// Spread payload.
pub static SPREAD: MappingProfile = MappingProfile::new(
    "kraken.spread",
    FragmentShape::Indexed,
    &[
        MappingRule::indexed(0, "bid", Coercion::Float),
        MappingRule::indexed(1, "ask", Coercion::Float),
        MappingRule::indexed(2, "time_utc", Coercion::EpochSeconds),
        MappingRule::indexed(3, "bid_volume", Coercion::Float),
        MappingRule::indexed(4, "ask_volume", Coercion::Float),
    ],
);

/// OHLC payload.
pub static OHLC: MappingProfile = MappingProfile::new(
    "kraken.ohlc",
    FragmentShape::Indexed,
    &[
        MappingRule::indexed(0, "start_time_utc", Coercion::EpochSeconds),
        MappingRule::indexed(1, "end_time_utc", Coercion::EpochSeconds),
        MappingRule::indexed(2, "open", Coercion::Float),
        MappingRule::indexed(3, "high", Coercion::Float),
        MappingRule::indexed(4, "low", Coercion::Float),
        MappingRule::indexed(5, "close", Coercion::Float),
        MappingRule::indexed(6, "vwap", Coercion::Float),
        MappingRule::indexed(7, "volume", Coercion::Float),
        MappingRule::indexed(8, "number_trades", Coercion::Integer),
    ],
);

/// `[price, volume, timestamp]` book level; updates may append an `r` flag.
pub static BOOK_LEVEL: MappingProfile = MappingProfile::new(
    "kraken.book_level",
    FragmentShape::Indexed,
    &[
        MappingRule::indexed(0, "price", Coercion::Float),
        MappingRule::indexed(1, "volume", Coercion::Float),
        MappingRule::indexed(2, "time_utc", Coercion::EpochSeconds),
    ],
);

/// Book payload with snapshot keys (`as`/`bs`) folded into the update keys.
pub static BOOK: MappingProfile = MappingProfile::new(
    "kraken.book",
    FragmentShape::Object,
    &[
        MappingRule::named("a", "asks", Coercion::Rows(&BOOK_LEVEL)),
        MappingRule::named("b", "bids", Coercion::Rows(&BOOK_LEVEL)),
        MappingRule::named("c", "checksum", Coercion::Text),
    ],
);

/// Every Kraken table.
pub static PROFILES: [&MappingProfile; 6] =
    [&TICKER, &TRADE_ROW, &SPREAD, &OHLC, &BOOK_LEVEL, &BOOK];

// =============================================================================
// Adapter
// =============================================================================

/// Kraken v1 adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct KrakenAdapter {
    codec: JsonCodec,
}

impl KrakenAdapter {
    /// Create a new adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            codec: JsonCodec::new(),
        }
    }

    /// Subscription object for a channel name, expanding `book-<depth>` and
    /// `ohlc-<interval>`.
    fn subscription(channel: &str) -> Value {
        match channel.split_once('-') {
            Some(("book", depth)) => match depth.parse::<u32>() {
                Ok(depth) => json!({"name": "book", "depth": depth}),
                Err(_) => json!({"name": "book"}),
            },
            Some(("ohlc", interval)) => match interval.parse::<u32>() {
                Ok(interval) => json!({"name": "ohlc", "interval": interval}),
                Err(_) => json!({"name": "ohlc"}),
            },
            _ => json!({"name": channel}),
        }
    }

    /// Payload objects between the channel id and the channel name, merged.
    /// Merge the one or two payload objects of a book frame. Returns the
    /// merged payload and whether it was a snapshot.
    fn book_payload(frame: &[Value]) -> Result<(Value, bool), MappingError> {
        let payloads = frame.get(1..frame.len().saturating_sub(2)).unwrap_or_default();
        let mut merged = Map::new();
        let mut snapshot = false;
        for payload in payloads {
            let object = payload.as_object().ok_or(MappingError::UnexpectedShape {
                profile: BOOK.name,
                expected: "object",
            })?;
            for (key, value) in object {
                let (key, is_snapshot) = match key.as_str() {
                    "as" => ("a", true),
                    "bs" => ("b", true),
                    other => (other, false),
                };
                snapshot |= is_snapshot;
                merged.insert(key.to_string(), value.clone());
            }
        }
        Ok((Value::Object(merged), snapshot))
    }

    fn normalize_sides(rows: &mut [CanonicalRecord]) {
        for row in rows {
            let side = match row.get("side").and_then(FieldValue::as_str) {
                Some("b") => "buy",
                Some("s") => "sell",
                _ => continue,
            };
            row.insert("side", side);
        }
    }
}

impl ChannelAdapter for KrakenAdapter {
    type Channel = KrakenChannel;

    fn exchange(&self) -> &'static str {
        "kraken"
    }

    fn build_subscriptions(&self, markets: &[String], channels: &[String]) -> Vec<Outbound> {
        markets
            .iter()
            .flat_map(|market| {
                channels.iter().map(move |channel| {
                    Outbound::text(json!({
                        "event": "subscribe",
                        "pair": [market],
                        "subscription": Self::subscription(channel),
                    }))
                })
            })
            .collect()
    }

    fn decode_frame(&self, raw: &[u8]) -> Result<Value, DecodeError> {
        self.codec.decode(raw)
    }

    fn classify(&self, message: &Value) -> Classified<KrakenChannel> {
        let Some(frame) = message.as_array() else {
            return Classified::Control;
        };
        let [.., name, pair] = frame.as_slice() else {
            return Classified::Control;
        };
        if frame.len() < 4 {
            return Classified::Control;
        }
        let (Some(name), Some(pair)) = (name.as_str(), pair.as_str()) else {
            return Classified::Unknown(message.to_string());
        };
        match resolve_channel(CHANNELS, name) {
            Some(kind) => Classified::Data {
                channel: name.to_string(),
                kind,
                market: pair.to_string(),
            },
            None => Classified::Unknown(name.to_string()),
        }
    }

    fn dispatch(
        &self,
        channel: KrakenChannel,
        message: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<Option<CanonicalRecord>, MappingError> {
        let frame = message
            .as_array()
            .filter(|frame| frame.len() >= 4)
            .ok_or(MappingError::UnexpectedShape {
                profile: "kraken",
                expected: "[channelID, payload, channelName, pair]",
            })?;
        let payload = &frame[1];

        let mut record = match channel {
            KrakenChannel::Ticker => SchemaMapper::parse(payload, &TICKER, None)?,
            KrakenChannel::Spread => SchemaMapper::parse(payload, &SPREAD, None)?,
            KrakenChannel::Ohlc => SchemaMapper::parse(payload, &OHLC, None)?,
            KrakenChannel::Book => {
                let (payload, snapshot) = Self::book_payload(frame)?;
                let mut record = SchemaMapper::parse(&payload, &BOOK, None)?;
                record.insert("update_type", if snapshot { "snapshot" } else { "delta" });
                record
            }
            KrakenChannel::Trade => {
                let mut rows = SchemaMapper::parse_rows(payload, &TRADE_ROW, None)?;
                Self::normalize_sides(&mut rows);
                batch_record("trade", rows)
            }
        };

        stamp_respond_time(&mut record, None, Coercion::EpochSeconds, received_at)?;
        Ok(Some(record))
    }

    fn keep_alive(&self) -> Option<Outbound> {
        Some(Outbound::text(json!({"event": "ping"})))
    }
}
