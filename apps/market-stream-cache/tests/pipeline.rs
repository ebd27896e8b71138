//! Pipeline Integration Tests
//!
//! Raw exchange frames through decode, classify and dispatch into the state
//! cache, with the in-memory store standing in for Redis.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::io::Write;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};

use market_stream_cache::{
    BinanceAdapter, BybitAdapter, CacheSettings, ChannelAdapter, Classified, HuobiAdapter,
    InMemoryStore, KrakenAdapter, Outbound, StateCache, Translator,
};

fn settings(exchange: &str) -> CacheSettings {
    CacheSettings {
        do_cache: true,
        caching_freq: Duration::from_millis(250),
        caching_key: format!("cache:{exchange}"),
        ttl: Duration::from_secs(60),
        do_publish: true,
        publish_channel: format!("pub:{exchange}"),
    }
}

/// What one frame turned into.
#[derive(Debug, PartialEq)]
enum Handled {
    Accepted { channel: String, market: String },
    Replied(Outbound),
    Skipped,
}

/// The per-frame path of a session, without the transport.
async fn handle<A: ChannelAdapter>(
    adapter: &A,
    translate: &Translator,
    cache: &mut StateCache<InMemoryStore>,
    raw: &[u8],
) -> Handled {
    let received_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    let message = adapter.decode_frame(raw).unwrap();

    match adapter.classify(&message) {
        Classified::Data {
            channel,
            kind,
            market,
        } => match adapter.dispatch(kind, &message, received_at) {
            Ok(Some(record)) => {
                let market = translate.translate(&market).to_string();
                cache.accept(&channel, &market, record).await.unwrap();
                Handled::Accepted { channel, market }
            }
            Ok(None) | Err(_) => Handled::Skipped,
        },
        Classified::Reply(frame) => Handled::Replied(frame),
        Classified::Control | Classified::Unknown(_) => Handled::Skipped,
    }
}

fn text(value: &Value) -> Vec<u8> {
    value.to_string().into_bytes()
}

fn gzip(value: &Value) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(value.to_string().as_bytes()).unwrap();
    encoder.finish().unwrap()
}

fn cache_for(exchange: &str, store: &InMemoryStore, channels: &[&str]) -> StateCache<InMemoryStore> {
    StateCache::new(settings(exchange), store.clone(), channels.iter().copied())
}

// =============================================================================
// Binance
// =============================================================================

#[tokio::test(start_paused = true)]
async fn binance_ticker_is_published_then_flushed() {
    let adapter = BinanceAdapter::new();
    let store = InMemoryStore::new();
    let mut cache = cache_for("binance", &store, &["ticker"]);
    let translate = Translator::default();

    let ack = handle(&adapter, &translate, &mut cache, &text(&json!({"result": null, "id": 1}))).await;
    assert_eq!(ack, Handled::Skipped);

    let frame = json!({
        "e": "24hrTicker", "E": 1_690_000_000_000_i64, "s": "BTCUSDT",
        "P": "1.5", "c": "30010", "b": "30009.9", "B": "2", "a": "30010.1", "A": "3",
        "o": "29500", "h": "30100", "l": "29400", "q": "123456.7"
    });
    let handled = handle(&adapter, &translate, &mut cache, &text(&frame)).await;
    assert_eq!(
        handled,
        Handled::Accepted {
            channel: "ticker".into(),
            market: "btcusdt".into()
        }
    );

    let published = store.published_json("pub:binance:ticker");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["btcusdt"]["close"], json!(30010.0));
    assert_eq!(
        published[0]["btcusdt"]["respond_time_utc"],
        json!("2023-07-22 04:26:40.000")
    );

    // First flush is due one interval after construction.
    assert!(store.get_json("cache:binance:ticker").is_none());

    tokio::time::advance(Duration::from_millis(250)).await;
    handle(&adapter, &translate, &mut cache, &text(&frame)).await;

    let snapshot = store.get_json("cache:binance:ticker").unwrap();
    assert_eq!(snapshot["btcusdt"]["bid"], json!(30009.9));
    assert_eq!(store.get("cache:binance:ticker").unwrap().ttl, Duration::from_secs(60));
    assert_eq!(store.published_json("pub:binance:ticker").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn binance_open_kline_never_reaches_the_table() {
    let adapter = BinanceAdapter::new();
    let store = InMemoryStore::new();
    let mut cache = cache_for("binance", &store, &[]);
    let translate = Translator::default();

    let open = json!({
        "e": "kline", "E": 1_690_000_000_000_i64, "s": "BTCUSDT",
        "k": {"t": 1_689_999_940_000_i64, "T": 1_689_999_999_999_i64, "i": "1m",
              "o": "1", "c": "2", "h": "3", "l": "0.5", "v": "10", "n": 4, "x": false}
    });
    assert_eq!(handle(&adapter, &translate, &mut cache, &text(&open)).await, Handled::Skipped);
    assert!(cache.table().get("kline_1m", "btcusdt").is_none());

    let mut closed = open;
    closed["k"]["x"] = json!(true);
    assert_eq!(
        handle(&adapter, &translate, &mut cache, &text(&closed)).await,
        Handled::Accepted {
            channel: "kline_1m".into(),
            market: "btcusdt".into()
        }
    );
    assert!(cache.table().get("kline_1m", "btcusdt").is_some());
}

// =============================================================================
// Bybit
// =============================================================================

#[tokio::test(start_paused = true)]
async fn bybit_trades_land_under_translated_market() {
    let adapter = BybitAdapter::new();
    let store = InMemoryStore::new();
    let mut cache = cache_for("bybit", &store, &["publicTrade"]);
    let translate = Translator::new([("BTCUSDT".to_string(), "BTC-USDT".to_string())].into());

    let frame = json!({
        "topic": "publicTrade.BTCUSDT", "ts": 1_690_000_000_200_i64, "type": "snapshot",
        "data": [
            {"i": "2290000000061666327", "T": 1_690_000_000_100_i64, "p": "30000.1", "v": "0.01", "S": "Buy", "s": "BTCUSDT", "BT": false}
        ]
    });

    let handled = handle(&adapter, &translate, &mut cache, &text(&frame)).await;
    assert_eq!(
        handled,
        Handled::Accepted {
            channel: "publicTrade".into(),
            market: "BTC-USDT".into()
        }
    );

    let published = store.published_json("pub:bybit:publicTrade");
    assert_eq!(published[0]["BTC-USDT"]["trade"][0]["price"], json!(30000.1));
    assert!(cache.table().get("publicTrade", "BTCUSDT").is_none());
}

#[tokio::test(start_paused = true)]
async fn bybit_pong_is_control_traffic() {
    let adapter = BybitAdapter::new();
    let store = InMemoryStore::new();
    let mut cache = cache_for("bybit", &store, &[]);

    let pong = json!({"success": true, "ret_msg": "pong", "conn_id": "abc", "op": "ping"});
    let handled = handle(&adapter, &Translator::default(), &mut cache, &text(&pong)).await;

    assert_eq!(handled, Handled::Skipped);
    assert!(store.published().is_empty());
}

// =============================================================================
// Huobi
// =============================================================================

#[tokio::test(start_paused = true)]
async fn huobi_gzip_ticker_is_accepted() {
    let adapter = HuobiAdapter::new();
    let store = InMemoryStore::new();
    let mut cache = cache_for("huobi", &store, &["ticker"]);

    let frame = json!({
        "ch": "market.btcusdt.ticker", "ts": 1_630_982_370_526_i64,
        "tick": {
            "open": 51732, "high": 52785.64, "low": 51000, "close": 52735.63,
            "amount": 13259.24, "vol": 687_640_987.41, "count": 448_737,
            "bid": 52732.88, "bidSize": 0.036, "ask": 52732.89, "askSize": 0.583_653,
            "lastPrice": 52735.63, "lastSize": 0.03
        }
    });

    let handled = handle(&adapter, &Translator::default(), &mut cache, &gzip(&frame)).await;
    assert_eq!(
        handled,
        Handled::Accepted {
            channel: "ticker".into(),
            market: "btcusdt".into()
        }
    );

    let record = cache.table().get("ticker", "btcusdt").unwrap().to_json();
    assert_eq!(record["respond_time_utc"], json!("2021-09-07 02:39:30.526"));
    assert_eq!(record["number_trades"], json!(448_737));
}

#[tokio::test(start_paused = true)]
async fn huobi_gzip_ping_is_answered() {
    let adapter = HuobiAdapter::new();
    let store = InMemoryStore::new();
    let mut cache = cache_for("huobi", &store, &[]);

    let ping = gzip(&json!({"ping": 1_492_420_473_027_i64}));
    let handled = handle(&adapter, &Translator::default(), &mut cache, &ping).await;

    assert_eq!(
        handled,
        Handled::Replied(Outbound::text(json!({"pong": 1_492_420_473_027_i64})))
    );
    assert!(cache.table().is_empty());
}

// =============================================================================
// Kraken
// =============================================================================

#[tokio::test(start_paused = true)]
async fn kraken_ticker_uses_receive_time_and_alias() {
    let adapter = KrakenAdapter::new();
    let store = InMemoryStore::new();
    let mut cache = cache_for("kraken", &store, &["ticker"]);
    let translate = Translator::new([("XBT/USD".to_string(), "BTC/USD".to_string())].into());

    let status = json!({"event": "systemStatus", "status": "online", "version": "1.9.0"});
    assert_eq!(handle(&adapter, &translate, &mut cache, &text(&status)).await, Handled::Skipped);

    let frame = json!([
        340,
        {
            "a": ["5525.40000", 1, "1.000"],
            "b": ["5525.10000", 1, "1.000"],
            "c": ["5525.10000", "0.00398963"],
            "v": ["2634.11501494", "3591.17907851"],
            "p": ["5631.44067", "5653.78939"],
            "t": [11493, 16267],
            "l": ["5505.00000", "5505.00000"],
            "h": ["5783.00000", "5783.00000"],
            "o": ["5760.70000", "5763.40000"]
        },
        "ticker",
        "XBT/USD"
    ]);

    let handled = handle(&adapter, &translate, &mut cache, &text(&frame)).await;
    assert_eq!(
        handled,
        Handled::Accepted {
            channel: "ticker".into(),
            market: "BTC/USD".into()
        }
    );

    let published = store.published_json("pub:kraken:ticker");
    assert_eq!(published[0]["BTC/USD"]["ask"], json!(5525.4));
    assert_eq!(
        published[0]["BTC/USD"]["respond_time_utc"],
        json!("2023-11-14 22:13:20.000")
    );
}

#[tokio::test(start_paused = true)]
async fn latest_record_wins_per_market() {
    let adapter = KrakenAdapter::new();
    let store = InMemoryStore::new();
    let mut cache = cache_for("kraken", &store, &["spread"]);
    let translate = Translator::default();

    for (bid, market) in [("100.0", "XBT/USD"), ("200.0", "ETH/USD"), ("101.0", "XBT/USD")] {
        let frame = json!([
            0,
            [bid, "100.5", "1534614248.456738", "0.1", "0.2"],
            "spread",
            market
        ]);
        handle(&adapter, &translate, &mut cache, &text(&frame)).await;
    }

    let spread = cache.table().channel("spread").unwrap();
    assert_eq!(spread.len(), 2);
    assert_eq!(spread.get("XBT/USD").unwrap().to_json()["bid"], json!(101.0));
    assert_eq!(spread.get("ETH/USD").unwrap().to_json()["bid"], json!(200.0));
}
