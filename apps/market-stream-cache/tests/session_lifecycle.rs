//! Session Lifecycle Integration Tests
//!
//! Drives `ConnectionSession` against a scripted connector: reconnects,
//! give-up, fatal errors, idle detection, ping replies and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use market_stream_cache::{
    BinanceAdapter, ChannelAdapter, ConnectionError, ConnectionSession, Connector, Exchange,
    FrameTransport, HeartbeatConfig, HuobiAdapter, InMemoryStore, Outbound, ReconnectConfig,
    SessionConfig, SessionError, SessionOutcome, SessionState, StateStore, StoreError,
};

// =============================================================================
// Scripted transport
// =============================================================================

#[derive(Debug, Clone)]
enum Step {
    Frame(Vec<u8>),
    Close,
    /// Deliver nothing, forever.
    Hang,
    /// Cancel the session, then deliver nothing.
    Shutdown,
}

type Script = Result<Vec<Step>, ConnectionError>;

#[derive(Clone)]
struct ScriptedConnector {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    connects: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Outbound>>>,
    cancel: CancellationToken,
}

impl ScriptedConnector {
    fn new(scripts: Vec<Script>, cancel: &CancellationToken) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            connects: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
            cancel: cancel.clone(),
        }
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn connect(&self, _url: &str) -> Result<ScriptedTransport, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ConnectionError::Handshake("connection refused".into())));

        script.map(|steps| ScriptedTransport {
            steps: steps.into(),
            sent: Arc::clone(&self.sent),
            cancel: self.cancel.clone(),
        })
    }
}

struct ScriptedTransport {
    steps: VecDeque<Step>,
    sent: Arc<Mutex<Vec<Outbound>>>,
    cancel: CancellationToken,
}

#[async_trait]
impl FrameTransport for ScriptedTransport {
    async fn send(&mut self, frame: Outbound) -> Result<(), ConnectionError> {
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        // Hang and Shutdown stay queued so a dropped recv loses nothing.
        match self.steps.front() {
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::Shutdown) => {
                self.cancel.cancel();
                std::future::pending().await
            }
            _ => {}
        }

        match self.steps.pop_front() {
            Some(Step::Frame(raw)) => Ok(Some(raw)),
            _ => Ok(None),
        }
    }
}

/// Store whose server is unreachable for the first `outage` calls.
#[derive(Debug, Clone)]
struct UnreachableAtFirstStore {
    outage: Arc<AtomicUsize>,
    inner: InMemoryStore,
}

impl UnreachableAtFirstStore {
    fn new(outage: usize, inner: &InMemoryStore) -> Self {
        Self {
            outage: Arc::new(AtomicUsize::new(outage)),
            inner: inner.clone(),
        }
    }

    fn reachable(&self) -> Result<(), StoreError> {
        let down = self
            .outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if down {
            return Err(StoreError::Connection {
                message: "Connection refused (os error 111)".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for UnreachableAtFirstStore {
    async fn set(&mut self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        self.reachable()?;
        self.inner.set(key, value, ttl).await
    }

    async fn publish(&mut self, topic: &str, message: Vec<u8>) -> Result<(), StoreError> {
        self.reachable()?;
        self.inner.publish(topic, message).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn config(exchange: Exchange, max_attempts: u32) -> SessionConfig {
    let mut config = SessionConfig::for_exchange(exchange);
    config.reconnect = ReconnectConfig::new(
        Duration::from_millis(100),
        Duration::from_millis(100),
        1.0,
        0.0,
        max_attempts,
    );
    config
}

fn binance_ticker(symbol: &str, close: &str) -> Step {
    Step::Frame(
        json!({
            "e": "24hrTicker", "E": 1_690_000_000_000_i64, "s": symbol,
            "c": close, "b": close, "a": close
        })
        .to_string()
        .into_bytes(),
    )
}

fn gzip(value: &Value) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(value.to_string().as_bytes()).unwrap();
    encoder.finish().unwrap()
}

fn session<A: ChannelAdapter>(
    config: SessionConfig,
    adapter: A,
    connector: &ScriptedConnector,
    store: &InMemoryStore,
    cancel: &CancellationToken,
) -> ConnectionSession<A, ScriptedConnector, InMemoryStore> {
    ConnectionSession::new(config, adapter, connector.clone(), store.clone(), cancel.clone())
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn gives_up_after_exactly_max_attempts_connects() {
    let cancel = CancellationToken::new();
    let connector = ScriptedConnector::new(Vec::new(), &cancel);
    let store = InMemoryStore::new();
    let mut session = session(
        config(Exchange::Binance, 3),
        BinanceAdapter::new(),
        &connector,
        &store,
        &cancel,
    );

    let outcome = session.run().await;

    assert!(matches!(
        outcome,
        SessionOutcome::Failed {
            attempts: 3,
            error: SessionError::Connection(ConnectionError::Handshake(_))
        }
    ));
    assert_eq!(connector.connects(), 3);
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.status().reconnects(), 2);
}

#[tokio::test(start_paused = true)]
async fn no_markets_is_fatal_on_first_attempt() {
    let cancel = CancellationToken::new();
    let connector = ScriptedConnector::new(vec![Ok(vec![Step::Hang])], &cancel);
    let store = InMemoryStore::new();
    let mut config = config(Exchange::Binance, 10);
    config.markets.clear();
    let mut session = session(config, BinanceAdapter::new(), &connector, &store, &cancel);

    let outcome = session.run().await;

    assert!(matches!(
        outcome,
        SessionOutcome::Failed {
            attempts: 1,
            error: SessionError::NoSubscriptions
        }
    ));
    assert_eq!(connector.connects(), 1);
    assert!(connector.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_url_is_fatal() {
    let cancel = CancellationToken::new();
    let connector = ScriptedConnector::new(
        vec![Err(ConnectionError::InvalidUrl("http://nope".into()))],
        &cancel,
    );
    let store = InMemoryStore::new();
    let mut session = session(
        config(Exchange::Binance, 10),
        BinanceAdapter::new(),
        &connector,
        &store,
        &cancel,
    );

    let outcome = session.run().await;

    assert!(matches!(
        outcome,
        SessionOutcome::Failed {
            attempts: 1,
            error: SessionError::InvalidUrl(_)
        }
    ));
    assert_eq!(connector.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_keeps_the_table_and_resubscribes() {
    let cancel = CancellationToken::new();
    let connector = ScriptedConnector::new(
        vec![
            Ok(vec![binance_ticker("BTCUSDT", "30000"), Step::Close]),
            Ok(vec![binance_ticker("ETHUSDT", "2000"), Step::Shutdown]),
        ],
        &cancel,
    );
    let store = InMemoryStore::new();
    let mut session = session(
        config(Exchange::Binance, 3),
        BinanceAdapter::new(),
        &connector,
        &store,
        &cancel,
    );

    let outcome = session.run().await;

    assert!(matches!(outcome, SessionOutcome::Shutdown));
    assert_eq!(connector.connects(), 2);

    let ticker = session.cache().table().channel("ticker").unwrap();
    assert_eq!(ticker.len(), 2);
    assert!(ticker.get("btcusdt").is_some());
    assert!(ticker.get("ethusdt").is_some());

    let subscriptions = connector
        .sent()
        .into_iter()
        .filter(|frame| matches!(frame, Outbound::Text(body) if body.contains("SUBSCRIBE")))
        .count();
    assert_eq!(subscriptions, 2);

    let status = session.status();
    assert_eq!(status.reconnects(), 1);
    assert_eq!(status.records_accepted(), 2);
    assert_eq!(status.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn accepted_record_resets_the_failure_budget() {
    let cancel = CancellationToken::new();
    let refused = || -> Script { Err(ConnectionError::Handshake("connection refused".into())) };
    let connector = ScriptedConnector::new(
        vec![
            refused(),
            Ok(vec![binance_ticker("BTCUSDT", "30000"), Step::Close]),
            refused(),
        ],
        &cancel,
    );
    let store = InMemoryStore::new();
    let mut session = session(
        config(Exchange::Binance, 2),
        BinanceAdapter::new(),
        &connector,
        &store,
        &cancel,
    );

    let outcome = session.run().await;

    // refused, healthy (reset), closed, refused: two consecutive failures.
    assert!(matches!(outcome, SessionOutcome::Failed { attempts: 2, .. }));
    assert_eq!(connector.connects(), 3);
}

#[tokio::test(start_paused = true)]
async fn store_failure_reconnects_without_losing_the_record() {
    let cancel = CancellationToken::new();
    let connector = ScriptedConnector::new(
        vec![
            Ok(vec![binance_ticker("BTCUSDT", "30000")]),
            Ok(vec![binance_ticker("BTCUSDT", "30001"), Step::Shutdown]),
        ],
        &cancel,
    );
    let store = InMemoryStore::new();
    store.fail_next_publishes(1);
    let mut config = config(Exchange::Binance, 3);
    config.cache.do_publish = true;
    config.cache.publish_channel = "pub".into();
    let mut session = session(config, BinanceAdapter::new(), &connector, &store, &cancel);

    let outcome = session.run().await;

    assert!(matches!(outcome, SessionOutcome::Shutdown));
    assert_eq!(connector.connects(), 2);

    let published = store.published_json("pub:ticker");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["btcusdt"]["close"], json!(30001.0));

    let last_error = session.status().last_error().unwrap();
    assert!(last_error.contains("injected failure"), "{last_error}");
}

#[tokio::test(start_paused = true)]
async fn store_down_at_startup_is_retried_until_it_recovers() {
    let cancel = CancellationToken::new();
    let connector = ScriptedConnector::new(
        vec![
            Ok(vec![binance_ticker("BTCUSDT", "30000")]),
            Ok(vec![binance_ticker("BTCUSDT", "30001")]),
            Ok(vec![binance_ticker("BTCUSDT", "30002"), Step::Shutdown]),
        ],
        &cancel,
    );
    let memory = InMemoryStore::new();
    let store = UnreachableAtFirstStore::new(2, &memory);
    let mut config = config(Exchange::Binance, 3);
    config.cache.do_publish = true;
    config.cache.publish_channel = "pub".into();
    let mut session = ConnectionSession::new(
        config,
        BinanceAdapter::new(),
        connector.clone(),
        store,
        cancel.clone(),
    );

    let outcome = session.run().await;

    assert!(matches!(outcome, SessionOutcome::Shutdown));
    assert_eq!(connector.connects(), 3);
    assert_eq!(session.status().reconnects(), 2);

    let published = memory.published_json("pub:ticker");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["btcusdt"]["close"], json!(30002.0));

    let last_error = session.status().last_error().unwrap();
    assert!(last_error.contains("store connection error"), "{last_error}");
}

#[tokio::test(start_paused = true)]
async fn silent_connection_is_recycled_after_idle_timeout() {
    let cancel = CancellationToken::new();
    let connector = ScriptedConnector::new(
        vec![Ok(vec![Step::Hang]), Ok(vec![Step::Shutdown])],
        &cancel,
    );
    let store = InMemoryStore::new();
    let mut config = config(Exchange::Binance, 3);
    config.heartbeat = HeartbeatConfig::new(Duration::from_secs(2), Some(Duration::from_secs(5)));
    let mut session = session(config, BinanceAdapter::new(), &connector, &store, &cancel);

    let outcome = session.run().await;

    assert!(matches!(outcome, SessionOutcome::Shutdown));
    assert_eq!(connector.connects(), 2);
    assert!(
        connector
            .sent()
            .iter()
            .any(|frame| matches!(frame, Outbound::Ping(_)))
    );
    let last_error = session.status().last_error().unwrap();
    assert!(last_error.contains("no frame received"), "{last_error}");
}

#[tokio::test(start_paused = true)]
async fn huobi_server_ping_gets_a_pong() {
    let cancel = CancellationToken::new();
    let ping = gzip(&json!({"ping": 1_492_420_473_027_i64}));
    let connector = ScriptedConnector::new(
        vec![Ok(vec![Step::Frame(ping), Step::Shutdown])],
        &cancel,
    );
    let store = InMemoryStore::new();
    let mut config = config(Exchange::Huobi, 3);
    config.markets = vec!["btcusdt".into()];
    let mut session = session(config, HuobiAdapter::new(), &connector, &store, &cancel);

    let outcome = session.run().await;

    assert!(matches!(outcome, SessionOutcome::Shutdown));
    assert_eq!(
        connector.sent(),
        vec![
            Outbound::text(json!({"sub": "market.btcusdt.ticker", "id": "market.btcusdt.ticker"})),
            Outbound::text(json!({"pong": 1_492_420_473_027_i64})),
        ]
    );
    assert_eq!(session.status().records_accepted(), 0);
    assert_eq!(session.status().frames_skipped(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_shuts_down() {
    let cancel = CancellationToken::new();
    let connector = ScriptedConnector::new(Vec::new(), &cancel);
    let store = InMemoryStore::new();
    let mut config = config(Exchange::Binance, 0);
    config.reconnect.initial_delay = Duration::from_secs(60);
    config.reconnect.max_delay = Duration::from_secs(60);
    let mut session = session(config, BinanceAdapter::new(), &connector, &store, &cancel);

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(90)).await;
        trigger.cancel();
    });

    let outcome = session.run().await;

    assert!(matches!(outcome, SessionOutcome::Shutdown));
    assert_eq!(connector.connects(), 2);
    assert_eq!(session.state(), SessionState::Disconnected);
}
