//! Connection Session
//!
//! Owns one exchange connection at a time and everything that must survive
//! reconnects: the adapter, the state cache and the heartbeat schedule.
//!
//! ```text
//!            ┌──────────────── retry (delay) ────────────────┐
//!            ▼                                               │
//! Disconnected ─► Connecting ─► Subscribing ─► Streaming ─► Reconnecting
//!                     │              │             │             │
//!                     └──────────────┴─────────────┴─► Failed ◄──┘ (fatal / exhausted)
//! ```
//!
//! Records are processed strictly in arrival order on a single task; the
//! state table is never shared. Observers read [`SessionStatus`] instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::heartbeat::HeartbeatScheduler;
use super::reconnect::ReconnectPolicy;
use crate::application::ports::{
    ChannelAdapter, Classified, ConnectionError, Connector, DecodeError, FrameTransport,
    StateStore, StoreError,
};
use crate::application::services::state_cache::StateCache;
use crate::domain::record::CanonicalRecord;
use crate::infrastructure::config::SessionConfig;
use crate::infrastructure::metrics::{self, SkipReason};

/// Cadence of the idle/keep-alive check while no frames arrive.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// State
// =============================================================================

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected (initial and after shutdown).
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Sending subscription frames.
    Subscribing,
    /// Receiving data.
    Streaming,
    /// Waiting before the next attempt.
    Reconnecting,
    /// Gave up. Terminal.
    Failed,
}

impl SessionState {
    /// Lowercase name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

/// Shared, read-mostly view of a running session.
#[derive(Debug)]
pub struct SessionStatus {
    exchange: &'static str,
    state: RwLock<SessionState>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    frames_received: AtomicU64,
    records_accepted: AtomicU64,
    frames_skipped: AtomicU64,
    reconnects: AtomicU64,
}

impl SessionStatus {
    /// Create a status in `Disconnected`.
    #[must_use]
    pub const fn new(exchange: &'static str) -> Self {
        Self {
            exchange,
            state: RwLock::new(SessionState::Disconnected),
            connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            frames_received: AtomicU64::new(0),
            records_accepted: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Set the session state.
    pub fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
        if state == SessionState::Streaming {
            *self.connected_at.write() = Some(Utc::now());
        }
        metrics::set_connected(self.exchange, state == SessionState::Streaming);
    }

    /// Remember the most recent error.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Exchange name.
    #[must_use]
    pub const fn exchange(&self) -> &'static str {
        self.exchange
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// When the session last reached `Streaming`.
    #[must_use]
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        *self.connected_at.read()
    }

    /// Most recent error message.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Frames received since start.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Records accepted since start.
    #[must_use]
    pub fn records_accepted(&self) -> u64 {
        self.records_accepted.load(Ordering::Relaxed)
    }

    /// Frames that produced no record since start.
    #[must_use]
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    /// Reconnect attempts since start.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    fn record_accepted(&self) {
        self.records_accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Errors
// =============================================================================

/// What the reconnect loop does with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Wait and reconnect.
    Retry,
    /// Stop immediately.
    Fatal,
}

/// Errors that end a session cycle.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport failure.
    #[error(transparent)]
    Connection(ConnectionError),

    /// A frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The state store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// Nothing arrived within the idle timeout.
    #[error("no frame received for {0:?}")]
    Stale(Duration),

    /// The configured markets and channels produce no subscription.
    #[error("no subscription frames for the configured markets and channels")]
    NoSubscriptions,

    /// The endpoint URL is unusable.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::InvalidUrl(url) => Self::InvalidUrl(url),
            other => Self::Connection(other),
        }
    }
}

impl SessionError {
    /// Retry or stop.
    #[must_use]
    pub const fn disposition(&self) -> Disposition {
        match self {
            Self::NoSubscriptions | Self::InvalidUrl(_) => Disposition::Fatal,
            Self::Connection(_)
            | Self::Decode(_)
            | Self::Store(_)
            | Self::Closed
            | Self::Stale(_) => Disposition::Retry,
        }
    }
}

/// How [`ConnectionSession::run`] ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Cancelled by the shutdown token.
    Shutdown,
    /// Gave up after a fatal error or too many consecutive failures.
    Failed {
        /// Consecutive failed cycles, including the last one.
        attempts: u32,
        /// The error that ended the last cycle.
        error: SessionError,
    },
}

// =============================================================================
// Session
// =============================================================================

enum StreamEvent {
    Frame(Option<Vec<u8>>),
    Tick,
}

/// One exchange feed, from connect through reconnects to shutdown.
pub struct ConnectionSession<A, C, S>
where
    A: ChannelAdapter,
    C: Connector,
    S: StateStore,
{
    config: SessionConfig,
    adapter: A,
    connector: C,
    cache: StateCache<S>,
    heartbeat: HeartbeatScheduler,
    status: Arc<SessionStatus>,
    cancel: CancellationToken,
    session_id: Uuid,
}

impl<A, C, S> ConnectionSession<A, C, S>
where
    A: ChannelAdapter,
    C: Connector,
    S: StateStore,
{
    /// Create a session. Nothing connects until [`Self::run`].
    pub fn new(
        config: SessionConfig,
        adapter: A,
        connector: C,
        store: S,
        cancel: CancellationToken,
    ) -> Self {
        let cache = StateCache::new(config.cache.clone(), store, config.channels.iter().cloned());
        let heartbeat = HeartbeatScheduler::new(&config.heartbeat, Instant::now());
        let status = Arc::new(SessionStatus::new(adapter.exchange()));
        Self {
            config,
            adapter,
            connector,
            cache,
            heartbeat,
            status,
            cancel,
            session_id: Uuid::new_v4(),
        }
    }

    /// Shared status handle for observers.
    #[must_use]
    pub fn status(&self) -> Arc<SessionStatus> {
        Arc::clone(&self.status)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.status.state()
    }

    /// The state cache (table and store).
    #[must_use]
    pub const fn cache(&self) -> &StateCache<S> {
        &self.cache
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Identifier attached to this session's log span.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Connect, subscribe and stream until shutdown or give-up.
    ///
    /// Consecutive failed cycles are bounded by the reconnect policy; the
    /// count resets once a connection delivers an accepted record.
    pub async fn run(&mut self) -> SessionOutcome {
        let span = tracing::info_span!(
            "session",
            exchange = self.adapter.exchange(),
            session_id = %self.session_id
        );
        self.run_cycles().instrument(span).await
    }

    async fn run_cycles(&mut self) -> SessionOutcome {
        let exchange = self.adapter.exchange();
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            let error = match self.cycle(&mut policy).await {
                Ok(()) => return self.shut_down(),
                Err(error) => error,
            };

            if matches!(error, SessionError::Store(_)) {
                metrics::record_store_error(exchange);
            }
            self.status.set_error(error.to_string());

            if error.disposition() == Disposition::Fatal {
                tracing::error!(error = %error, "Fatal session error");
                self.status.set_state(SessionState::Failed);
                return SessionOutcome::Failed {
                    attempts: policy.failures().saturating_add(1),
                    error,
                };
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    attempts = policy.failures(),
                    error = %error,
                    "Reconnect attempts exhausted"
                );
                self.status.set_state(SessionState::Failed);
                return SessionOutcome::Failed {
                    attempts: policy.failures(),
                    error,
                };
            };

            tracing::warn!(
                attempt = policy.failures(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Session cycle failed, reconnecting"
            );
            self.status.set_state(SessionState::Reconnecting);
            self.status.record_reconnect();
            metrics::record_reconnect(exchange);

            tokio::select! {
                () = self.cancel.cancelled() => return self.shut_down(),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn shut_down(&self) -> SessionOutcome {
        tracing::info!("Session shut down");
        self.status.set_state(SessionState::Disconnected);
        SessionOutcome::Shutdown
    }

    /// One connect → subscribe → stream cycle. `Ok` only on cancellation.
    async fn cycle(&mut self, policy: &mut ReconnectPolicy) -> Result<(), SessionError> {
        let mut transport = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            transport = self.connect() => transport?,
        };
        self.subscribe(&mut transport).await?;
        self.stream(&mut transport, policy).await
    }

    /// Open a transport to the configured URL.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] or [`SessionError::Connection`].
    pub async fn connect(&self) -> Result<C::Transport, SessionError> {
        self.status.set_state(SessionState::Connecting);
        let transport = self.connector.connect(&self.config.url).await?;
        tracing::info!(url = %self.config.url, "Connected");
        Ok(transport)
    }

    /// Send one subscription frame per (market, channel) the adapter emits.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoSubscriptions`] when the adapter produces no
    /// frames, or a transport error.
    pub async fn subscribe(&self, transport: &mut C::Transport) -> Result<usize, SessionError> {
        self.status.set_state(SessionState::Subscribing);

        let frames = self
            .adapter
            .build_subscriptions(&self.config.markets, &self.config.channels);
        if frames.is_empty() {
            return Err(SessionError::NoSubscriptions);
        }

        let count = frames.len();
        for frame in frames {
            tracing::debug!(frame = ?frame, "Sending subscription");
            transport.send(frame).await?;
        }

        tracing::info!(
            subscriptions = count,
            markets = ?self.config.markets,
            channels = ?self.config.channels,
            "Subscribed"
        );
        Ok(count)
    }

    async fn stream(
        &mut self,
        transport: &mut C::Transport,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), SessionError> {
        self.status.set_state(SessionState::Streaming);
        let start = Instant::now();
        self.heartbeat.reset(start);

        let mut housekeeping =
            tokio::time::interval_at(start + HOUSEKEEPING_INTERVAL, HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut healthy = false;

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                frame = transport.recv() => StreamEvent::Frame(frame?),
                _ = housekeeping.tick() => StreamEvent::Tick,
            };

            let now = Instant::now();
            match event {
                StreamEvent::Frame(None) => return Err(SessionError::Closed),
                StreamEvent::Frame(Some(raw)) => {
                    self.heartbeat.record_frame(now);
                    if self.handle_frame(transport, &raw).await? && !healthy {
                        healthy = true;
                        policy.reset();
                    }
                }
                StreamEvent::Tick => {
                    if self.heartbeat.is_stale(now) {
                        return Err(SessionError::Stale(self.heartbeat.silence(now)));
                    }
                }
            }

            if let Some(frame) = self.heartbeat.maybe_fire(&self.adapter, now) {
                tracing::debug!(frame = ?frame, "Sending keep-alive");
                transport.send(frame).await?;
            }
        }
    }

    /// Decode, classify and dispatch one frame. Returns whether a record
    /// was accepted.
    async fn handle_frame(
        &mut self,
        transport: &mut C::Transport,
        raw: &[u8],
    ) -> Result<bool, SessionError> {
        let exchange = self.adapter.exchange();
        self.status.record_frame();
        metrics::record_frame_received(exchange);

        let message = self.adapter.decode_frame(raw)?;

        match self.adapter.classify(&message) {
            Classified::Control => {
                self.skip(SkipReason::Control);
                Ok(false)
            }
            Classified::Reply(frame) => {
                tracing::trace!(frame = ?frame, "Answering server ping");
                transport.send(frame).await?;
                self.skip(SkipReason::Control);
                Ok(false)
            }
            Classified::Unknown(channel) => {
                tracing::debug!(channel = %channel, "Unsupported channel, frame skipped");
                self.skip(SkipReason::UnknownChannel);
                Ok(false)
            }
            Classified::Data {
                channel,
                kind,
                market,
            } => match self.adapter.dispatch(kind, &message, Utc::now()) {
                Ok(Some(record)) => {
                    self.accept(&channel, &market, record).await?;
                    Ok(true)
                }
                Ok(None) => {
                    self.skip(SkipReason::Filtered);
                    Ok(false)
                }
                Err(error) => {
                    tracing::debug!(
                        channel = %channel,
                        market = %market,
                        error = %error,
                        "Mapping failed, frame skipped"
                    );
                    self.skip(SkipReason::MappingError);
                    Ok(false)
                }
            },
        }
    }

    async fn accept(
        &mut self,
        channel: &str,
        native_market: &str,
        record: CanonicalRecord,
    ) -> Result<(), SessionError> {
        let exchange = self.adapter.exchange();
        let market = self.config.translate.translate(native_market).to_string();
        let started = Instant::now();

        tracing::debug!(
            channel = %channel,
            market = %market,
            record = %record.to_json(),
            "Record accepted"
        );

        let outcome = self.cache.accept(channel, &market, record).await?;

        self.status.record_accepted();
        metrics::record_record_accepted(exchange, channel);
        if outcome.published {
            metrics::record_publish(exchange);
        }
        if outcome.flushed {
            metrics::record_flush(exchange, started.elapsed());
        }
        Ok(())
    }

    fn skip(&self, reason: SkipReason) {
        self.status.record_skipped();
        metrics::record_frame_skipped(self.adapter.exchange(), reason);
    }
}
