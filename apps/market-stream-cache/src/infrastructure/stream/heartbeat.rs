//! Heartbeat Scheduler
//!
//! Decides when to send the adapter's keep-alive frame and when a
//! connection has gone quiet for too long. The session consults it on every
//! received frame and on a housekeeping tick, so keep-alives still go out
//! on an otherwise silent connection.

use std::time::Duration;

use tokio::time::Instant;

use crate::application::ports::{ChannelAdapter, Outbound};
use crate::domain::cadence::Cadence;

/// Default keep-alive interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(150);

/// Default idle timeout before a silent connection is considered dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between keep-alive frames. Zero disables keep-alives.
    pub interval: Duration,
    /// Maximum silence before the connection is dropped. `None` disables.
    pub idle_timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(interval: Duration, idle_timeout: Option<Duration>) -> Self {
        Self {
            interval,
            idle_timeout,
        }
    }
}

/// Keep-alive and idle tracking for one connection at a time.
#[derive(Debug, Clone)]
pub struct HeartbeatScheduler {
    cadence: Option<Cadence>,
    idle_timeout: Option<Duration>,
    last_frame: Instant,
}

impl HeartbeatScheduler {
    /// Create a scheduler whose first window starts at `now`.
    #[must_use]
    pub fn new(config: &HeartbeatConfig, now: Instant) -> Self {
        Self {
            cadence: (!config.interval.is_zero()).then(|| Cadence::new(config.interval, now)),
            idle_timeout: config.idle_timeout,
            last_frame: now,
        }
    }

    /// Keep-alive interval, `None` when disabled.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.cadence.as_ref().map(Cadence::interval)
    }

    /// Start tracking a fresh connection.
    pub fn reset(&mut self, now: Instant) {
        if let Some(cadence) = self.cadence.as_mut() {
            cadence.reset(now);
        }
        self.last_frame = now;
    }

    /// Note that a frame arrived.
    pub const fn record_frame(&mut self, now: Instant) {
        self.last_frame = now;
    }

    /// Time since the last frame.
    #[must_use]
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_frame)
    }

    /// Whether the connection has been silent longer than the idle timeout.
    #[must_use]
    pub fn is_stale(&self, now: Instant) -> bool {
        self.idle_timeout
            .is_some_and(|timeout| self.silence(now) >= timeout)
    }

    /// If the interval has elapsed, restart it and return the adapter's
    /// keep-alive frame to send.
    pub fn maybe_fire<A: ChannelAdapter>(&mut self, adapter: &A, now: Instant) -> Option<Outbound> {
        let cadence = self.cadence.as_mut()?;
        if cadence.fire(now) {
            adapter.keep_alive()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde_json::{Value, json};

    use super::*;
    use crate::application::ports::{Classified, DecodeError};
    use crate::domain::mapping::MappingError;
    use crate::domain::record::CanonicalRecord;

    struct PingAdapter;

    impl ChannelAdapter for PingAdapter {
        type Channel = ();

        fn exchange(&self) -> &'static str {
            "test"
        }

        fn build_subscriptions(&self, _: &[String], _: &[String]) -> Vec<Outbound> {
            Vec::new()
        }

        fn decode_frame(&self, _: &[u8]) -> Result<Value, DecodeError> {
            Ok(json!({}))
        }

        fn classify(&self, _: &Value) -> Classified<()> {
            Classified::Control
        }

        fn dispatch(
            &self,
            (): (),
            _: &Value,
            _: DateTime<Utc>,
        ) -> Result<Option<CanonicalRecord>, MappingError> {
            Ok(None)
        }

        fn keep_alive(&self) -> Option<Outbound> {
            Some(Outbound::Text(r#"{"op":"ping"}"#.to_string()))
        }
    }

    fn config(interval_secs: u64, idle_secs: Option<u64>) -> HeartbeatConfig {
        HeartbeatConfig::new(
            Duration::from_secs(interval_secs),
            idle_secs.map(Duration::from_secs),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_interval() {
        let mut scheduler = HeartbeatScheduler::new(&config(20, None), Instant::now());

        assert_eq!(scheduler.maybe_fire(&PingAdapter, Instant::now()), None);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(scheduler.maybe_fire(&PingAdapter, Instant::now()).is_some());
        assert_eq!(scheduler.maybe_fire(&PingAdapter, Instant::now()), None);
        tokio::time::advance(Duration::from_secs(19)).await;
        assert_eq!(scheduler.maybe_fire(&PingAdapter, Instant::now()), None);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(scheduler.maybe_fire(&PingAdapter, Instant::now()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_disables_keep_alive() {
        let mut scheduler = HeartbeatScheduler::new(&config(0, None), Instant::now());
        tokio::time::advance(Duration::from_secs(3600)).await;

        assert_eq!(scheduler.interval(), None);
        assert_eq!(scheduler.maybe_fire(&PingAdapter, Instant::now()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_postpone_staleness() {
        let mut scheduler = HeartbeatScheduler::new(&config(150, Some(120)), Instant::now());

        tokio::time::advance(Duration::from_secs(100)).await;
        scheduler.record_frame(Instant::now());
        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(!scheduler.is_stale(Instant::now()));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(scheduler.is_stale(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn no_idle_timeout_never_stale() {
        let scheduler = HeartbeatScheduler::new(&config(150, None), Instant::now());
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(!scheduler.is_stale(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restarts_both_windows() {
        let mut scheduler = HeartbeatScheduler::new(&config(20, Some(30)), Instant::now());
        tokio::time::advance(Duration::from_secs(25)).await;

        scheduler.reset(Instant::now());

        assert_eq!(scheduler.maybe_fire(&PingAdapter, Instant::now()), None);
        assert_eq!(scheduler.silence(Instant::now()), Duration::ZERO);
    }
}
