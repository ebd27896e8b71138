//! Fixed-interval gate.
//!
//! A [`Cadence`] answers "has at least `interval` elapsed since the last
//! firing?" for an externally supplied clock reading. The state cache uses
//! one for snapshot flushes, the heartbeat scheduler for keep-alives.

use std::time::Duration;

use tokio::time::Instant;

/// Gate that opens at most once per interval.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    interval: Duration,
    last_fired: Instant,
}

impl Cadence {
    /// Create a gate whose first window starts at `now`.
    #[must_use]
    pub const fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_fired: now,
        }
    }

    /// Configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Instant the gate last fired (or was reset).
    #[must_use]
    pub const fn last_fired(&self) -> Instant {
        self.last_fired
    }

    /// Whether the interval has fully elapsed at `now`.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_fired) >= self.interval
    }

    /// Fire if due, restarting the window at `now`.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.last_fired = now;
            true
        } else {
            false
        }
    }

    /// Restart the window at `now` without firing.
    pub const fn reset(&mut self, now: Instant) {
        self.last_fired = now;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn fires_only_after_interval() {
        let start = Instant::now();
        let mut cadence = Cadence::new(Duration::from_millis(250), start);

        assert!(!cadence.fire(start + Duration::from_millis(100)));
        assert!(!cadence.fire(start + Duration::from_millis(249)));
        assert!(cadence.fire(start + Duration::from_millis(250)));
        assert!(!cadence.fire(start + Duration::from_millis(400)));
        assert!(cadence.fire(start + Duration::from_millis(500)));
    }

    #[test]
    fn reset_restarts_window() {
        let start = Instant::now();
        let mut cadence = Cadence::new(Duration::from_secs(1), start);

        cadence.reset(start + Duration::from_millis(900));

        assert!(!cadence.is_due(start + Duration::from_millis(1500)));
        assert!(cadence.is_due(start + Duration::from_millis(1900)));
    }

    #[test]
    fn zero_interval_always_due() {
        let start = Instant::now();
        let mut cadence = Cadence::new(Duration::ZERO, start);
        assert!(cadence.fire(start));
        assert!(cadence.fire(start));
    }

    proptest! {
        #[test]
        fn firings_are_at_least_one_interval_apart(
            interval_ms in 1_u64..1_000,
            steps in proptest::collection::vec(0_u64..400, 1..64),
        ) {
            let start = Instant::now();
            let interval = Duration::from_millis(interval_ms);
            let mut cadence = Cadence::new(interval, start);
            let mut now = start;
            let mut previous = start;

            for step in steps {
                now += Duration::from_millis(step);
                if cadence.fire(now) {
                    prop_assert!(now - previous >= interval);
                    previous = now;
                }
            }
        }
    }
}
