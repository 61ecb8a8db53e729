//! Monotonic timer helpers
//!
//! Every timer in the game (Beacon cooldown, save request spacing, game
//! length, reconnect backoff) is a stored instant that the owning loop
//! compares against a fresh clock sample on each tick. Nothing here
//! schedules callbacks.
//!
//! Instants come from `tokio::time`, so tests running with a paused clock
//! can step through cooldowns and game lengths without real sleeps.

use std::time::Duration;

pub use tokio::time::Instant;

/// Samples the monotonic clock
pub fn now() -> Instant {
    Instant::now()
}

/// A point in time after which something expires
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `duration` after `start`
    pub fn after(start: Instant, duration: Duration) -> Self {
        Deadline { at: start + duration }
    }

    /// The instant the deadline falls on
    pub fn at(&self) -> Instant {
        self.at
    }

    /// Whether `now` is at or past the deadline
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.at
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self, now: Instant) -> Duration {
        self.at.saturating_duration_since(now)
    }
}

/// Measures time elapsed since a start instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopwatch {
    started_at: Instant,
}

impl Stopwatch {
    /// Starts measuring at `now`
    pub fn start(now: Instant) -> Self {
        Stopwatch { started_at: now }
    }

    /// Elapsed time, never negative
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

/// Lets an action through at most once per period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    period: Duration,
    last: Option<Instant>,
}

impl Cadence {
    pub fn new(period: Duration) -> Self {
        Cadence { period, last: None }
    }

    /// Returns true and records `now` if the action may run
    pub fn ready(&mut self, now: Instant) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.period,
        };
        if due {
            self.last = Some(now);
        }
        due
    }

    /// Forgets the last run so the next check passes
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_expiry() {
        let start = Instant::now();
        let deadline = Deadline::after(start, Duration::from_secs(5));

        assert!(!deadline.is_expired(start));
        assert_eq!(deadline.remaining(start), Duration::from_secs(5));
        assert!(!deadline.is_expired(start + Duration::from_millis(4999)));
        assert!(deadline.is_expired(start + Duration::from_secs(5)));
        assert_eq!(deadline.remaining(start + Duration::from_secs(9)), Duration::ZERO);
    }

    #[test]
    fn test_stopwatch_never_negative() {
        let start = Instant::now();
        let watch = Stopwatch::start(start + Duration::from_secs(1));
        assert_eq!(watch.elapsed(start), Duration::ZERO);
        assert_eq!(watch.elapsed(start + Duration::from_secs(3)), Duration::from_secs(2));
    }

    #[test]
    fn test_cadence() {
        let start = Instant::now();
        let mut cadence = Cadence::new(Duration::from_secs(2));

        assert!(cadence.ready(start));
        assert!(!cadence.ready(start + Duration::from_secs(1)));
        assert!(cadence.ready(start + Duration::from_secs(2)));
        assert!(!cadence.ready(start + Duration::from_secs(3)));

        cadence.reset();
        assert!(cadence.ready(start + Duration::from_secs(3)));
    }
}
