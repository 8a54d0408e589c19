//! Wall-clock abstraction shared by the store and everything above it.
//!
//! TTL expiry, token lifetimes, lockout cooldowns and rate-limit windows all
//! compare absolute instants. They read time through [`Clock`] so tests can
//! substitute a [`ManualClock`] and move time forward without sleeping.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the host's system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same instant, so advancing one clone advances every
/// component holding another.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use warden_storage::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::default();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(900));
/// assert_eq!((clock.now() - start).num_minutes(), 15);
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = add_duration(*now, by);
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    /// Starts at the current system time, truncated to whole milliseconds.
    fn default() -> Self {
        let now = Utc::now();
        let millis = now.timestamp_millis();
        Self::new(DateTime::from_timestamp_millis(millis).unwrap_or(now))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Returns the shared default clock.
#[must_use]
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Adds a std duration to an instant, saturating at the maximum representable time.
#[must_use]
pub fn add_duration(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Returns how long from `now` until `until`, or zero if `until` has passed.
#[must_use]
pub fn duration_until(now: DateTime<Utc>, until: DateTime<Utc>) -> Duration {
    (until - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let other = clock.clone();
        let start = clock.now();

        other.advance(Duration::from_secs(60));

        assert_eq!(clock.now() - start, TimeDelta::seconds(60));
    }

    #[test]
    fn test_manual_clock_set() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(Utc::now());
        clock.set(at);
        assert_eq!(clock.now(), at);
    }

    #[test]
    fn test_add_duration_saturates() {
        let result = add_duration(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1));
        assert_eq!(result, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_duration_until() {
        let now = DateTime::from_timestamp(1_000, 0).unwrap();
        let later = DateTime::from_timestamp(1_030, 0).unwrap();
        assert_eq!(duration_until(now, later), Duration::from_secs(30));
        assert_eq!(duration_until(later, now), Duration::ZERO);
    }
}
