//! Time source
//!
//! Every timestamp the ledger writes and every wait the orchestrator performs
//! goes through a [`Clock`], so tests can run whole remediation sessions
//! without sleeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Wall clock plus the ability to wait
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Block for `duration`
    fn sleep(&self, duration: Duration);
}

/// Real time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when told to
///
/// `sleep` advances the clock instead of blocking.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    slept: Mutex<Duration>,
}

impl ManualClock {
    /// Clock frozen at `start`
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            slept: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let Ok(step) = chrono::Duration::from_std(by) else {
            return;
        };
        let mut now = self.now.lock();
        *now = now.checked_add_signed(step).unwrap_or(*now);
    }

    /// Total time spent in `sleep`
    #[must_use]
    pub fn slept(&self) -> Duration {
        *self.slept.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        *self.slept.lock() += duration;
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::default();
        let start = clock.now();
        clock.sleep(Duration::from_secs(90));
        clock.advance(Duration::from_secs(10));
        assert_eq!((clock.now() - start).num_seconds(), 100);
        assert_eq!(clock.slept(), Duration::from_secs(90));
    }
}
