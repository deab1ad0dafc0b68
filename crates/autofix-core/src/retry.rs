//! Bounded waits
//!
//! Every suspension point of the orchestrator goes through one of two
//! primitives, both driven by a [`Clock`]:
//! - [`RetryPolicy`]: repeat a fallible call with exponential backoff, capped
//!   by attempts and by elapsed time
//! - [`PollPolicy`]: repeat a probe at a fixed interval until it yields a
//!   value or the timeout passes

use std::time::Duration;

use autofix_ledger::Clock;
use tracing::{debug, warn};

/// Exponential backoff with attempt and wall-time caps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    /// At most `max_attempts` calls, 1s initial delay doubling up to 60s
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_elapsed: None,
        }
    }

    /// With first backoff delay
    #[inline]
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// With backoff ceiling
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// With wall-time budget
    #[inline]
    #[must_use]
    pub fn with_max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    /// Attempt cap
    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt + 1`
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Call `op` until it succeeds, fails permanently, or the budget runs out
    ///
    /// `op` receives the 1-based attempt number. The last error is returned
    /// together with the number of attempts made.
    ///
    /// # Errors
    /// Returns the last error once no further attempt is allowed
    pub fn run<T, E>(
        &self,
        clock: &dyn Clock,
        is_retryable: impl Fn(&E) -> bool,
        mut op: impl FnMut(u32) -> Result<T, E>,
    ) -> Result<T, (E, u32)>
    where
        E: std::fmt::Display,
    {
        let started = clock.now();
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) || attempt >= self.max_attempts => {
                    return Err((e, attempt));
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    if let Some(budget) = self.max_elapsed {
                        let spent = (clock.now() - started).to_std().unwrap_or_default();
                        if spent + delay > budget {
                            warn!("retry budget of {:?} spent after {} attempt(s): {}", budget, attempt, e);
                            return Err((e, attempt));
                        }
                    }
                    debug!("attempt {} failed ({}), retrying in {:?}", attempt, e, delay);
                    clock.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Fixed-interval polling with a timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    interval: Duration,
    timeout: Duration,
}

impl PollPolicy {
    /// Poll every `interval` for at most `timeout`
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Probe until it yields `Some`, returning `None` on timeout
    ///
    /// The probe always runs at least once.
    ///
    /// # Errors
    /// Returns the first probe error
    pub fn run<T, E>(
        &self,
        clock: &dyn Clock,
        mut probe: impl FnMut() -> Result<Option<T>, E>,
    ) -> Result<Option<T>, E> {
        let started = clock.now();
        loop {
            if let Some(value) = probe()? {
                return Ok(Some(value));
            }
            let spent = (clock.now() - started).to_std().unwrap_or_default();
            if spent + self.interval > self.timeout {
                debug!("poll timed out after {:?}", spent);
                return Ok(None);
            }
            clock.sleep(self.interval);
        }
    }
}
