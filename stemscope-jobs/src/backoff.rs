//! Reconnect and retry backoff
//!
//! Shared delay policy for the push channel and the HTTP retry helper.
//! Delays double from one second up to a thirty second ceiling and reset on
//! success, so a long outage never turns into a hammering loop and a brief
//! blip recovers quickly.

use std::time::Duration;

use rand::Rng;

/// First delay after a failure
pub const INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Delays never exceed this
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Doubling backoff with a ceiling
///
/// `next_delay` returns the delay to wait before the upcoming attempt and
/// advances the schedule. `reset` is called on every successful connection
/// so the next failure starts the schedule over.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self { current: INITIAL_DELAY }
    }

    /// Delay before the next attempt: 1s, 2s, 4s, ... capped at 30s.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_DELAY);
        delay
    }

    pub fn reset(&mut self) {
        self.current = INITIAL_DELAY;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff delay for HTTP retries: exponential with jitter, capped at 30s.
///
/// `attempt` is zero-based. Jitter spreads simultaneous clients over a
/// window up to one extra base delay.
pub fn retry_delay(attempt: u32) -> Duration {
    let base = INITIAL_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_DELAY);
    let jitter = rand::thread_rng().gen_range(0.0..=1.0);
    let with_jitter = base.mul_f64(1.0 + jitter);
    with_jitter.min(MAX_DELAY)
}
