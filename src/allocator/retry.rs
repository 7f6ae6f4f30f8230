//! Backoff and deadline bookkeeping for allocation retries.

use rand::Rng;
use std::time::{Duration, Instant};

/// Capped exponential backoff with full jitter
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms.max(base_ms)),
        }
    }

    /// Upper bound of the wait before retry number `attempt` (0-based)
    pub(crate) fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Random wait in `0..=ceiling(attempt)`
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Deadline of one allocation call
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub(crate) fn start(limit: Option<Duration>) -> Self {
        Self { started: Instant::now(), limit }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn expired(&self) -> bool {
        self.limit.is_some_and(|limit| self.elapsed() >= limit)
    }

    /// Time left, `None` when unbounded
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.limit.map(|limit| limit.saturating_sub(self.elapsed()))
    }

    /// Sleep for `wait`, cut short by the deadline.
    ///
    /// Yields the coroutine when called inside one, blocks the thread otherwise.
    pub(crate) fn sleep(&self, wait: Duration) {
        let wait = self.remaining().map_or(wait, |left| wait.min(left));
        if !wait.is_zero() {
            may::coroutine::sleep(wait);
        }
    }
}
