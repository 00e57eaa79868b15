//! Token-bucket rate limiter for venue request budgets.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A token bucket refilled continuously at `refill_per_sec`.
///
/// Exhaustion does not block: callers get the wait until the requested
/// weight would be available and surface it as a retryable rate-limit error.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    /// A bucket holding `capacity` tokens, refilling at `refill_per_sec`.
    #[must_use]
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Convenience: `rps` requests per second with a burst of the same size.
    #[must_use]
    pub fn per_second(rps: f64) -> Self {
        Self::new(rps, rps)
    }

    /// Take `weight` tokens, or report how long until they would exist.
    pub fn try_acquire(&self, weight: f64) -> Result<(), Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.refilled_at = now;

        if state.tokens >= weight {
            state.tokens -= weight;
            Ok(())
        } else {
            let deficit = weight - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}
