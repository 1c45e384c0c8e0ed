//! Token-bucket rate limiter for outbound API requests
//!
//! The bucket starts full. Each admitted request consumes one token and
//! tokens accrue continuously at `refill_rate` per second up to `capacity`.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
    }
}

/// Token-bucket admission control
///
/// Shareable across tasks behind an `Arc`. The refill-and-consume step runs
/// under a FIFO async mutex that is held for the whole acquisition, so
/// waiting callers are admitted in arrival order and token accounting is
/// exact under any interleaving.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a limiter with `capacity` tokens refilled at `refill_rate` per second
    ///
    /// Capacity below one token is raised to one; a non-positive rate is
    /// clamped to a tiny positive value so waits stay finite.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        let capacity = if capacity.is_finite() { capacity.max(1.0) } else { 1.0 };
        let refill_rate = if refill_rate.is_finite() && refill_rate > 0.0 {
            refill_rate
        } else {
            f64::EPSILON
        };

        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Create a limiter allowing `rate` requests per second with a burst of `rate`
    pub fn per_second(rate: f64) -> Self {
        Self::new(rate, rate)
    }

    /// Create a limiter from configuration
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::per_second(config.requests_per_second)
    }

    /// Wait until a token is available, then consume it
    ///
    /// Never fails; only delays.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        loop {
            state.refill(self.capacity, self.refill_rate);

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }

            let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.refill_rate);
            trace!(wait_ms = wait.as_millis() as u64, "Rate limiter waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume a token if one is available right now
    ///
    /// Returns false without waiting when the bucket is empty or another
    /// caller is currently acquiring.
    pub fn try_acquire(&self) -> bool {
        let Ok(mut state) = self.state.try_lock() else {
            return false;
        };

        state.refill(self.capacity, self.refill_rate);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token count after refilling
    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        state.refill(self.capacity, self.refill_rate);
        state.tokens
    }

    /// Refill the bucket to capacity
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.tokens = self.capacity;
        state.last_refill = Instant::now();
    }

    /// Maximum number of tokens
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}
