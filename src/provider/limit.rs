//! Token-bucket rate limiting for provider quotas.
//!
//! Buckets are sized to the provider quota (embeddings 3500/min, LLM
//! 500/min by default). Exceeding the bucket blocks the caller until a
//! token refills; nothing is ever dropped.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// A token bucket refilled continuously at a fixed rate.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a limiter allowing `per_minute` calls per minute.
    ///
    /// The bucket starts full, so bursts up to the quota are admitted
    /// immediately.
    #[must_use]
    pub fn per_minute(per_minute: u32) -> Self {
        let capacity = f64::from(per_minute.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Acquires one token, sleeping until the bucket can supply it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let Ok(mut state) = self.state.lock() else {
                    return;
                };
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (for tests and diagnostics).
    #[must_use]
    pub fn available(&self) -> f64 {
        self.state.lock().map_or(0.0, |state| state.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_within_capacity_is_immediate() {
        let limiter = RateLimiter::per_minute(60);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(limiter.available() < 51.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_bucket_blocks_until_refill() {
        let limiter = RateLimiter::per_minute(60);
        for _ in 0..60 {
            limiter.acquire().await;
        }
        // 61st call must wait for ~1s of refill; paused time makes the
        // sleep virtual.
        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_zero_quota_clamps_to_one() {
        let limiter = RateLimiter::per_minute(0);
        limiter.acquire().await;
    }
}
