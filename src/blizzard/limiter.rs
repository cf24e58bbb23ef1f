//! Token bucket rate limiting for outbound Blizzard API calls.
//!
//! Blizzard enforces two independent quotas per client credential: a
//! per-second ceiling and an hourly ceiling. Both are modeled as token
//! buckets refilled from elapsed monotonic time; `acquire` consumes from
//! both so whichever bucket is the bottleneck governs the wait.

use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Seconds in the hourly refill window.
const HOUR_SECS: f64 = 3600.0;

struct Buckets {
    second_tokens: f64,
    hourly_tokens: f64,
    last_refill: Instant,
}

/// Dual token bucket guarding a single API credential.
///
/// Sleeping happens outside the mutex so concurrent callers can still
/// refill and drain while one caller waits its turn.
pub struct TokenBucketLimiter {
    requests_per_second: f64,
    hourly_quota: f64,
    buckets: Mutex<Buckets>,
}

impl TokenBucketLimiter {
    pub fn new(requests_per_second: u32, hourly_quota: u32) -> Self {
        let rps = f64::from(requests_per_second.max(1));
        let hourly = f64::from(hourly_quota.max(1));
        Self {
            requests_per_second: rps,
            hourly_quota: hourly,
            buckets: Mutex::new(Buckets {
                second_tokens: rps,
                hourly_tokens: hourly,
                last_refill: Instant::now(),
            }),
        }
    }

    fn hourly_rate(&self) -> f64 {
        self.hourly_quota / HOUR_SECS
    }

    /// Block until a token is available in both buckets, then consume one
    /// from each. No queue; waiters are fair only in the statistical sense.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut b = self.buckets.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(b.last_refill).as_secs_f64();
                b.last_refill = now;
                b.second_tokens = (b.second_tokens + elapsed * self.requests_per_second)
                    .min(self.requests_per_second);
                b.hourly_tokens =
                    (b.hourly_tokens + elapsed * self.hourly_rate()).min(self.hourly_quota);

                if b.second_tokens >= 1.0 && b.hourly_tokens >= 1.0 {
                    b.second_tokens -= 1.0;
                    b.hourly_tokens -= 1.0;
                    return;
                }

                // Wait for whichever bucket is further from yielding a token.
                let second_wait = (1.0 - b.second_tokens) / self.requests_per_second;
                let hourly_wait = (1.0 - b.hourly_tokens) / self.hourly_rate();
                second_wait.max(hourly_wait)
            };

            // 0-25% jitter spreads out concurrent waiters so they don't all
            // wake on the same tick and stampede the refill.
            let jitter = 1.0 + rand::rng().random_range(0.0..0.25);
            tokio::time::sleep(Duration::from_secs_f64(wait * jitter)).await;
        }
    }

    /// Drain both buckets below zero so every concurrent caller on this
    /// credential backs off for roughly `drain_secs` after a 429.
    pub async fn penalize(&self, drain_secs: f64) {
        let mut b = self.buckets.lock().await;
        b.second_tokens = b
            .second_tokens
            .min(-drain_secs * self.requests_per_second);
        b.hourly_tokens = b.hourly_tokens.min(-drain_secs * self.hourly_rate());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_block() {
        let limiter = TokenBucketLimiter::new(2, 1_000_000);

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));

        // Third call has an empty bucket: (1 - 0) / 2 = 500ms, plus up to
        // 25% jitter.
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "elapsed: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(700), "elapsed: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_capacity() {
        let limiter = TokenBucketLimiter::new(2, 1_000_000);
        limiter.acquire().await;
        limiter.acquire().await;

        // A long idle period must not bank more than one second of burst.
        tokio::time::sleep(Duration::from_secs(60)).await;

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalize_delays_all_callers() {
        let limiter = Arc::new(TokenBucketLimiter::new(10, 1_000_000));
        limiter.penalize(3.0).await;

        let start = Instant::now();
        limiter.acquire().await;
        // Tokens start at -30: (1 - (-30)) / 10 = 3.1s minimum.
        assert!(start.elapsed() >= Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hourly_bucket_is_the_bottleneck() {
        // Generous per-second rate but a two-request hourly quota.
        let limiter = TokenBucketLimiter::new(100, 2);

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));

        // Hourly refill is 2/3600 tokens per second, so the third token
        // takes half an hour to accrue.
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(30 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_respect_rate() {
        let limiter = Arc::new(TokenBucketLimiter::new(5, 1_000_000));

        let start = Instant::now();
        let handles: Vec<_> = (0..15)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // 5 burst + 10 refilled at 5/s: at least 2 seconds of waiting.
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
