//! Token bucket rate limiter gating outbound deliveries.
//!
//! The bucket starts full with `capacity` tokens and is refilled at `rate`
//! tokens per second, never above capacity. `acquire` never rejects; it waits
//! until a token is available and takes exactly one.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

/// Thread-safe token bucket shared by every processing loop.
pub struct RateLimiter {
    capacity: u32,
    rate: u32,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `max_per_second` permits per second with an
    /// equal burst capacity.
    pub fn new(max_per_second: u32) -> Self {
        Self::with_capacity(max_per_second, max_per_second)
    }

    /// Create a limiter with separate burst `capacity` and refill `rate`.
    ///
    /// Both are clamped to at least 1.
    pub fn with_capacity(capacity: u32, rate: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            rate: rate.max(1),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a permit is available, then consume it.
    ///
    /// The refill-and-decrement step runs under the bucket lock; the lock is
    /// never held across the sleep, so concurrent acquirers may race for the
    /// next token and the loser simply waits again.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.take_or_wait() {
                None => return,
                Some(wait) => wait,
            };

            debug!(wait_ms = wait.as_millis() as u64, "rate_limiter_waiting");
            sleep(wait).await;
        }
    }

    /// Returns `None` when a token was taken, otherwise how long to wait
    /// for the next one.
    fn take_or_wait(&self) -> Option<Duration> {
        let mut bucket = self.lock();
        self.refill(&mut bucket);

        if bucket.tokens >= 1 {
            bucket.tokens -= 1;
            return None;
        }

        // ceil((1 - tokens) * 1000 / rate) with tokens == 0
        let wait_ms = (1000 + u64::from(self.rate) - 1) / u64::from(self.rate);
        Some(Duration::from_millis(wait_ms))
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(bucket.last_refill).as_millis() as u64;
        let refill = elapsed_ms * u64::from(self.rate) / 1000;

        if refill > 0 {
            let tokens = (u64::from(bucket.tokens) + refill).min(u64::from(self.capacity));
            bucket.tokens = tokens as u32;
            bucket.last_refill = now;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
