//! Token-bucket rate limiting shared by everything that talks to an external
//! API with a request budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

const MILLIS_PER_MINUTE: f64 = 60_000.0;

/// One logical token bucket per named resource.
///
/// `reserve` never blocks: it either consumes a token and returns
/// `Duration::ZERO`, or returns how long the caller should sleep before
/// trying again. Refill-then-consume is atomic per bucket; distinct resource
/// names never contend with each other (the outer map lock is held only for
/// bucket lookup).
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

struct TokenBucket {
    requests_per_minute: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_minute: f64) -> Self {
        Self {
            requests_per_minute,
            // A fresh bucket starts full.
            tokens: requests_per_minute,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed_millis = now.duration_since(self.last_refill).as_millis() as f64;
        let refilled = elapsed_millis / MILLIS_PER_MINUTE * self.requests_per_minute;
        self.tokens = (self.tokens + refilled).min(self.requests_per_minute);
        self.last_refill = now;
    }

    fn reserve(&mut self, requests_per_minute: f64) -> Duration {
        // Capacity is configurable per call; shrinking it also caps any
        // tokens accumulated under the old budget.
        self.requests_per_minute = requests_per_minute;
        self.tokens = self.tokens.min(requests_per_minute);
        self.refill(Instant::now());

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Duration::ZERO;
        }

        let period_per_token = MILLIS_PER_MINUTE / self.requests_per_minute;
        let wait_millis = (period_per_token * (1.0 - self.tokens)).ceil();
        Duration::from_millis(wait_millis as u64)
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns how long to wait before a request against `resource` is within
    /// budget. Zero means a token was consumed and the request may proceed
    /// now; callers are responsible for sleeping the returned duration and
    /// calling again.
    pub async fn reserve(&self, resource: &str, requests_per_minute: u32) -> Duration {
        let bucket = {
            let mut buckets = self.buckets.lock().await;
            buckets
                .entry(resource.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(TokenBucket::new(requests_per_minute as f64)))
                })
                .clone()
        };

        let mut bucket = bucket.lock().await;
        bucket.reserve(requests_per_minute as f64)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_capped_at_capacity() {
        let limiter = RateLimiter::new();

        // A fresh bucket allows exactly `rpm` immediate requests...
        for _ in 0..60 {
            assert_eq!(limiter.reserve("github", 60).await, Duration::ZERO);
        }
        // ...then the next caller has to wait.
        let wait = limiter.reserve("github", 60).await;
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(1001));
    }

    #[tokio::test]
    async fn wait_never_consumes_a_token() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.reserve("embeddings", 5).await;
        }

        // Repeated denied reservations keep returning a wait without pushing
        // the next token further out.
        let first = limiter.reserve("embeddings", 5).await;
        let second = limiter.reserve("embeddings", 5).await;
        assert!(first > Duration::ZERO);
        assert!(second > Duration::ZERO);
        assert!(second <= first + Duration::from_millis(1));
    }

    #[tokio::test]
    async fn buckets_are_independent_per_resource() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert_eq!(limiter.reserve("a", 3).await, Duration::ZERO);
        }
        assert!(limiter.reserve("a", 3).await > Duration::ZERO);

        // Resource "b" has its own full bucket.
        assert_eq!(limiter.reserve("b", 3).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::new();
        // 600 rpm = one token every 100ms.
        for _ in 0..600 {
            limiter.reserve("fast", 600).await;
        }
        assert!(limiter.reserve("fast", 600).await > Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(limiter.reserve("fast", 600).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn shrinking_capacity_caps_accumulated_tokens() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.reserve("resize", 1000).await, Duration::ZERO);

        // Same bucket, much smaller budget: the stored tokens must not let
        // callers burst past the new capacity.
        for _ in 0..2 {
            assert_eq!(limiter.reserve("resize", 2).await, Duration::ZERO);
        }
        assert!(limiter.reserve("resize", 2).await > Duration::ZERO);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_oversubscribe() {
        let limiter = Arc::new(RateLimiter::new());
        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.reserve("shared", 50).await == Duration::ZERO
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert!(granted <= 50);
    }
}
