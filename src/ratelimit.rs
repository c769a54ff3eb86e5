//! Per-origin token buckets for outbound fetches.
//!
//! One limiter per process; workers acquire a permit for the target
//! eTLD+1 before fetching. A bucket refills continuously at the
//! configured rate and holds at most `burst` tokens.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter keyed by origin (eTLD+1)
pub struct OriginLimiter {
    rate_per_sec: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl OriginLimiter {
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self {
            rate_per_sec: rate_per_sec.max(0.01),
            burst: burst.max(1.0),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take one token for `origin`. Returns `Ok(())` when allowed,
    /// or the duration until a token becomes available. Callers treat the
    /// deferral as "try again next cycle", never as a failure.
    pub fn try_acquire(&self, origin: &str) -> std::result::Result<(), Duration> {
        let mut buckets = self.buckets.lock().expect("limiter poisoned");
        let now = Instant::now();
        let bucket = buckets.entry(origin.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let wait = (1.0 - bucket.tokens) / self.rate_per_sec;
            Err(Duration::from_secs_f64(wait))
        }
    }

    /// Acquire a token, sleeping until one is available
    pub async fn acquire(&self, origin: &str) {
        loop {
            match self.try_acquire(origin) {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_deferral() {
        let limiter = OriginLimiter::new(1.0, 2.0);
        assert!(limiter.try_acquire("bbc.com").is_ok());
        assert!(limiter.try_acquire("bbc.com").is_ok());
        assert!(limiter.try_acquire("bbc.com").is_err());
    }

    #[test]
    fn test_origins_are_independent() {
        let limiter = OriginLimiter::new(1.0, 1.0);
        assert!(limiter.try_acquire("bbc.com").is_ok());
        assert!(limiter.try_acquire("cnn.com").is_ok());
        assert!(limiter.try_acquire("bbc.com").is_err());
    }
}
