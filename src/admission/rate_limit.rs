//! Per-IP fixed-window rate limiting.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

struct Bucket {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window rate limiter keyed by client IP.
///
/// Buckets are created lazily on first request and evicted whenever an
/// access observes their window has expired, so the map stays bounded by
/// the set of IPs active within one window.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window` per key.
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            window,
            max_requests,
        }
    }

    /// Record a request from `key`. Returns `Ok(())` when admitted, or
    /// the whole seconds until the window resets when denied.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        buckets.retain(|_, bucket| bucket.reset_at > now);

        match buckets.get_mut(key) {
            Some(bucket) => {
                if bucket.count >= self.max_requests {
                    let remaining = bucket.reset_at.saturating_duration_since(now);
                    return Err(remaining.as_millis().div_ceil(1000) as u64);
                }
                bucket.count += 1;
                Ok(())
            }
            None => {
                buckets.insert(
                    key.to_string(),
                    Bucket {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                Ok(())
            }
        }
    }

    /// Number of live buckets, for tests and diagnostics.
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }
}
