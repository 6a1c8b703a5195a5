use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// In-memory token-bucket rate limiter keyed by caller identity.
/// Owned by the composition root and injected into handlers as managed state,
/// so tests get a fresh limiter per instance. Bursts are allowed up to
/// `capacity`; tokens refill at a fixed rate. The mutex makes two requests
/// racing on a depleted bucket impossible to both succeed.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// `capacity` tokens maximum, one token regained every `refill_every`.
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        RateLimiter {
            capacity: capacity as f64,
            refill_per_sec: 1.0 / refill_every.as_secs_f64(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token from `key`'s bucket. Returns false when depleted;
    /// callers should answer 429.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, Instant::now())
    }

    /// Clock-explicit variant so tests can drive refill without sleeping.
    pub fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        let mut map = self.buckets.lock().unwrap();
        let bucket = map.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets that have fully refilled; their next acquire would start
    /// from capacity anyway.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut map = self.buckets.lock().unwrap();
        let capacity = self.capacity;
        let rate = self.refill_per_sec;
        map.retain(|_, bucket| {
            let elapsed = now.saturating_duration_since(bucket.last_refill);
            bucket.tokens + elapsed.as_secs_f64() * rate < capacity
        });
    }
}
