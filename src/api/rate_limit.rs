//! Per-client rate limiting.
//!
//! Each client IP gets a token bucket that refills continuously. Buckets live in
//! a `moka` cache and expire after a period of inactivity.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use moka::sync::Cache;

use crate::config::SecurityConfig;

/// Buckets idle this long are evicted; a returning client starts full again.
const BUCKET_IDLE_TTL: Duration = Duration::from_secs(10 * 60);

/// Upper bound on tracked clients.
const MAX_TRACKED_CLIENTS: u64 = 100_000;

/// Token bucket with continuous refill.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    tokens_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket holding `burst` tokens that refills at `per_second`.
    pub fn new(burst: u32, per_second: u32) -> Self {
        Self {
            capacity: f64::from(burst),
            tokens: f64::from(burst),
            tokens_per_sec: f64::from(per_second),
            last_refill: Instant::now(),
        }
    }

    /// Takes one token. Returns false if the bucket is empty.
    pub fn try_acquire(&mut self) -> bool {
        self.refill(Instant::now());

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.tokens_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Whole tokens currently available.
    pub fn available(&mut self) -> u32 {
        self.refill(Instant::now());
        self.tokens as u32
    }
}

/// Rate limiter keyed by client IP.
pub struct RateLimiter {
    per_second: u32,
    burst: u32,
    buckets: Cache<IpAddr, Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    pub fn new(per_second: u32, burst: u32) -> Self {
        let buckets = Cache::builder()
            .max_capacity(MAX_TRACKED_CLIENTS)
            .time_to_idle(BUCKET_IDLE_TTL)
            .build();

        Self {
            per_second,
            burst,
            buckets,
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(config.rate_limit_per_second, config.rate_limit_burst)
    }

    /// Returns true if `client` may make another request now.
    pub fn check(&self, client: IpAddr) -> bool {
        let (burst, per_second) = (self.burst, self.per_second);
        let bucket = self
            .buckets
            .get_with(client, || Arc::new(Mutex::new(TokenBucket::new(burst, per_second))));

        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_acquire()
    }
}
