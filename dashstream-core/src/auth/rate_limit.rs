//! Per client IP token bucket for the login endpoint. Clients are keyed by
//! the socket peer address, request headers are never consulted.

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    net::IpAddr,
    time::{Duration, Instant},
};

use crate::config::RateLimitConfig;

// Buckets idle longer than this many refill periods are forgotten.
const IDLE_PERIODS: u32 = 10;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn try_consume(&mut self, now: Instant, rate_per_sec: f64, capacity: f64) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Always true when rate limiting is disabled.
    pub fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now())
    }

    fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        if !self.config.enabled {
            return true;
        }

        let capacity = self.config.max_burst as f64;
        let rate = self.config.max_requests as f64 / self.config.period.as_secs_f64();

        let mut buckets = self.buckets.lock();
        if buckets.len() > 1024 {
            let idle = self.config.period * IDLE_PERIODS;
            buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < idle);
        }

        buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket {
                tokens: capacity,
                last_refill: now,
            })
            .try_consume(now, rate, capacity)
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn period(&self) -> Duration {
        self.config.period
    }
}
