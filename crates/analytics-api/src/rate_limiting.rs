//! Per-user rate limiting for export endpoints
//!
//! Limiters are plain values injected through application state; each
//! export route owns its own instance and quota.
//!
//! - Fixed-window counting per key (the caller's user id)
//! - Memory bounds: idle buckets are evicted once the bucket count passes
//!   half of `max_buckets`
//! - RFC 6585 style 429 responses with `retry-after` and `x-ratelimit-*` headers

use axum::http::{
    header::{HeaderName, HeaderValue},
    HeaderMap,
};
use dashmap::DashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Default maximum number of rate limit buckets to keep in memory
pub const DEFAULT_MAX_BUCKETS: usize = 10_000;

/// Default TTL for idle rate limit buckets (2 hours)
pub const DEFAULT_BUCKET_TTL_SECS: u64 = 7200;

/// Configuration for a single limiter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: u32,
    pub window_secs: u64,
    pub max_buckets: usize,
    pub bucket_ttl_secs: u64,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
            max_buckets: DEFAULT_MAX_BUCKETS,
            bucket_ttl_secs: DEFAULT_BUCKET_TTL_SECS,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests == 0 {
            return Err("max_requests must be > 0".to_string());
        }
        if self.window_secs == 0 {
            return Err("window_secs must be > 0".to_string());
        }
        if self.max_buckets == 0 {
            return Err("max_buckets must be > 0".to_string());
        }
        Ok(())
    }
}

/// Outcome of a rate limit check, with header metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp at which the current window resets
    pub reset: u64,
    /// Seconds until a retry can succeed (0 when allowed)
    pub retry_after: u64,
}

impl RateLimitDecision {
    /// Write the `x-ratelimit-*` headers (and `retry-after` when rejected)
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(self.limit),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(self.remaining),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderValue::from(self.reset),
        );
        if !self.allowed {
            headers.insert(
                HeaderName::from_static("retry-after"),
                HeaderValue::from(self.retry_after),
            );
        }
    }
}

/// A keyed request quota
pub trait RateLimiter: Send + Sync {
    /// Count a request against `key` and report the decision
    fn check(&self, key: &str) -> RateLimitDecision;

    /// Count a request against `key`; `true` when it is within quota
    fn allow(&self, key: &str) -> bool {
        self.check(key).allowed
    }
}

/// Rate limit bucket for tracking requests
#[derive(Clone, Debug)]
struct RateLimitBucket {
    count: u32,
    window_start: Instant,
    last_accessed: Instant,
}

/// In-memory fixed-window limiter
pub struct FixedWindowLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, RateLimitBucket>,
}

impl FixedWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of live buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn evict_idle(&self, now: Instant) {
        let threshold = self.config.max_buckets / 2;
        if self.buckets.len() > threshold {
            let ttl = Duration::from_secs(self.config.bucket_ttl_secs);
            let before = self.buckets.len();
            self.buckets
                .retain(|_, bucket| now.duration_since(bucket.last_accessed) < ttl);
            debug!(
                evicted = before - self.buckets.len(),
                remaining = self.buckets.len(),
                "Evicted idle rate limit buckets"
            );
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let window = Duration::from_secs(self.config.window_secs);
        let limit = self.config.max_requests;

        self.evict_idle(now);

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| RateLimitBucket {
                count: 0,
                window_start: now,
                last_accessed: now,
            });

        bucket.last_accessed = now;

        // Check if window has expired
        if now.duration_since(bucket.window_start) >= window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        let elapsed = now.duration_since(bucket.window_start);
        let until_reset = window.saturating_sub(elapsed);
        let reset = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .saturating_add(until_reset.as_secs());

        if bucket.count >= limit {
            // Round up so a client never retries a moment too early
            let retry_after = until_reset.as_secs() + u64::from(until_reset.subsec_nanos() > 0);
            warn!(key, limit, retry_after, "Rate limit exceeded");
            return RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset,
                retry_after,
            };
        }

        bucket.count += 1;
        RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(bucket.count),
            reset,
            retry_after: 0,
        }
    }
}
