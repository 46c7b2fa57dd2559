//! Per-model request budgets with coordinated backoff.
//!
//! Each `provider:model` key owns a bucket holding a per-minute and a per-day
//! token count. Buckets start full the first time a key is seen. A window is
//! refilled to its full limit in one step once it has been open for at least
//! its length; there is no continuous drip. When a provider signals rate
//! limiting the bucket is frozen until an exponential backoff deadline passes.
//!
//! State lives in process memory only. A restart starts every bucket full.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::id::now_ms;

/// Length of the short refill window.
pub const MINUTE_MS: i64 = 60_000;
/// Length of the long refill window.
pub const DAY_MS: i64 = 86_400_000;
/// Backoff applied on the first rate-limit signal.
pub const BASE_BACKOFF_MS: i64 = 30_000;
/// Backoff never exceeds this.
pub const MAX_BACKOFF_MS: i64 = 300_000;

/// Request limits for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    /// Requests per minute.
    pub rpm: u32,
    /// Requests per day.
    pub rpd: u32,
}

impl RateLimits {
    pub fn new(rpm: u32, rpd: u32) -> Self {
        Self { rpm, rpd }
    }
}

#[derive(Debug, Clone)]
struct RateBucket {
    minute_tokens: u32,
    day_tokens: u32,
    last_minute_refill: i64,
    last_day_refill: i64,
    backoff_until: i64,
}

impl RateBucket {
    fn full(limits: RateLimits, now: i64) -> Self {
        Self {
            minute_tokens: limits.rpm,
            day_tokens: limits.rpd,
            last_minute_refill: now,
            last_day_refill: now,
            backoff_until: 0,
        }
    }

    fn refill(&mut self, limits: RateLimits, now: i64) {
        if now - self.last_minute_refill >= MINUTE_MS {
            self.minute_tokens = limits.rpm;
            self.last_minute_refill = now;
        }
        if now - self.last_day_refill >= DAY_MS {
            self.day_tokens = limits.rpd;
            self.last_day_refill = now;
        }
    }

    fn is_available(&self, now: i64) -> bool {
        now >= self.backoff_until && self.minute_tokens > 0 && self.day_tokens > 0
    }

    fn take(&mut self) {
        self.minute_tokens = self.minute_tokens.saturating_sub(1);
        self.day_tokens = self.day_tokens.saturating_sub(1);
    }
}

/// Snapshot of one bucket, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketStatus {
    pub minute_tokens: u32,
    pub day_tokens: u32,
    /// Epoch ms before which the key is refused; 0 when never backed off.
    pub backoff_until: i64,
}

/// Backoff for the given attempt number (1-based).
///
/// `min(30s * 2^(attempt-1), 5min)`. Attempt numbers below 1 count as 1.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.max(1) - 1;
    // 30s * 2^4 already exceeds the cap
    let ms = if exponent >= 4 {
        MAX_BACKOFF_MS
    } else {
        (BASE_BACKOFF_MS << exponent).min(MAX_BACKOFF_MS)
    };
    Duration::from_millis(ms as u64)
}

/// Shared rate limiter for every provider/model pair.
///
/// The `*_at` variants take an explicit clock in epoch milliseconds; the
/// plain variants use the wall clock.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, RateBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    // Buckets are plain counters, so a panic mid-update leaves nothing worth refusing.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateBucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a request to `key` would be admitted now. Does not consume.
    pub fn can_make_request(&self, key: &str, limits: RateLimits) -> bool {
        self.can_make_request_at(key, limits, now_ms())
    }

    pub fn can_make_request_at(&self, key: &str, limits: RateLimits, now: i64) -> bool {
        let mut buckets = self.lock();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| RateBucket::full(limits, now));
        bucket.refill(limits, now);
        bucket.is_available(now)
    }

    /// Take one token from both windows.
    pub fn consume_request(&self, key: &str, limits: RateLimits) {
        self.consume_request_at(key, limits, now_ms())
    }

    pub fn consume_request_at(&self, key: &str, limits: RateLimits, now: i64) {
        let mut buckets = self.lock();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| RateBucket::full(limits, now));
        bucket.refill(limits, now);
        bucket.take();
    }

    /// Check and consume in one step under the lock.
    ///
    /// Returns true when a token was taken.
    pub fn try_acquire(&self, key: &str, limits: RateLimits) -> bool {
        self.try_acquire_at(key, limits, now_ms())
    }

    pub fn try_acquire_at(&self, key: &str, limits: RateLimits, now: i64) -> bool {
        let mut buckets = self.lock();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| RateBucket::full(limits, now));
        bucket.refill(limits, now);
        if !bucket.is_available(now) {
            return false;
        }
        bucket.take();
        true
    }

    /// Refuse `key` until the backoff for `attempt` has elapsed.
    ///
    /// Keys that have never been seen are left alone.
    pub fn apply_backoff(&self, key: &str, attempt: u32) {
        self.apply_backoff_at(key, attempt, now_ms())
    }

    pub fn apply_backoff_at(&self, key: &str, attempt: u32, now: i64) {
        let delay = backoff_delay(attempt);
        let mut buckets = self.lock();
        let Some(bucket) = buckets.get_mut(key) else {
            tracing::debug!(key, "Backoff requested for unknown bucket, ignoring");
            return;
        };
        bucket.backoff_until = now + delay.as_millis() as i64;

        tracing::warn!(
            key,
            attempt,
            backoff_secs = delay.as_secs(),
            "Rate limited, backing off"
        );
    }

    /// Snapshot of every bucket, sorted by key.
    pub fn status(&self) -> BTreeMap<String, BucketStatus> {
        self.lock()
            .iter()
            .map(|(key, b)| {
                (
                    key.clone(),
                    BucketStatus {
                        minute_tokens: b.minute_tokens,
                        day_tokens: b.day_tokens,
                        backoff_until: b.backoff_until,
                    },
                )
            })
            .collect()
    }
}
