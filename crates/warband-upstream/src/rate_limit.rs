//! Token bucket gate for calls to the upstream provider
//!
//! The limiter throttles and never rejects: callers without a token are
//! suspended until one is refilled or [`RateLimiter::replenish`] adds one.
//! Only the network exchange should be wrapped, so cache hits cost nothing.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket size (burst)
    pub capacity: u32,
    /// Tokens added per second. Zero disables refill.
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 10.0,
        }
    }
}

impl RateLimitConfig {
    /// Create rate limit configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create rate limit configuration from a variable lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            capacity: get("WARBAND_RATE_CAPACITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.capacity),
            refill_per_sec: get("WARBAND_RATE_REFILL")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.refill_per_sec),
        }
    }
}

/// Read-only snapshot of the limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub available_tokens: u32,
    pub capacity: u32,
    pub refill_rate: f64,
    /// When the next whole token becomes available. None when refill is disabled
    /// and the bucket is not full.
    pub next_refill_at: Option<DateTime<Utc>>,
    /// Callers currently suspended waiting for a token
    pub waiting: usize,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Keeps the waiter count accurate when an acquire is cancelled.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    capacity_tokens: u32,
    refill_rate: f64,
    notify: Notify,
    waiting: AtomicUsize,
    granted: AtomicU64,
    throttled: AtomicU64,
}

impl RateLimiter {
    /// Starts with a full bucket.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: f64::from(config.capacity),
                last_refill: Instant::now(),
            }),
            capacity: f64::from(config.capacity),
            capacity_tokens: config.capacity,
            refill_rate: config.refill_per_sec.max(0.0),
            notify: Notify::new(),
            waiting: AtomicUsize::new(0),
            granted: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.duration_since(bucket.last_refill);
        let tokens_to_add = elapsed.as_secs_f64() * self.refill_rate;
        if tokens_to_add > 0.0 {
            bucket.tokens = (bucket.tokens + tokens_to_add).min(self.capacity);
        }
        bucket.last_refill = now;
    }

    /// Take one token, or report how long until one is due.
    ///
    /// `Err(None)` means no refill is scheduled.
    fn try_take(&self) -> Result<(), Option<Duration>> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }
        if self.refill_rate > 0.0 {
            let missing = 1.0 - bucket.tokens;
            Err(Some(Duration::from_secs_f64(missing / self.refill_rate)))
        } else {
            Err(None)
        }
    }

    /// Suspend until a token is available, then consume it.
    pub async fn acquire(&self) {
        let mut waiting: Option<WaitingGuard<'_>> = None;

        loop {
            // Register for wakeups before inspecting the bucket so a
            // concurrent replenish cannot be missed.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            let wait = match self.try_take() {
                Ok(()) => break,
                Err(wait) => wait,
            };

            if waiting.is_none() {
                waiting = Some(WaitingGuard::enter(&self.waiting));
                self.throttled.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(?wait, "Rate limiter exhausted, waiting for a token");
            }

            match wait {
                Some(delay) => {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = &mut notified => {}
                    }
                }
                None => notified.await,
            }
        }

        drop(waiting);
        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    /// Run `work` once a token has been taken.
    pub async fn limit<F: Future>(&self, work: F) -> F::Output {
        self.acquire().await;
        work.await
    }

    /// Add tokens (capped at capacity) and wake waiters.
    pub fn replenish(&self, tokens: u32) {
        {
            let mut bucket = self.bucket.lock();
            self.refill(&mut bucket, Instant::now());
            bucket.tokens = (bucket.tokens + f64::from(tokens)).min(self.capacity);
        }
        self.notify.notify_waiters();
    }

    pub fn status(&self) -> RateLimitStatus {
        let (tokens, wait) = {
            let mut bucket = self.bucket.lock();
            self.refill(&mut bucket, Instant::now());
            let tokens = bucket.tokens;
            let wait = if tokens >= self.capacity {
                Some(Duration::ZERO)
            } else if self.refill_rate > 0.0 {
                let missing = 1.0 - tokens.fract();
                Some(Duration::from_secs_f64(missing / self.refill_rate))
            } else {
                None
            };
            (tokens, wait)
        };

        RateLimitStatus {
            available_tokens: tokens.floor() as u32,
            capacity: self.capacity_tokens,
            refill_rate: self.refill_rate,
            next_refill_at: wait
                .and_then(|w| chrono::Duration::from_std(w).ok())
                .map(|w| Utc::now() + w),
            waiting: self.waiting.load(Ordering::Relaxed),
        }
    }

    /// Tokens handed out since creation.
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    /// Acquisitions that had to wait.
    pub fn throttled(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(capacity: u32, refill_per_sec: f64) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimitConfig {
            capacity,
            refill_per_sec,
        }))
    }

    #[tokio::test]
    async fn test_sixth_call_blocks_until_replenished() {
        let limiter = limiter(5, 0.0);

        for _ in 0..5 {
            tokio::time::timeout(Duration::from_millis(50), limiter.acquire())
                .await
                .expect("bucket should have tokens");
        }
        assert_eq!(limiter.status().available_tokens, 0);

        let blocked =
            tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
        assert!(blocked.is_err(), "sixth call must wait");

        let sixth = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.limit(async { "ran" }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sixth.is_finished());
        assert_eq!(limiter.status().waiting, 1);

        limiter.replenish(1);
        let output = tokio::time::timeout(Duration::from_secs(1), sixth)
            .await
            .expect("replenish must wake the waiter")
            .unwrap();
        assert_eq!(output, "ran");
        assert_eq!(limiter.granted(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_over_time() {
        let limiter = limiter(1, 2.0);
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();

        assert!(waited >= Duration::from_millis(500), "waited {waited:?}");
        assert!(waited < Duration::from_millis(600), "waited {waited:?}");
        assert_eq!(limiter.throttled(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_next_refill() {
        let limiter = limiter(2, 1.0);
        let full = limiter.status();
        assert_eq!(full.available_tokens, 2);
        assert_eq!(full.capacity, 2);

        limiter.acquire().await;
        limiter.acquire().await;
        let drained = limiter.status();
        assert_eq!(drained.available_tokens, 0);
        assert!(drained.next_refill_at.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.status().available_tokens, 1);
    }

    #[tokio::test]
    async fn test_status_without_refill() {
        let limiter = limiter(1, 0.0);
        limiter.acquire().await;
        let status = limiter.status();
        assert_eq!(status.available_tokens, 0);
        assert!(status.next_refill_at.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_overdraws() {
        let limiter = limiter(10, 0.0);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(limiter.status().available_tokens, 0);
        assert_eq!(limiter.granted(), 10);
    }
}
