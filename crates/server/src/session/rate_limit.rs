// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sliding-window rate limiting: a distributed variant backed by sorted
//! sets, and a local in-memory fallback for single-instance deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::error::ChatError;
use crate::session::now_micros;

/// Outcome of a single `Allow` decision.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Seconds until the window resets, always >= 1 when denied.
    pub reset_after_secs: u64,
}

/// A keyed sliding-window rate limiter.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(&self, key: &str) -> RateLimitDecision;
    async fn remaining(&self, key: &str) -> u32;
}

/// Distributed sliding-window limiter: sorted set per key, score =
/// microsecond timestamp. Isolated under the `gomind:ratelimit:` prefix
/// (logical database index 1 in deployments that support multiple DBs).
///
/// Fails open on backing-store errors: an unreachable store yields
/// `allowed=true, remaining=max`. This is a deliberate
/// availability-over-enforcement trade-off; callers requiring strict
/// enforcement should wrap this limiter and fail closed instead.
pub struct SlidingWindowRateLimiter {
    conn: redis::aio::ConnectionManager,
    max: u32,
    window_secs: i64,
}

impl SlidingWindowRateLimiter {
    pub fn new(conn: redis::aio::ConnectionManager, max: u32, window_secs: i64) -> Self {
        Self { conn, max, window_secs }
    }

    fn bucket_key(&self, key: &str) -> String {
        let date = chrono_date_stamp();
        format!("gomind:ratelimit:{key}:{date}")
    }

    async fn allow_inner(&self, key: &str) -> Result<RateLimitDecision, ChatError> {
        let mut conn = self.conn.clone();
        let bucket = self.bucket_key(key);
        let window_micros = self.window_secs * 1_000_000;
        let now = now_micros();
        let floor = now - window_micros;

        let _: i64 = conn
            .zrembyscore(&bucket, i64::MIN, floor)
            .await
            .map_err(|e| ChatError::internal("check_rate_limit", e.to_string()))?;

        let count: i64 = conn
            .zcard(&bucket)
            .await
            .map_err(|e| ChatError::internal("check_rate_limit", e.to_string()))?;

        if count as u32 >= self.max {
            // retry-after is the time until the oldest member in the window expires.
            let oldest: Vec<(String, i64)> = conn
                .zrangebyscore_withscores(&bucket, floor, now)
                .await
                .map_err(|e| ChatError::internal("check_rate_limit", e.to_string()))?;
            let reset_after_secs = oldest
                .first()
                .map(|(_, score)| {
                    let elapsed_micros = now - score;
                    let remaining_micros = (window_micros - elapsed_micros).max(1_000_000);
                    (remaining_micros / 1_000_000).max(1) as u64
                })
                .unwrap_or(self.window_secs.max(1) as u64);
            return Ok(RateLimitDecision { allowed: false, remaining: 0, reset_after_secs });
        }

        let member = format!("{now}{}", rand::random::<u32>());
        let _: i64 = conn
            .zadd(&bucket, member, now)
            .await
            .map_err(|e| ChatError::internal("check_rate_limit", e.to_string()))?;
        let _: bool = conn
            .expire(&bucket, self.window_secs * 2)
            .await
            .map_err(|e| ChatError::internal("check_rate_limit", e.to_string()))?;

        Ok(RateLimitDecision {
            allowed: true,
            remaining: self.max.saturating_sub(count as u32 + 1),
            reset_after_secs: self.window_secs.max(1) as u64,
        })
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn allow(&self, key: &str) -> RateLimitDecision {
        match self.allow_inner(key).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(err = %e, "rate limiter backing store error, failing open");
                RateLimitDecision { allowed: true, remaining: self.max, reset_after_secs: 0 }
            }
        }
    }

    async fn remaining(&self, key: &str) -> u32 {
        let mut conn = self.conn.clone();
        let bucket = self.bucket_key(key);
        let window_micros = self.window_secs * 1_000_000;
        let floor = now_micros() - window_micros;
        let _: redis::RedisResult<i64> = conn.zrembyscore(&bucket, i64::MIN, floor).await;
        match conn.zcard::<_, i64>(&bucket).await {
            Ok(count) => self.max.saturating_sub(count as u32),
            Err(_) => self.max,
        }
    }
}

fn chrono_date_stamp() -> String {
    let secs = now_micros() / 1_000_000;
    let days = secs / 86_400;
    // Days since epoch -> proleptic Gregorian calendar date, avoiding a chrono
    // dependency for a single formatting call.
    civil_from_days(days)
}

fn civil_from_days(z: i64) -> String {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    format!("{y:04}-{m:02}-{d:02}")
}

/// Fixed-window per-key bucket for the local (single-instance) limiter.
struct LocalBucket {
    count: AtomicU32,
    reset_at_ms: Mutex<i64>,
}

/// In-memory fallback limiter used when no shared backing store is
/// configured. Bucket insertion is the only map mutation on the hot path;
/// per-bucket state uses an atomic counter plus a small mutex around the
/// reset timestamp.
pub struct LocalRateLimiter {
    buckets: RwLock<HashMap<String, Arc<LocalBucket>>>,
    max: u32,
    window_ms: i64,
}

impl LocalRateLimiter {
    pub fn new(max: u32, window_secs: i64) -> Arc<Self> {
        let limiter = Arc::new(Self {
            buckets: RwLock::new(HashMap::new()),
            max,
            window_ms: window_secs * 1000,
        });
        limiter.clone().spawn_cleanup();
        limiter
    }

    async fn bucket(&self, key: &str) -> Arc<LocalBucket> {
        {
            let buckets = self.buckets.read().await;
            if let Some(b) = buckets.get(key) {
                return Arc::clone(b);
            }
        }
        let mut buckets = self.buckets.write().await;
        if let Some(b) = buckets.get(key) {
            return Arc::clone(b);
        }
        let bucket = Arc::new(LocalBucket {
            count: AtomicU32::new(0),
            reset_at_ms: Mutex::new(crate::session::now_ms() + self.window_ms),
        });
        buckets.insert(key.to_owned(), Arc::clone(&bucket));
        bucket
    }

    /// Every 5 minutes, drop buckets whose reset time is more than one
    /// additional window in the past.
    fn spawn_cleanup(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                let now = crate::session::now_ms();
                let mut buckets = self.buckets.write().await;
                buckets.retain(|_, b| {
                    let reset_at = *b.reset_at_ms.lock().unwrap_or_else(|e| e.into_inner());
                    now - reset_at < self.window_ms
                });
            }
        });
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn allow(&self, key: &str) -> RateLimitDecision {
        let bucket = self.bucket(key).await;
        let now = crate::session::now_ms();
        let mut reset_at = bucket.reset_at_ms.lock().unwrap_or_else(|e| e.into_inner());
        if now >= *reset_at {
            *reset_at = now + self.window_ms;
            bucket.count.store(0, Ordering::SeqCst);
        }
        let reset_after_secs = ((*reset_at - now).max(0) / 1000) as u64;
        drop(reset_at);

        let count = bucket.count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.max {
            bucket.count.fetch_sub(1, Ordering::SeqCst);
            RateLimitDecision { allowed: false, remaining: 0, reset_after_secs: reset_after_secs.max(1) }
        } else {
            RateLimitDecision {
                allowed: true,
                remaining: self.max.saturating_sub(count),
                reset_after_secs,
            }
        }
    }

    async fn remaining(&self, key: &str) -> u32 {
        let bucket = self.bucket(key).await;
        self.max.saturating_sub(bucket.count.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_limiter_enforces_max_within_window() {
        let limiter = LocalRateLimiter::new(5, 60);
        for _ in 0..5 {
            assert!(limiter.allow("client-a").await.allowed);
        }
        let sixth = limiter.allow("client-a").await;
        assert!(!sixth.allowed);
        assert!(sixth.reset_after_secs >= 1);
    }

    #[tokio::test]
    async fn local_limiter_isolates_keys() {
        let limiter = LocalRateLimiter::new(1, 60);
        assert!(limiter.allow("a").await.allowed);
        assert!(limiter.allow("b").await.allowed);
        assert!(!limiter.allow("a").await.allowed);
    }

    #[test]
    fn date_stamp_formats_as_iso_date() {
        // 2024-01-01T00:00:00Z is 19723 days after epoch.
        let stamp = civil_from_days(19723);
        assert_eq!(stamp, "2024-01-01");
    }
}
