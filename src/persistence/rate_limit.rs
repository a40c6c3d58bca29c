//! Fixed-window rate limiters.
//!
//! [`RateLimiter::hit`] increments and compares in one operation so that
//! concurrent requests cannot both slip under the limit. Use
//! [`PostgresRateLimiter`] whenever more than one server instance runs;
//! [`InMemoryRateLimiter`] is only correct within a single process.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Mutex;

use super::store::StoreError;

/// Outcome of one counted hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the hit fits in the window.
    pub allowed: bool,
    /// Hits counted in the current window, including this one.
    pub count: u32,
    /// Seconds until the window resets.
    pub retry_after_secs: u64,
}

impl RateDecision {
    fn evaluate(count: u32, limit: u32, remaining: Duration) -> Self {
        let mut retry_after_secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            retry_after_secs = retry_after_secs.saturating_add(1);
        }
        Self {
            allowed: count <= limit,
            count,
            retry_after_secs: retry_after_secs.max(1),
        }
    }
}

/// Counts hits per key in fixed windows.
#[async_trait]
pub trait RateLimiter: Send + Sync + fmt::Debug {
    /// Records a hit on `key` and reports whether it is within `limit`
    /// hits per `window`.
    async fn hit(&self, key: &str, limit: u32, window: Duration)
    -> Result<RateDecision, StoreError>;

    /// Drops every window that has run out. Returns how many were removed.
    async fn prune(&self) -> Result<u64, StoreError>;
}

/// Tracked keys below which [`InMemoryRateLimiter::hit`] never prunes.
const PRUNE_FLOOR: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Slot {
    started: Instant,
    window: Duration,
    hits: u32,
}

impl Slot {
    fn is_over(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.window
    }
}

#[derive(Debug)]
struct Windows {
    slots: HashMap<String, Slot>,
    prune_at: usize,
    floor: usize,
}

impl Windows {
    fn with_floor(floor: usize) -> Self {
        Self {
            slots: HashMap::new(),
            prune_at: floor,
            floor,
        }
    }

    fn prune(&mut self, now: Instant) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_over(now));
        // Next opportunistic pass once the live set has doubled.
        self.prune_at = self.floor.max(self.slots.len().saturating_mul(2));
        before.saturating_sub(self.slots.len())
    }
}

/// Process-local limiter. Windows that ran out are dropped whenever the
/// number of tracked keys doubles, and on every [`RateLimiter::prune`].
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    windows: Mutex<Windows>,
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::with_prune_floor(PRUNE_FLOOR)
    }
}

impl InMemoryRateLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_prune_floor(floor: usize) -> Self {
        Self {
            windows: Mutex::new(Windows::with_floor(floor)),
        }
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.slots.len()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, StoreError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        if windows.slots.len() >= windows.prune_at {
            let dropped = windows.prune(now);
            tracing::debug!(dropped, "rate limit windows pruned");
        }
        let slot = windows.slots.entry(key.to_string()).or_insert(Slot {
            started: now,
            window,
            hits: 0,
        });
        if slot.is_over(now) {
            *slot = Slot {
                started: now,
                window,
                hits: 0,
            };
        }
        slot.hits = slot.hits.saturating_add(1);
        let remaining = slot.window.saturating_sub(now.duration_since(slot.started));
        Ok(RateDecision::evaluate(slot.hits, limit, remaining))
    }

    async fn prune(&self) -> Result<u64, StoreError> {
        let dropped = self.windows.lock().await.prune(Instant::now());
        Ok(u64::try_from(dropped).unwrap_or(u64::MAX))
    }
}

/// Limiter backed by the shared `rate_limit_counters` table.
#[derive(Debug, Clone)]
pub struct PostgresRateLimiter {
    pool: PgPool,
}

impl PostgresRateLimiter {
    /// Creates a limiter on the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimiter for PostgresRateLimiter {
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, StoreError> {
        let (hits, remaining_secs) = sqlx::query_as::<_, (i32, f64)>(
            "INSERT INTO rate_limit_counters (key, window_start, hits, expires_at) \
             VALUES ($1, now(), 1, now() + make_interval(secs => $2)) \
             ON CONFLICT (key) DO UPDATE SET \
               hits = CASE WHEN rate_limit_counters.expires_at <= now() \
                           THEN 1 ELSE rate_limit_counters.hits + 1 END, \
               window_start = CASE WHEN rate_limit_counters.expires_at <= now() \
                           THEN now() ELSE rate_limit_counters.window_start END, \
               expires_at = CASE WHEN rate_limit_counters.expires_at <= now() \
                           THEN now() + make_interval(secs => $2) \
                           ELSE rate_limit_counters.expires_at END \
             RETURNING hits, GREATEST(EXTRACT(EPOCH FROM (expires_at - now())), 0)::float8",
        )
        .bind(key)
        .bind(window.as_secs_f64())
        .fetch_one(&self.pool)
        .await?;

        let count = u32::try_from(hits).unwrap_or(u32::MAX);
        let remaining = Duration::try_from_secs_f64(remaining_secs).unwrap_or(Duration::ZERO);
        Ok(RateDecision::evaluate(count, limit, remaining))
    }

    async fn prune(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
