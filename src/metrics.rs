//! Metrics: lock-free counters, derived gauges, health scoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use time::OffsetDateTime;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

/// The mutex-guarded, non-scalar half of the metrics state: the last pool
/// exhaustion timestamp and the latency EMA.
#[derive(Debug, Default)]
struct ScalarState {
    last_exhaustion: Option<OffsetDateTime>,
    latency_ema_ms: f64,
}

/// Lock-free 64-bit counters plus the mutex-guarded scalar fields. A
/// snapshot composes atomic reads with exactly one scalar-lock acquisition.
#[derive(Debug)]
pub struct Metrics {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    pool_exhaustions: AtomicU64,
    tokens_created: AtomicU64,
    tokens_expired: AtomicU64,
    refresh_tokens_used: AtomicU64,
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    auth_attempts: AtomicU64,
    auth_failures: AtomicU64,
    queries_executed: AtomicU64,
    queries_succeeded: AtomicU64,
    queries_failed: AtomicU64,
    scalar: Mutex<ScalarState>,
    started_at: Instant,
}

const EMA_ALPHA: f64 = 0.1;

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_created: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            pool_exhaustions: AtomicU64::new(0),
            tokens_created: AtomicU64::new(0),
            tokens_expired: AtomicU64::new(0),
            refresh_tokens_used: AtomicU64::new(0),
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            auth_attempts: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            queries_executed: AtomicU64::new(0),
            queries_succeeded: AtomicU64::new(0),
            queries_failed: AtomicU64::new(0),
            scalar: Mutex::new(ScalarState::default()),
            started_at: Instant::now(),
        }
    }

    pub fn record_connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_exhaustion(&self) {
        self.pool_exhaustions.fetch_add(1, Ordering::Relaxed);
        self.scalar.lock().unwrap().last_exhaustion = Some(OffsetDateTime::now_utc());
    }

    pub fn record_token_created(&self) {
        self.tokens_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_token_expired(&self) {
        self.tokens_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_used(&self) {
        self.refresh_tokens_used.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self, failed: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_auth_attempt(&self, failed: bool) {
        self.auth_attempts.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.auth_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records one query's outcome and folds its latency into the EMA
    /// (`α = 0.1`).
    pub fn record_query(&self, succeeded: bool, latency_ms: f64) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            self.queries_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.queries_failed.fetch_add(1, Ordering::Relaxed);
        }
        let mut scalar = self.scalar.lock().unwrap();
        scalar.latency_ema_ms = if self.queries_executed.load(Ordering::Relaxed) == 1 {
            latency_ms
        } else {
            EMA_ALPHA * latency_ms + (1.0 - EMA_ALPHA) * scalar.latency_ema_ms
        };
    }

    pub fn pool_usage_percent(&self, pool_size: usize, effective_max: u32) -> f64 {
        if effective_max == 0 {
            return 0.0;
        }
        (pool_size as f64 / effective_max as f64) * 100.0
    }

    pub fn auth_failure_rate(&self) -> Option<f64> {
        let attempts = self.auth_attempts.load(Ordering::Relaxed);
        if attempts < 10 {
            return None;
        }
        let failures = self.auth_failures.load(Ordering::Relaxed);
        Some(failures as f64 / attempts as f64 * 100.0)
    }

    pub fn query_failure_rate(&self) -> Option<f64> {
        let executed = self.queries_executed.load(Ordering::Relaxed);
        if executed < 10 {
            return None;
        }
        let failed = self.queries_failed.load(Ordering::Relaxed);
        Some(failed as f64 / executed as f64 * 100.0)
    }

    pub fn latency_ema_ms(&self) -> f64 {
        self.scalar.lock().unwrap().latency_ema_ms
    }

    pub fn last_exhaustion(&self) -> Option<OffsetDateTime> {
        self.scalar.lock().unwrap().last_exhaustion
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(
        &self,
        pool_size: usize,
        effective_max: u32,
        internal_driver_connected: bool,
    ) -> MetricsSnapshot {
        let pool_usage_pct = self.pool_usage_percent(pool_size, effective_max);
        let health = self.health(pool_usage_pct, internal_driver_connected);
        MetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            pool_exhaustions: self.pool_exhaustions.load(Ordering::Relaxed),
            tokens_created: self.tokens_created.load(Ordering::Relaxed),
            tokens_expired: self.tokens_expired.load(Ordering::Relaxed),
            refresh_tokens_used: self.refresh_tokens_used.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            auth_attempts: self.auth_attempts.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            queries_succeeded: self.queries_succeeded.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            active_connections: pool_size,
            pool_usage_percent: pool_usage_pct,
            latency_ema_ms: self.latency_ema_ms(),
            uptime: self.uptime(),
            health,
        }
    }

    /// Health scoring, evaluated in the order given: `degraded`
    /// then `unhealthy` would both apply in principle, but unhealthy is the
    /// stricter signal and takes precedence when both fire.
    fn health(&self, pool_usage_pct: f64, internal_driver_connected: bool) -> Health {
        let query_failure_unhealthy = self
            .query_failure_rate()
            .map(|rate| rate > 10.0)
            .unwrap_or(false);
        if query_failure_unhealthy || !internal_driver_connected {
            return Health::Unhealthy;
        }
        let auth_failure_degraded = self
            .auth_failure_rate()
            .map(|rate| rate > 50.0)
            .unwrap_or(false);
        if pool_usage_pct >= 90.0 || auth_failure_degraded {
            return Health::Degraded;
        }
        Health::Healthy
    }
}

#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub pool_exhaustions: u64,
    pub tokens_created: u64,
    pub tokens_expired: u64,
    pub refresh_tokens_used: u64,
    pub requests_total: u64,
    pub requests_failed: u64,
    pub auth_attempts: u64,
    pub auth_failures: u64,
    pub queries_executed: u64,
    pub queries_succeeded: u64,
    pub queries_failed: u64,
    pub active_connections: usize,
    pub pool_usage_percent: f64,
    pub latency_ema_ms: f64,
    pub uptime: std::time::Duration,
    pub health: Health,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_is_healthy_with_no_activity() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(0, 25, true).health, Health::Healthy);
    }

    #[test]
    fn pool_usage_at_90_percent_degrades_health() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(9, 10, true).health, Health::Degraded);
    }

    #[test]
    fn disconnected_internal_driver_is_unhealthy_regardless_of_pool() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(0, 25, false).health, Health::Unhealthy);
    }

    #[test]
    fn auth_failure_rate_requires_at_least_ten_attempts() {
        let metrics = Metrics::new();
        for _ in 0..5 {
            metrics.record_auth_attempt(true);
        }
        assert_eq!(metrics.auth_failure_rate(), None);
        for _ in 0..5 {
            metrics.record_auth_attempt(true);
        }
        assert_eq!(metrics.auth_failure_rate(), Some(100.0));
    }

    #[test]
    fn query_failure_rate_above_10_percent_is_unhealthy() {
        let metrics = Metrics::new();
        for _ in 0..9 {
            metrics.record_query(true, 1.0);
        }
        metrics.record_query(false, 1.0);
        for _ in 0..9 {
            metrics.record_query(false, 1.0);
        }
        assert!(metrics.query_failure_rate().unwrap() > 10.0);
        assert_eq!(metrics.snapshot(0, 25, true).health, Health::Unhealthy);
    }

    #[test]
    fn latency_ema_converges_toward_recent_samples() {
        let metrics = Metrics::new();
        metrics.record_query(true, 100.0);
        assert_eq!(metrics.latency_ema_ms(), 100.0);
        metrics.record_query(true, 0.0);
        assert!((metrics.latency_ema_ms() - 90.0).abs() < 1e-9);
    }
}
