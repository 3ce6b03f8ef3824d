//! Alert engine: periodic rule evaluation with per-rule
//! cooldown and bounded history.

use std::collections::VecDeque;
use std::sync::Mutex;

use suresql_core::model::{Alert, AlertLevel, ALERT_HISTORY_CAPACITY};
use time::{Duration, OffsetDateTime};

use crate::metrics::Metrics;

pub const EVALUATION_PERIOD: std::time::Duration = std::time::Duration::from_secs(30);
const COOLDOWN: Duration = Duration::minutes(5);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
enum RuleBand {
    PoolUsageWarning,
    PoolUsageCritical,
    PoolExhaustionCritical,
    AuthFailureWarning,
    QueryFailureWarning,
    QueryFailureCritical,
}

#[derive(Default)]
struct CooldownState {
    last_fired: std::collections::HashMap<RuleBand, OffsetDateTime>,
}

impl CooldownState {
    fn ready(&self, band: RuleBand, now: OffsetDateTime) -> bool {
        self.last_fired
            .get(&band)
            .map(|last| now - *last >= COOLDOWN)
            .unwrap_or(true)
    }

    fn mark(&mut self, band: RuleBand, now: OffsetDateTime) {
        self.last_fired.insert(band, now);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Thresholds {
    pub pool_usage_warning: f64,
    pub pool_usage_critical: f64,
    pub auth_failure_warning: f64,
    pub query_failure_warning: f64,
    pub query_failure_critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            pool_usage_warning: 75.0,
            pool_usage_critical: 90.0,
            auth_failure_warning: 50.0,
            query_failure_warning: 10.0,
            query_failure_critical: 25.0,
        }
    }
}

/// Evaluates the four rules in order and appends any firing
/// alerts to a bounded 100-entry ring, each rule independently
/// cooldown-suppressed.
pub struct AlertEngine {
    history: Mutex<VecDeque<Alert>>,
    cooldowns: Mutex<CooldownState>,
    thresholds: Mutex<Thresholds>,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertEngine {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(ALERT_HISTORY_CAPACITY)),
            cooldowns: Mutex::new(CooldownState::default()),
            thresholds: Mutex::new(Thresholds::default()),
        }
    }

    pub fn set_thresholds(&self, thresholds: Thresholds) {
        *self.thresholds.lock().unwrap() = thresholds;
    }

    fn push(&self, alert: Alert) {
        let mut history = self.history.lock().unwrap();
        if history.len() == ALERT_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(alert);
    }

    /// Runs one evaluation pass against the given metrics and pool state.
    /// `now` is supplied by the caller so tests can control cooldown timing
    /// without sleeping.
    pub fn evaluate(
        &self,
        metrics: &Metrics,
        pool_size: usize,
        effective_max: u32,
        now: OffsetDateTime,
    ) {
        let thresholds = *self.thresholds.lock().unwrap();
        let mut cooldowns = self.cooldowns.lock().unwrap();

        let pool_usage = metrics.pool_usage_percent(pool_size, effective_max);
        if pool_usage >= thresholds.pool_usage_critical
            && cooldowns.ready(RuleBand::PoolUsageCritical, now)
        {
            self.push(Alert {
                level: AlertLevel::Critical,
                title: "pool usage critical".to_string(),
                message: format!("pool usage at {pool_usage:.1}%"),
                timestamp: now,
                metadata: Default::default(),
            });
            cooldowns.mark(RuleBand::PoolUsageCritical, now);
        } else if pool_usage >= thresholds.pool_usage_warning
            && cooldowns.ready(RuleBand::PoolUsageWarning, now)
        {
            self.push(Alert {
                level: AlertLevel::Warning,
                title: "pool usage elevated".to_string(),
                message: format!("pool usage at {pool_usage:.1}%"),
                timestamp: now,
                metadata: Default::default(),
            });
            cooldowns.mark(RuleBand::PoolUsageWarning, now);
        }

        let exhaustions = metrics.last_exhaustion();
        if let Some(last) = exhaustions {
            if now - last <= Duration::minutes(5)
                && cooldowns.ready(RuleBand::PoolExhaustionCritical, now)
            {
                self.push(Alert {
                    level: AlertLevel::Critical,
                    title: "recent pool exhaustion".to_string(),
                    message: "at least one session was refused a connection in the last 5 minutes"
                        .to_string(),
                    timestamp: now,
                    metadata: Default::default(),
                });
                cooldowns.mark(RuleBand::PoolExhaustionCritical, now);
            }
        }

        if let Some(rate) = metrics.auth_failure_rate() {
            if rate > thresholds.auth_failure_warning
                && cooldowns.ready(RuleBand::AuthFailureWarning, now)
            {
                self.push(Alert {
                    level: AlertLevel::Warning,
                    title: "elevated authentication failure rate".to_string(),
                    message: format!("auth failure rate at {rate:.1}%"),
                    timestamp: now,
                    metadata: Default::default(),
                });
                cooldowns.mark(RuleBand::AuthFailureWarning, now);
            }
        }

        if let Some(rate) = metrics.query_failure_rate() {
            if rate > thresholds.query_failure_critical
                && cooldowns.ready(RuleBand::QueryFailureCritical, now)
            {
                self.push(Alert {
                    level: AlertLevel::Critical,
                    title: "query failure rate critical".to_string(),
                    message: format!("query failure rate at {rate:.1}%"),
                    timestamp: now,
                    metadata: Default::default(),
                });
                cooldowns.mark(RuleBand::QueryFailureCritical, now);
            } else if rate > thresholds.query_failure_warning
                && cooldowns.ready(RuleBand::QueryFailureWarning, now)
            {
                self.push(Alert {
                    level: AlertLevel::Warning,
                    title: "query failure rate elevated".to_string(),
                    message: format!("query failure rate at {rate:.1}%"),
                    timestamp: now,
                    metadata: Default::default(),
                });
                cooldowns.mark(RuleBand::QueryFailureWarning, now);
            }
        }
    }

    pub fn recent(&self, n: usize) -> Vec<Alert> {
        let history = self.history.lock().unwrap();
        history.iter().rev().take(n).cloned().collect()
    }

    pub fn by_level(&self, level: AlertLevel) -> Vec<Alert> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.level == level)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> (usize, usize, usize) {
        let history = self.history.lock().unwrap();
        let info = history.iter().filter(|a| a.level == AlertLevel::Info).count();
        let warning = history
            .iter()
            .filter(|a| a.level == AlertLevel::Warning)
            .count();
        let critical = history
            .iter()
            .filter(|a| a.level == AlertLevel::Critical)
            .count();
        (info, warning, critical)
    }

    pub fn clear(&self) {
        self.history.lock().unwrap().clear();
    }
}

/// Runs `engine.evaluate(...)` on every tick until the returned `JoinHandle`
/// is aborted, mirroring the cleanup supervisor's loop shape.
pub fn spawn_alert_loop(
    engine: std::sync::Arc<AlertEngine>,
    metrics: std::sync::Arc<Metrics>,
    pool: std::sync::Arc<crate::pool::ConnectionPool>,
    effective_max: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVALUATION_PERIOD);
        loop {
            interval.tick().await;
            let pool_size = pool.size().await;
            engine.evaluate(&metrics, pool_size, effective_max, OffsetDateTime::now_utc());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_usage_critical_fires_above_90_percent() {
        let engine = AlertEngine::new();
        let metrics = Metrics::new();
        let now = OffsetDateTime::now_utc();
        engine.evaluate(&metrics, 10, 10, now);
        let recent = engine.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].level, AlertLevel::Critical);
    }

    #[test]
    fn same_rule_does_not_refire_within_cooldown() {
        let engine = AlertEngine::new();
        let metrics = Metrics::new();
        let now = OffsetDateTime::now_utc();
        engine.evaluate(&metrics, 10, 10, now);
        engine.evaluate(&metrics, 10, 10, now + Duration::minutes(1));
        assert_eq!(engine.recent(10).len(), 1);
    }

    #[test]
    fn rule_refires_after_cooldown_elapses() {
        let engine = AlertEngine::new();
        let metrics = Metrics::new();
        let now = OffsetDateTime::now_utc();
        engine.evaluate(&metrics, 10, 10, now);
        engine.evaluate(&metrics, 10, 10, now + Duration::minutes(6));
        assert_eq!(engine.recent(10).len(), 2);
    }

    #[test]
    fn history_ring_is_bounded_to_100() {
        let engine = AlertEngine::new();
        let metrics = Metrics::new();
        let base = OffsetDateTime::now_utc();
        for i in 0..150 {
            engine.evaluate(&metrics, 10, 10, base + Duration::minutes(6 * i));
        }
        assert_eq!(engine.recent(1000).len(), ALERT_HISTORY_CAPACITY);
    }
}
