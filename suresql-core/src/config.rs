//! Layered configuration resolution: defaults, then the
//! persisted config row, then matching settings rows, then environment
//! overrides.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use time::Duration;
use tokio::sync::RwLock;

use crate::model::{ConfigRow, PeerNode, SettingRow};

/// Built-in defaults.
pub struct Defaults;

impl Defaults {
    pub const TOKEN_TTL: Duration = Duration::hours(24);
    pub const REFRESH_TTL: Duration = Duration::hours(48);
    pub const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(5 * 60);
    pub const MAX_POOL: u32 = 25;
    pub const POOL_ENABLED: bool = true;
    pub const RETRY_COUNT: u32 = 3;
    pub const HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(60);
}

/// Everything the rest of the node needs after resolution.
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    pub token_ttl: Duration,
    pub refresh_ttl: Duration,
    pub sweep_interval: StdDuration,
    pub max_pool: u32,
    pub pool_enabled: bool,
    pub retry_count: u32,
    pub http_timeout: StdDuration,
    pub peers: Vec<PeerNode>,
    pub config_row: ConfigRow,
}

impl ResolvedConfig {
    /// `configured-max * peer-count` when peers are known,
    /// otherwise just `configured-max`.
    pub fn effective_max_pool(&self) -> u32 {
        if self.peers.is_empty() {
            self.max_pool
        } else {
            self.max_pool.saturating_mul(self.peers.len() as u32)
        }
    }

    pub fn pool_effectively_enabled(&self) -> bool {
        self.pool_enabled && self.effective_max_pool() > 0
    }
}

/// Abstracts the process environment so the resolver is testable without
/// mutating real process state.
pub trait EnvSource: Send + Sync {
    /// A snapshot of every variable visible to this source.
    fn snapshot(&self) -> HashMap<String, String>;
}

#[derive(Default)]
pub struct SystemEnv;

impl EnvSource for SystemEnv {
    fn snapshot(&self) -> HashMap<String, String> {
        std::env::vars().collect()
    }
}

/// An in-memory [`EnvSource`] for tests.
#[derive(Default, Clone)]
pub struct MapEnv(pub HashMap<String, String>);

impl EnvSource for MapEnv {
    fn snapshot(&self) -> HashMap<String, String> {
        self.0.clone()
    }
}

/// Parses a duration with an optional unit suffix: `ns`, `us`/`µs`, `ms`,
/// `s`, `m`, `h`, `d`. An unsuffixed integer is treated as seconds.
pub fn parse_duration_env(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let suffixes: &[(&str, i64)] = &[
        ("ns", 1),
        ("us", 1_000),
        ("\u{b5}s", 1_000), // µs
        ("ms", 1_000_000),
        ("s", 1_000_000_000),
        ("m", 60_000_000_000),
        ("h", 3_600_000_000_000),
        ("d", 86_400_000_000_000),
    ];

    for (suffix, ns_per_unit) in suffixes {
        if let Some(digits) = raw.strip_suffix(suffix) {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '+') {
                let count: i64 = digits.parse().ok()?;
                return Some(Duration::nanoseconds(count.saturating_mul(*ns_per_unit)));
            }
        }
    }

    raw.parse::<i64>().ok().map(Duration::seconds)
}

fn parse_bool_env(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Resolves configuration by layering defaults, the persisted config row,
/// the settings table, and environment overrides, in that priority order.
pub struct ConfigResolver<E: EnvSource = SystemEnv> {
    env: E,
    cached_env: RwLock<Option<HashMap<String, String>>>,
}

impl ConfigResolver<SystemEnv> {
    pub fn system() -> Self {
        Self::new(SystemEnv)
    }
}

impl<E: EnvSource> ConfigResolver<E> {
    pub fn new(env: E) -> Self {
        Self {
            env,
            cached_env: RwLock::new(None),
        }
    }

    /// Re-reads the environment layer, discarding any cached snapshot.
    pub async fn reload_env(&self) {
        let snapshot = self.env.snapshot();
        *self.cached_env.write().await = Some(snapshot);
    }

    async fn env_snapshot(&self) -> HashMap<String, String> {
        {
            let guard = self.cached_env.read().await;
            if let Some(snapshot) = guard.as_ref() {
                return snapshot.clone();
            }
        }
        let snapshot = self.env.snapshot();
        *self.cached_env.write().await = Some(snapshot.clone());
        snapshot
    }

    fn env_str<'a>(env: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
        env.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub async fn resolve(
        &self,
        config_row: Option<ConfigRow>,
        settings: &[SettingRow],
    ) -> ResolvedConfig {
        // Layer 1: built-in defaults.
        let mut token_ttl = Defaults::TOKEN_TTL;
        let mut refresh_ttl = Defaults::REFRESH_TTL;
        let mut sweep_interval = Defaults::SWEEP_INTERVAL;
        let mut max_pool = Defaults::MAX_POOL;
        let mut pool_enabled = Defaults::POOL_ENABLED;
        let mut retry_count = Defaults::RETRY_COUNT;
        let mut http_timeout = Defaults::HTTP_TIMEOUT;

        // Layer 2: the persisted config row.
        let config_row = config_row.unwrap_or_default();
        if config_row.token_expiry_minutes > 0 {
            token_ttl = Duration::minutes(config_row.token_expiry_minutes);
        }
        if config_row.refresh_expiry_minutes > 0 {
            refresh_ttl = Duration::minutes(config_row.refresh_expiry_minutes);
        }
        if config_row.sweep_interval_secs > 0 {
            sweep_interval = StdDuration::from_secs(config_row.sweep_interval_secs);
        }
        if config_row.envelope.retry_count > 0 {
            retry_count = config_row.envelope.retry_count;
        }
        if config_row.envelope.http_timeout_secs > 0 {
            http_timeout = StdDuration::from_secs(config_row.envelope.http_timeout_secs);
        }

        // Layer 3: settings rows, keyed by (category, key).
        let mut peers = Vec::new();
        for row in settings {
            match (row.category.as_str(), row.key.as_str()) {
                ("token", "token_exp") => {
                    if let Some(minutes) = row.int_value {
                        token_ttl = Duration::minutes(minutes);
                    }
                }
                ("token", "refresh_exp") => {
                    if let Some(minutes) = row.int_value {
                        refresh_ttl = Duration::minutes(minutes);
                    }
                }
                ("token", "token_ttl") => {
                    if let Some(minutes) = row.int_value {
                        sweep_interval = StdDuration::from_secs((minutes.max(0) as u64) * 60);
                    }
                }
                ("connection", "max_pool") => {
                    if let Some(value) = row.int_value {
                        if value == 0 && pool_enabled {
                            max_pool = Defaults::MAX_POOL;
                        } else if value > 0 {
                            max_pool = value as u32;
                        }
                    }
                }
                ("connection", "pool_on") => {
                    pool_enabled = row.bool_value();
                }
                ("nodes", key) if key.starts_with("node_name") => {
                    if let Some(raw) = &row.text_value {
                        if let Some(peer) = PeerNode::parse(raw) {
                            if peer.node_number != config_row.this_node_index {
                                peers.push(peer);
                            }
                        }
                    }
                }
                _ => {
                    // Unknown categories are filed under a sentinel bucket and ignored.
                }
            }
        }

        // Layer 4: environment overrides (cached; SURESQL_/DBMS_ prefixes).
        let env = self.env_snapshot().await;

        if let Some(v) = Self::env_str(&env, "SURESQL_TOKEN_EXPIRY").and_then(parse_duration_env) {
            token_ttl = v;
        }
        if let Some(v) = Self::env_str(&env, "SURESQL_REFRESH_EXPIRY").and_then(parse_duration_env)
        {
            refresh_ttl = v;
        }
        if let Some(v) =
            Self::env_str(&env, "SURESQL_SWEEP_INTERVAL").and_then(parse_duration_env)
        {
            sweep_interval = StdDuration::from_secs(v.whole_seconds().max(0) as u64);
        }
        if let Some(v) = Self::env_str(&env, "SURESQL_MAX_POOL").and_then(|s| s.parse::<u32>().ok())
        {
            max_pool = v;
        }
        if let Some(v) = Self::env_str(&env, "SURESQL_POOL_ON").and_then(parse_bool_env) {
            pool_enabled = v;
        }
        if let Some(v) =
            Self::env_str(&env, "SURESQL_RETRY_COUNT").and_then(|s| s.parse::<u32>().ok())
        {
            retry_count = v;
        }
        if let Some(v) = Self::env_str(&env, "SURESQL_HTTP_TIMEOUT").and_then(parse_duration_env) {
            http_timeout = StdDuration::from_secs(v.whole_seconds().max(0) as u64);
        }
        // DBMS_* overrides are consumed by the driver factory directly from
        // the cached snapshot; they do not affect gateway-facing fields here.

        ResolvedConfig {
            token_ttl,
            refresh_ttl,
            sweep_interval,
            max_pool,
            pool_enabled,
            retry_count,
            http_timeout,
            peers,
            config_row,
        }
    }

    /// Exposes the cached environment snapshot for callers (e.g. the driver
    /// factory) that need `DBMS_*` values.
    pub async fn env(&self) -> HashMap<String, String> {
        self.env_snapshot().await
    }
}
