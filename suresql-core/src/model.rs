//! Persisted and in-memory data model.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// `r`, `w`, or `rw`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    R,
    W,
    Rw,
}

/// The envelope nested inside the config row: secrets and transport tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigEnvelope {
    pub token: String,
    pub refresh_token: String,
    pub jwe_key: String,
    pub jwt_key: String,
    pub api_key: String,
    pub client_id: String,
    pub http_timeout_secs: u64,
    pub retry_timeout_secs: u64,
    pub retry_count: u32,
}

impl Default for ConfigEnvelope {
    fn default() -> Self {
        Self {
            token: String::new(),
            refresh_token: String::new(),
            jwe_key: String::new(),
            jwt_key: String::new(),
            api_key: String::new(),
            client_id: String::new(),
            http_timeout_secs: 60,
            retry_timeout_secs: 5,
            retry_count: 3,
        }
    }
}

/// Exactly one persisted config row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigRow {
    pub label: String,
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub dbms_kind: String,
    pub mode: NodeMode,
    pub total_nodes: u32,
    pub this_node_index: u32,
    pub init_done: bool,
    pub split_write: bool,
    pub encryption_method: String,
    pub token_expiry_minutes: i64,
    pub refresh_expiry_minutes: i64,
    pub sweep_interval_secs: u64,
    pub envelope: ConfigEnvelope,
}

impl Default for ConfigRow {
    fn default() -> Self {
        Self {
            label: String::new(),
            host: String::new(),
            port: 0,
            ssl: false,
            dbms_kind: String::new(),
            mode: NodeMode::Rw,
            total_nodes: 1,
            this_node_index: 1,
            init_done: false,
            split_write: false,
            encryption_method: String::new(),
            token_expiry_minutes: 24 * 60,
            refresh_expiry_minutes: 48 * 60,
            sweep_interval_secs: 5 * 60,
            envelope: ConfigEnvelope::default(),
        }
    }
}

impl ConfigRow {
    /// `this_node_index == 1`.
    pub fn is_leader(&self) -> bool {
        self.this_node_index == 1
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingDataType {
    Text,
    Int,
    Float,
    Bool,
}

/// A (category, key) row in the settings table. Unique per (category, key).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettingRow {
    pub category: String,
    pub key: String,
    pub data_type: SettingDataType,
    pub text_value: Option<String>,
    pub int_value: Option<i64>,
    pub float_value: Option<f64>,
}

impl SettingRow {
    pub fn bool_value(&self) -> bool {
        self.int_value.unwrap_or(0) == 1
    }
}

/// One peer parsed from a `nodes/*` setting row: `nodeNumber|url|ip|mode`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerNode {
    pub node_number: u32,
    pub url: String,
    pub ip: String,
    pub mode: String,
}

impl PeerNode {
    /// Parses `nodeNumber|url|ip|mode`. Malformed rows are simply not peers.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(4, '|');
        let node_number = parts.next()?.trim().parse::<u32>().ok()?;
        let url = parts.next()?.trim().to_string();
        let ip = parts.next()?.trim().to_string();
        let mode = parts.next()?.trim().to_string();
        Some(PeerNode {
            node_number,
            url,
            ip,
            mode,
        })
    }
}

/// (id, username, hashed password, role, created_at). The password hash is
/// the only credential the node stores.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A session's credential pair, with absolute expiries.
///
/// Invariant: `access_expires_at <= refresh_expires_at`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: i64,
    pub username: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// One entry in the alert history ring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

/// The bounded size of the alert history ring.
pub const ALERT_HISTORY_CAPACITY: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_node_parses_pipe_format() {
        let peer = PeerNode::parse("2|https://node2:4001|10.0.0.2|rw").unwrap();
        assert_eq!(peer.node_number, 2);
        assert_eq!(peer.url, "https://node2:4001");
        assert_eq!(peer.ip, "10.0.0.2");
        assert_eq!(peer.mode, "rw");
    }

    #[test]
    fn peer_node_rejects_malformed_rows() {
        assert!(PeerNode::parse("not-a-number|url|ip|mode").is_none());
        assert!(PeerNode::parse("1|onlytwo").is_none());
    }
}
