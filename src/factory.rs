//! Driver factory: selects and constructs a driver instance
//! from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use suresql_core::model::ConfigRow;
use suresql_core::{DriverError, SqlDriver};

#[cfg(feature = "rqlite-driver")]
use suresql_rqlite_driver::{Consistency, RqliteConfig, RqliteDriver};

#[cfg(feature = "postgres-driver")]
use suresql_postgres_driver::{PostgresConfig, PostgresDriver};

/// `open(config) → driver | error`. Normalises the DBMS kind
/// (case-insensitive, trimmed; blank defaults to the replicated embedded
/// store) and fails for unrecognised kinds with a message naming the
/// supported set.
pub async fn open_driver(
    config: &ConfigRow,
    env: &HashMap<String, String>,
) -> Result<Arc<dyn SqlDriver>, DriverError> {
    let kind = config.dbms_kind.trim().to_ascii_lowercase();
    match kind.as_str() {
        "" | "rqlite" => open_rqlite(config, env).await,
        "postgresql" | "postgres" => open_postgres(config, env).await,
        other => Err(DriverError::Other(format!(
            "unsupported dbms kind {other:?}; supported kinds are: rqlite (default), postgresql/postgres"
        ))),
    }
}

#[cfg(feature = "rqlite-driver")]
async fn open_rqlite(
    config: &ConfigRow,
    env: &HashMap<String, String>,
) -> Result<Arc<dyn SqlDriver>, DriverError> {
    let scheme = if config.ssl { "https" } else { "http" };
    let basic_auth = match (env.get("DBMS_USER"), env.get("DBMS_PASSWORD")) {
        (Some(user), Some(pass)) if !user.is_empty() => Some((user.clone(), pass.clone())),
        _ => None,
    };
    let driver_config = RqliteConfig {
        scheme,
        host: config.host.clone(),
        port: if config.port > 0 { Some(config.port) } else { None },
        basic_auth,
        consistency: Consistency::Weak,
        extra_options: vec![],
        http_timeout: Duration::from_secs(config.envelope.http_timeout_secs.max(1)),
    };
    let driver = RqliteDriver::new(driver_config)?;
    Ok(Arc::new(driver))
}

#[cfg(not(feature = "rqlite-driver"))]
async fn open_rqlite(
    _config: &ConfigRow,
    _env: &HashMap<String, String>,
) -> Result<Arc<dyn SqlDriver>, DriverError> {
    Err(DriverError::Other(
        "the rqlite-driver feature is not enabled in this build".to_string(),
    ))
}

#[cfg(feature = "postgres-driver")]
async fn open_postgres(
    config: &ConfigRow,
    env: &HashMap<String, String>,
) -> Result<Arc<dyn SqlDriver>, DriverError> {
    let port = if config.port > 0 { config.port } else { 5432 };
    let driver_config = PostgresConfig {
        host: config.host.clone(),
        port,
        database: env.get("DBMS_DATABASE").cloned().unwrap_or_default(),
        user: env.get("DBMS_USER").cloned().unwrap_or_default(),
        password: env.get("DBMS_PASSWORD").cloned().unwrap_or_default(),
        ssl: config.ssl,
        max_connections: 10,
        connect_timeout: Duration::from_secs(config.envelope.http_timeout_secs.max(1)),
    };
    let driver = PostgresDriver::connect(&driver_config).await?;
    Ok(Arc::new(driver))
}

#[cfg(not(feature = "postgres-driver"))]
async fn open_postgres(
    _config: &ConfigRow,
    _env: &HashMap<String, String>,
) -> Result<Arc<dyn SqlDriver>, DriverError> {
    Err(DriverError::Other(
        "the postgres-driver feature is not enabled in this build".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_kind_lists_supported_kinds_in_error() {
        let config = ConfigRow {
            dbms_kind: "oracle".to_string(),
            ..Default::default()
        };
        let err = open_driver(&config, &HashMap::new()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("rqlite"));
        assert!(message.contains("postgresql"));
    }

    #[cfg(feature = "rqlite-driver")]
    #[tokio::test]
    async fn blank_kind_defaults_to_rqlite() {
        let config = ConfigRow {
            dbms_kind: "".to_string(),
            host: "localhost".to_string(),
            port: 4001,
            ..Default::default()
        };
        let driver = open_driver(&config, &HashMap::new()).await.unwrap();
        assert_eq!(driver.driver_id(), "rqlite");
    }
}
