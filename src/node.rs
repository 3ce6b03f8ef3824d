//! Node state: a process-wide singleton holding configuration,
//! the driver factory handle, the token store, the pool, metrics, and the
//! alert engine, all behind one reader/writer lock on the mutable parts.

use std::collections::HashMap;
use std::sync::Arc;

use suresql_core::config::{ConfigResolver, ResolvedConfig, SystemEnv};
use suresql_core::model::{ConfigRow, SettingRow};
use suresql_core::{DriverError, SqlDriver, SureSqlError};
use tokio::sync::RwLock;

use crate::alert::AlertEngine;
use crate::factory;
use crate::metrics::Metrics;
use crate::pool::ConnectionPool;
use crate::token_store::TokenStore;

/// Everything that can change under an administrative reload, grouped so a
/// single write-lock acquisition covers a whole update.
pub struct MutableState {
    pub resolved: ResolvedConfig,
    pub pool: Arc<ConnectionPool>,
}

/// Where a freshly-opened per-session driver comes from. Production nodes
/// always go through the driver factory; the `test-util` feature substitutes
/// a fixed driver so the session/dispatch flow can be exercised without a
/// live engine.
enum SessionDriverSource {
    Factory,
    #[cfg(feature = "test-util")]
    Fixed(Arc<dyn SqlDriver>),
}

/// The process-wide singleton. Immutable collaborators
/// (metrics, alert engine, token store, resolver) are cheap to share via
/// `Arc` and need no lock of their own; `mutable` groups the fields that an
/// administrative reload replaces together.
pub struct NodeState {
    api_key: String,
    client_id: String,
    resolver: ConfigResolver<SystemEnv>,
    session_driver: SessionDriverSource,
    pub token_store: Arc<TokenStore>,
    pub metrics: Arc<Metrics>,
    pub alert_engine: Arc<AlertEngine>,
    mutable: RwLock<MutableState>,
}

impl NodeState {
    /// Builds the node from a config row and settings rows, opening the
    /// internal driver and constructing the pool per the resolved capacity.
    pub async fn bootstrap(
        config_row: ConfigRow,
        settings: &[SettingRow],
    ) -> Result<Self, SureSqlError> {
        let resolver = ConfigResolver::system();
        let resolved = resolver.resolve(Some(config_row.clone()), settings).await;
        let env = resolver.env().await;

        let internal_driver = open_internal_driver(&config_row, &env).await?;
        let pool = Arc::new(ConnectionPool::new(
            resolved.effective_max_pool(),
            resolved.pool_effectively_enabled(),
            internal_driver,
        ));
        let token_store = Arc::new(TokenStore::new(resolved.token_ttl, resolved.refresh_ttl));

        Ok(Self {
            api_key: config_row.envelope.api_key.clone(),
            client_id: config_row.envelope.client_id.clone(),
            resolver,
            session_driver: SessionDriverSource::Factory,
            token_store,
            metrics: Arc::new(Metrics::new()),
            alert_engine: Arc::new(AlertEngine::new()),
            mutable: RwLock::new(MutableState { resolved, pool }),
        })
    }

    /// Builds a node around a fixed driver, bypassing the factory entirely.
    /// Used by integration tests that need a full node without a live
    /// backing engine.
    #[cfg(feature = "test-util")]
    pub fn for_tests(resolved: ResolvedConfig, driver: Arc<dyn SqlDriver>) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            resolved.effective_max_pool(),
            resolved.pool_effectively_enabled(),
            driver.clone(),
        ));
        Self {
            api_key: "test-api-key".to_string(),
            client_id: "test-client-id".to_string(),
            resolver: ConfigResolver::system(),
            session_driver: SessionDriverSource::Fixed(driver),
            token_store: Arc::new(TokenStore::new(resolved.token_ttl, resolved.refresh_ttl)),
            metrics: Arc::new(Metrics::new()),
            alert_engine: Arc::new(AlertEngine::new()),
            mutable: RwLock::new(MutableState { resolved, pool }),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn config(&self) -> ResolvedConfig {
        self.mutable.read().await.resolved.clone()
    }

    pub async fn pool(&self) -> Arc<ConnectionPool> {
        self.mutable.read().await.pool.clone()
    }

    pub async fn internal_driver(&self) -> Arc<dyn SqlDriver> {
        self.mutable.read().await.pool.internal_driver()
    }

    /// Opens a fresh per-session driver using the current configuration.
    pub async fn open_session_driver(&self) -> Result<Arc<dyn SqlDriver>, DriverError> {
        match &self.session_driver {
            SessionDriverSource::Factory => {
                let env = self.resolver.env().await;
                let config_row = self.mutable.read().await.resolved.config_row.clone();
                factory::open_driver(&config_row, &env).await
            }
            #[cfg(feature = "test-util")]
            SessionDriverSource::Fixed(driver) => Ok(driver.clone()),
        }
    }

    /// Applies an administrative reload: re-resolves configuration and, if
    /// capacity or enablement changed, swaps in a freshly-sized pool. The
    /// previous pool's entries are drained and closed so no session driver
    /// is silently abandoned.
    pub async fn reload(
        &self,
        config_row: ConfigRow,
        settings: &[SettingRow],
    ) -> Result<(), SureSqlError> {
        self.resolver.reload_env().await;
        let resolved = self.resolver.resolve(Some(config_row), settings).await;
        let mut guard = self.mutable.write().await;
        let internal_driver = guard.pool.internal_driver();
        let old_pool = std::mem::replace(
            &mut guard.pool,
            Arc::new(ConnectionPool::new(
                resolved.effective_max_pool(),
                resolved.pool_effectively_enabled(),
                internal_driver,
            )),
        );
        guard.resolved = resolved;
        drop(guard);
        old_pool.close_all().await;
        Ok(())
    }

    /// Closes every pool entry and the internal driver. Part of the
    /// shutdown sequence.
    pub async fn shutdown(&self) {
        let guard = self.mutable.read().await;
        guard.pool.close_all().await;
        guard.pool.internal_driver().close().await;
    }
}

async fn open_internal_driver(
    config_row: &ConfigRow,
    env: &HashMap<String, String>,
) -> Result<Arc<dyn SqlDriver>, SureSqlError> {
    factory::open_driver(config_row, env)
        .await
        .map_err(|e| SureSqlError::from_driver("OpenInternalDriver", e))
}
