//! The connection pool: a bounded map from access-token to
//! leased driver instance, with admission, release, and forced close.

use std::collections::HashMap;
use std::sync::Arc;

use suresql_core::SqlDriver;
use tokio::sync::RwLock;

/// Bounded capability map. Admission (`put`) and the size check it requires
/// are combined under one write-lock acquisition so check-then-insert is
/// atomic: pool size never exceeds `max_size`, even under concurrent callers.
#[derive(Debug)]
pub struct ConnectionPool {
    entries: RwLock<HashMap<String, Arc<dyn SqlDriver>>>,
    max_size: u32,
    enabled: bool,
    internal_driver: Arc<dyn SqlDriver>,
}

impl ConnectionPool {
    pub fn new(max_size: u32, enabled: bool, internal_driver: Arc<dyn SqlDriver>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size,
            enabled,
            internal_driver,
        }
    }

    /// Admits `driver` under `access_token` iff the pool is enabled and
    /// current size < max. Returns `true` on admission, `false` on
    /// exhaustion (the caller is responsible for incrementing the
    /// pool-exhaustion counter and closing `driver`).
    pub async fn put(&self, access_token: String, driver: Arc<dyn SqlDriver>) -> bool {
        if !self.enabled {
            return false;
        }
        let mut guard = self.entries.write().await;
        if guard.len() as u32 >= self.max_size {
            return false;
        }
        guard.insert(access_token, driver);
        true
    }

    /// Returns the leased driver for `access_token`. When pooling is
    /// disabled this bypasses admission entirely and returns the
    /// process-wide internal driver.
    pub async fn get(&self, access_token: &str) -> Option<Arc<dyn SqlDriver>> {
        if !self.enabled {
            return Some(self.internal_driver.clone());
        }
        self.entries.read().await.get(access_token).cloned()
    }

    /// Best-effort disposal and removal. Idempotent: closing an absent or
    /// already-closed key is not an error.
    pub async fn close(&self, access_token: &str) -> bool {
        let removed = self.entries.write().await.remove(access_token);
        if let Some(driver) = removed {
            driver.close().await;
            true
        } else {
            false
        }
    }

    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn snapshot_keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn internal_driver(&self) -> Arc<dyn SqlDriver> {
        self.internal_driver.clone()
    }

    /// Closes every remaining entry in sequence.
    pub async fn close_all(&self) {
        let mut guard = self.entries.write().await;
        for (_, driver) in guard.drain() {
            driver.close().await;
        }
    }
}
