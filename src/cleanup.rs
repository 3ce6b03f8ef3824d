//! Cleanup supervisor: periodically reclaims pool entries whose
//! token has expired.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::Metrics;
use crate::pool::ConnectionPool;
use crate::token_store::TokenStore;

/// On each tick: snapshot the pool's key set, and close every key that no
/// live refresh-token record still names as its access token. Liveness is
/// keyed off the refresh map, not the access map — a driver stays pooled
/// for as long as its session can still be refreshed, and is only reclaimed
/// once the refresh token itself has expired. Breaks the pool/token-store
/// reference cycle ("cyclic disposal") that would result from embedding a
/// reference instead — they are coupled only by key.
pub async fn sweep_once(pool: &ConnectionPool, tokens: &TokenStore, metrics: &Metrics) -> usize {
    let keys = pool.snapshot_keys().await;
    let live_access: HashSet<String> = tokens
        .refresh_map()
        .snapshot()
        .await
        .into_iter()
        .map(|(_, record)| record.access_token)
        .collect();
    let mut reclaimed = 0;
    for key in keys {
        if !live_access.contains(&key) {
            if pool.close(&key).await {
                metrics.record_connection_closed();
                reclaimed += 1;
            }
        }
    }
    reclaimed
}

/// Runs `sweep_once` on every tick of `period` until the returned
/// `JoinHandle` is aborted. `period` is the configured sweep interval,
/// floored to the built-in default elsewhere.
pub fn spawn_cleanup_loop(
    pool: Arc<ConnectionPool>,
    tokens: Arc<TokenStore>,
    metrics: Arc<Metrics>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let reclaimed = sweep_once(&pool, &tokens, &metrics).await;
            if reclaimed > 0 {
                tracing::debug!(reclaimed, "cleanup supervisor reclaimed stale pool entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use suresql_core::model::TokenRecord;
    use suresql_core::SqlDriver;
    use time::{Duration as TimeDuration, OffsetDateTime};

    #[derive(Debug)]
    struct NoopDriver;

    #[async_trait::async_trait]
    impl SqlDriver for NoopDriver {
        fn driver_id(&self) -> &'static str {
            "noop"
        }
        async fn status(
            &self,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<suresql_core::driver::NodeStatus> {
            unimplemented!()
        }
        async fn is_connected(&self) -> bool {
            true
        }
        async fn select_one(
            &self,
            _t: &str,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<suresql_core::DbRecord> {
            unimplemented!()
        }
        async fn select_many(
            &self,
            _t: &str,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<Vec<suresql_core::DbRecord>> {
            unimplemented!()
        }
        async fn select_one_with_condition(
            &self,
            _t: &str,
            _f: &suresql_core::driver::Filter,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<suresql_core::DbRecord> {
            unimplemented!()
        }
        async fn select_many_with_condition(
            &self,
            _t: &str,
            _f: &suresql_core::driver::Filter,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<Vec<suresql_core::DbRecord>> {
            unimplemented!()
        }
        async fn select_one_sql(
            &self,
            _s: &str,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<Vec<suresql_core::DbRecord>> {
            unimplemented!()
        }
        async fn select_only_one_sql(
            &self,
            _s: &str,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<suresql_core::DbRecord> {
            unimplemented!()
        }
        async fn select_many_sql(
            &self,
            _s: &[String],
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<Vec<Vec<suresql_core::DbRecord>>> {
            unimplemented!()
        }
        async fn select_one_sql_parameterized(
            &self,
            _s: &suresql_core::driver::ParamStatement,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<Vec<suresql_core::DbRecord>> {
            unimplemented!()
        }
        async fn select_only_one_sql_parameterized(
            &self,
            _s: &suresql_core::driver::ParamStatement,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<suresql_core::DbRecord> {
            unimplemented!()
        }
        async fn select_many_sql_parameterized(
            &self,
            _s: &[suresql_core::driver::ParamStatement],
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<Vec<Vec<suresql_core::DbRecord>>> {
            unimplemented!()
        }
        async fn exec_one_sql(
            &self,
            _s: &str,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<suresql_core::driver::EffectTally> {
            unimplemented!()
        }
        async fn exec_many_sql(
            &self,
            _s: &[String],
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<Vec<suresql_core::driver::EffectTally>> {
            unimplemented!()
        }
        async fn exec_one_sql_parameterized(
            &self,
            _s: &suresql_core::driver::ParamStatement,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<suresql_core::driver::EffectTally> {
            unimplemented!()
        }
        async fn exec_many_sql_parameterized(
            &self,
            _s: &[suresql_core::driver::ParamStatement],
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<Vec<suresql_core::driver::EffectTally>> {
            unimplemented!()
        }
        async fn insert_one_db_record(
            &self,
            _r: &suresql_core::driver::InsertRecord,
            _q: suresql_core::driver::Queued,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<suresql_core::driver::EffectTally> {
            unimplemented!()
        }
        async fn insert_many_db_records_same_table(
            &self,
            _r: &[suresql_core::driver::InsertRecord],
            _q: suresql_core::driver::Queued,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<Vec<suresql_core::driver::EffectTally>> {
            unimplemented!()
        }
        async fn insert_many_db_records(
            &self,
            _r: &[suresql_core::driver::InsertRecord],
            _q: suresql_core::driver::Queued,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<Vec<suresql_core::driver::EffectTally>> {
            unimplemented!()
        }
        async fn get_schema(
            &self,
            _c: &tokio_util::sync::CancellationToken,
        ) -> suresql_core::DriverResult<suresql_core::driver::SchemaInfo> {
            unimplemented!()
        }
        async fn close(&self) {}
    }

    fn record(access: &str, refresh: &str) -> TokenRecord {
        let now = OffsetDateTime::now_utc();
        TokenRecord {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            user_id: 1,
            username: "alice".to_string(),
            access_expires_at: now + TimeDuration::hours(1),
            refresh_expires_at: now + TimeDuration::hours(2),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn sweep_closes_pool_entries_without_a_live_token() {
        let pool = ConnectionPool::new(10, true, Arc::new(NoopDriver));
        let tokens = TokenStore::new(TimeDuration::hours(1), TimeDuration::hours(2));
        let metrics = Metrics::new();

        pool.put("orphaned".to_string(), Arc::new(NoopDriver)).await;
        pool.put("alive".to_string(), Arc::new(NoopDriver)).await;
        tokens.save_token(record("alive", "alive-refresh")).await;

        let reclaimed = sweep_once(&pool, &tokens, &metrics).await;
        assert_eq!(reclaimed, 1);
        assert_eq!(pool.size().await, 1);
        assert!(pool.get("alive").await.is_some());
    }

    #[tokio::test]
    async fn sweep_keeps_pool_entry_alive_on_refresh_token_alone() {
        let pool = ConnectionPool::new(10, true, Arc::new(NoopDriver));
        let tokens = TokenStore::new(TimeDuration::hours(1), TimeDuration::hours(2));
        let metrics = Metrics::new();

        pool.put("expired-access".to_string(), Arc::new(NoopDriver))
            .await;
        tokens
            .save_token(record("expired-access", "still-good-refresh"))
            .await;
        tokens.access_map().delete(&"expired-access".to_string()).await;

        let reclaimed = sweep_once(&pool, &tokens, &metrics).await;
        assert_eq!(reclaimed, 0, "a live refresh token must keep the driver pooled");
        assert!(pool.get("expired-access").await.is_some());
    }
}
