//! User row management against the `_users` table: the small
//! CRUD surface implied by the `not-found`/`conflict` error kinds.

use std::sync::Arc;

use serde_json::json;
use suresql_core::driver::{Filter, FilterOperator, InsertRecord};
use suresql_core::model::UserRow;
use suresql_core::validate::validate_user_fields;
use suresql_core::{SqlDriver, SureSqlError};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

const USERS_TABLE: &str = "_users";

fn username_filter(username: &str) -> Filter {
    Filter {
        field: Some("username".to_string()),
        operator: Some(FilterOperator::Eq),
        value: Some(json!(username)),
        ..Default::default()
    }
}

fn row_from_record(record: &suresql_core::DbRecord) -> Option<UserRow> {
    Some(UserRow {
        id: record.get("id")?.as_i64()?,
        username: record.get("username")?.as_str()?.to_string(),
        password_hash: record.get("password_hash")?.as_str()?.to_string(),
        role: record.get("role")?.as_str()?.to_string(),
        created_at: record
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(|s| OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok())
            .unwrap_or_else(OffsetDateTime::now_utc),
    })
}

pub async fn find_by_username(
    driver: &Arc<dyn SqlDriver>,
    username: &str,
    cancel: &CancellationToken,
) -> Result<Option<UserRow>, SureSqlError> {
    match driver
        .select_one_with_condition(USERS_TABLE, &username_filter(username), cancel)
        .await
    {
        Ok(record) => Ok(row_from_record(&record)),
        Err(suresql_core::DriverError::NoRows) => Ok(None),
        Err(suresql_core::DriverError::Cancelled) => Err(SureSqlError::Internal(
            "operation cancelled".to_string(),
        )),
        Err(e) => Err(SureSqlError::from_driver("FindUserByUsername", e)),
    }
}

/// Creates a new user row. Fails with `Conflict` if the username already
/// exists.
pub async fn create_user(
    driver: &Arc<dyn SqlDriver>,
    username: &str,
    password_hash: &str,
    role: &str,
    cancel: &CancellationToken,
) -> Result<(), SureSqlError> {
    validate_user_fields(username, password_hash, role)?;
    if find_by_username(driver, username, cancel).await?.is_some() {
        return Err(SureSqlError::Conflict(format!(
            "user {username:?} already exists"
        )));
    }
    let mut data = suresql_core::DbRecord::new();
    data.insert("username".to_string(), json!(username));
    data.insert("password_hash".to_string(), json!(password_hash));
    data.insert("role".to_string(), json!(role));
    let record = InsertRecord {
        table_name: USERS_TABLE.to_string(),
        data,
    };
    driver
        .insert_one_db_record(&record, false, cancel)
        .await
        .map_err(|e| SureSqlError::from_driver("CreateUser", e))?;
    Ok(())
}

/// Updates `role` for an existing user. Fails with `NotFound` if absent.
pub async fn update_role(
    driver: &Arc<dyn SqlDriver>,
    username: &str,
    role: &str,
    cancel: &CancellationToken,
) -> Result<(), SureSqlError> {
    if find_by_username(driver, username, cancel).await?.is_none() {
        return Err(SureSqlError::NotFound(format!(
            "user {username:?} not found"
        )));
    }
    let sql = "UPDATE _users SET role = ? WHERE username = ?";
    let statement = suresql_core::driver::ParamStatement {
        query: sql.to_string(),
        values: vec![json!(role), json!(username)],
    };
    driver
        .exec_one_sql_parameterized(&statement, cancel)
        .await
        .map_err(|e| SureSqlError::from_driver("UpdateUserRole", e))?;
    Ok(())
}

/// Deletes a user row. Fails with `NotFound` if absent.
pub async fn delete_user(
    driver: &Arc<dyn SqlDriver>,
    username: &str,
    cancel: &CancellationToken,
) -> Result<(), SureSqlError> {
    if find_by_username(driver, username, cancel).await?.is_none() {
        return Err(SureSqlError::NotFound(format!(
            "user {username:?} not found"
        )));
    }
    let sql = "DELETE FROM _users WHERE username = ?";
    let statement = suresql_core::driver::ParamStatement {
        query: sql.to_string(),
        values: vec![json!(username)],
    };
    driver
        .exec_one_sql_parameterized(&statement, cancel)
        .await
        .map_err(|e| SureSqlError::from_driver("DeleteUser", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use suresql_core::driver::{DriverError, DriverResult, NodeStatus, ParamStatement, Queued, SchemaInfo};

    /// An in-memory `_users` table keyed by username, just deep enough to
    /// exercise lookup/conflict/not-found without a real engine.
    #[derive(Debug, Default)]
    struct MemUsers {
        rows: Mutex<Vec<suresql_core::DbRecord>>,
    }

    #[async_trait]
    impl SqlDriver for MemUsers {
        fn driver_id(&self) -> &'static str {
            "mem-users"
        }
        async fn status(&self, _c: &CancellationToken) -> DriverResult<NodeStatus> {
            unimplemented!()
        }
        async fn is_connected(&self) -> bool {
            true
        }
        async fn select_one(&self, _t: &str, _c: &CancellationToken) -> DriverResult<suresql_core::DbRecord> {
            unimplemented!()
        }
        async fn select_many(&self, _t: &str, _c: &CancellationToken) -> DriverResult<Vec<suresql_core::DbRecord>> {
            unimplemented!()
        }
        async fn select_one_with_condition(
            &self,
            _t: &str,
            condition: &Filter,
            _c: &CancellationToken,
        ) -> DriverResult<suresql_core::DbRecord> {
            let username = condition.value.as_ref().and_then(|v| v.as_str()).unwrap_or("");
            self.rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.get("username").and_then(|v| v.as_str()) == Some(username))
                .cloned()
                .ok_or(DriverError::NoRows)
        }
        async fn select_many_with_condition(
            &self,
            _t: &str,
            _f: &Filter,
            _c: &CancellationToken,
        ) -> DriverResult<Vec<suresql_core::DbRecord>> {
            unimplemented!()
        }
        async fn select_one_sql(&self, _s: &str, _c: &CancellationToken) -> DriverResult<Vec<suresql_core::DbRecord>> {
            unimplemented!()
        }
        async fn select_only_one_sql(&self, _s: &str, _c: &CancellationToken) -> DriverResult<suresql_core::DbRecord> {
            unimplemented!()
        }
        async fn select_many_sql(
            &self,
            _s: &[String],
            _c: &CancellationToken,
        ) -> DriverResult<Vec<Vec<suresql_core::DbRecord>>> {
            unimplemented!()
        }
        async fn select_one_sql_parameterized(
            &self,
            _s: &ParamStatement,
            _c: &CancellationToken,
        ) -> DriverResult<Vec<suresql_core::DbRecord>> {
            unimplemented!()
        }
        async fn select_only_one_sql_parameterized(
            &self,
            _s: &ParamStatement,
            _c: &CancellationToken,
        ) -> DriverResult<suresql_core::DbRecord> {
            unimplemented!()
        }
        async fn select_many_sql_parameterized(
            &self,
            _s: &[ParamStatement],
            _c: &CancellationToken,
        ) -> DriverResult<Vec<Vec<suresql_core::DbRecord>>> {
            unimplemented!()
        }
        async fn exec_one_sql(&self, _s: &str, _c: &CancellationToken) -> DriverResult<suresql_core::driver::EffectTally> {
            unimplemented!()
        }
        async fn exec_many_sql(
            &self,
            _s: &[String],
            _c: &CancellationToken,
        ) -> DriverResult<Vec<suresql_core::driver::EffectTally>> {
            unimplemented!()
        }
        async fn exec_one_sql_parameterized(
            &self,
            statement: &ParamStatement,
            _c: &CancellationToken,
        ) -> DriverResult<suresql_core::driver::EffectTally> {
            // both UPDATE and DELETE key on the trailing username bind value
            let username = statement.values.last().and_then(|v| v.as_str()).unwrap_or("");
            let mut rows = self.rows.lock().unwrap();
            if statement.query.starts_with("UPDATE") {
                if let Some(row) = rows
                    .iter_mut()
                    .find(|r| r.get("username").and_then(|v| v.as_str()) == Some(username))
                {
                    row.insert("role".to_string(), statement.values[0].clone());
                }
            } else {
                rows.retain(|r| r.get("username").and_then(|v| v.as_str()) != Some(username));
            }
            Ok(suresql_core::driver::EffectTally {
                rows_affected: 1,
                last_insert_id: None,
                error: None,
            })
        }
        async fn exec_many_sql_parameterized(
            &self,
            _s: &[ParamStatement],
            _c: &CancellationToken,
        ) -> DriverResult<Vec<suresql_core::driver::EffectTally>> {
            unimplemented!()
        }
        async fn insert_one_db_record(
            &self,
            record: &InsertRecord,
            _q: Queued,
            _c: &CancellationToken,
        ) -> DriverResult<suresql_core::driver::EffectTally> {
            self.rows.lock().unwrap().push(record.data.clone());
            Ok(suresql_core::driver::EffectTally {
                rows_affected: 1,
                last_insert_id: None,
                error: None,
            })
        }
        async fn insert_many_db_records_same_table(
            &self,
            _r: &[InsertRecord],
            _q: Queued,
            _c: &CancellationToken,
        ) -> DriverResult<Vec<suresql_core::driver::EffectTally>> {
            unimplemented!()
        }
        async fn insert_many_db_records(
            &self,
            _r: &[InsertRecord],
            _q: Queued,
            _c: &CancellationToken,
        ) -> DriverResult<Vec<suresql_core::driver::EffectTally>> {
            unimplemented!()
        }
        async fn get_schema(&self, _c: &CancellationToken) -> DriverResult<SchemaInfo> {
            unimplemented!()
        }
        async fn close(&self) {}
    }

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    fn driver() -> Arc<dyn SqlDriver> {
        Arc::new(MemUsers::default())
    }

    #[tokio::test]
    async fn create_then_find_round_trips() {
        let driver = driver();
        create_user(&driver, "alice", "hash", "admin", &cancel())
            .await
            .unwrap();
        let found = find_by_username(&driver, "alice", &cancel()).await.unwrap();
        assert_eq!(found.unwrap().username, "alice");
    }

    #[tokio::test]
    async fn find_missing_user_is_none_not_an_error() {
        let driver = driver();
        let found = find_by_username(&driver, "ghost", &cancel()).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn create_duplicate_username_conflicts() {
        let driver = driver();
        create_user(&driver, "alice", "hash", "admin", &cancel())
            .await
            .unwrap();
        let err = create_user(&driver, "alice", "hash2", "admin", &cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, SureSqlError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_role_on_missing_user_is_not_found() {
        let driver = driver();
        let err = update_role(&driver, "ghost", "admin", &cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, SureSqlError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_role_changes_existing_user() {
        let driver = driver();
        create_user(&driver, "alice", "hash", "user", &cancel())
            .await
            .unwrap();
        update_role(&driver, "alice", "admin", &cancel()).await.unwrap();
        let found = find_by_username(&driver, "alice", &cancel())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.role, "admin");
    }

    #[tokio::test]
    async fn delete_missing_user_is_not_found() {
        let driver = driver();
        let err = delete_user(&driver, "ghost", &cancel()).await.unwrap_err();
        assert!(matches!(err, SureSqlError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_existing_user() {
        let driver = driver();
        create_user(&driver, "alice", "hash", "user", &cancel())
            .await
            .unwrap();
        delete_user(&driver, "alice", &cancel()).await.unwrap();
        assert!(find_by_username(&driver, "alice", &cancel())
            .await
            .unwrap()
            .is_none());
    }
}
