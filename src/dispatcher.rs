//! The SQL dispatcher: classifies an incoming request shape and invokes the
//! matching driver operation, converting `no-rows` into an empty result
//! rather than a failure and measuring wall-clock execution time at the
//! call boundary.

use std::sync::Arc;
use std::time::Instant;

use suresql_core::driver::{DriverError, ParamStatement};
use suresql_core::validate::validate_table_name;
use suresql_core::{DbRecord, SqlDriver, SureSqlError};
use tokio_util::sync::CancellationToken;

use crate::wire::{
    InsertRequest, QueryRequest, QueryResponse, QueryResponseSql, QuerySqlRequest, SqlRequest,
    SqlResponse,
};

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn has_filter(condition: &Option<suresql_core::driver::Filter>) -> bool {
    condition.as_ref().map(|f| !f.is_empty()).unwrap_or(false)
}

/// Converts a driver failure into a dispatcher error labelled with the
/// operation that produced it. Callers handle `NoRows` locally before ever
/// reaching this function: it is never the right outcome for a row-returning
/// path, and effect-producing paths report per-statement errors instead.
fn dispatch_err(op: &'static str, err: DriverError) -> SureSqlError {
    SureSqlError::from_driver(op, err)
}

fn to_param_statements(param_sql: &[crate::wire::ParamSql]) -> Vec<ParamStatement> {
    param_sql
        .iter()
        .map(|p| ParamStatement {
            query: p.query.clone(),
            values: p.values.clone(),
        })
        .collect()
}

/// Routes a raw or parameterised `SqlRequest` to the effect-producing half
/// of the driver contract. `statements` takes priority over `param_sql`
/// when both are present.
pub async fn dispatch_sql(
    driver: &Arc<dyn SqlDriver>,
    request: &SqlRequest,
    cancel: &CancellationToken,
) -> Result<SqlResponse, SureSqlError> {
    let start = Instant::now();
    let results = if !request.statements.is_empty() {
        if request.statements.len() == 1 {
            vec![driver
                .exec_one_sql(&request.statements[0], cancel)
                .await
                .map_err(|e| dispatch_err("ExecOneSQL", e))?]
        } else {
            driver
                .exec_many_sql(&request.statements, cancel)
                .await
                .map_err(|e| dispatch_err("ExecManySQL", e))?
        }
    } else if !request.param_sql.is_empty() {
        let statements = to_param_statements(&request.param_sql);
        if statements.len() == 1 {
            vec![driver
                .exec_one_sql_parameterized(&statements[0], cancel)
                .await
                .map_err(|e| dispatch_err("ExecOneSQLParameterized", e))?]
        } else {
            driver
                .exec_many_sql_parameterized(&statements, cancel)
                .await
                .map_err(|e| dispatch_err("ExecManySQLParameterized", e))?
        }
    } else {
        return Err(SureSqlError::Validation(
            "a SQL request needs at least one of statements/param_sql".to_string(),
        ));
    };

    let rows_affected = results.iter().map(|r| r.rows_affected).sum();
    Ok(SqlResponse {
        results,
        execution_time: elapsed_ms(start),
        rows_affected,
    })
}

/// Routes a table-scoped query by the `(single_row, has_filter)` pair onto
/// one of the four condition/cardinality driver methods.
pub async fn dispatch_query(
    driver: &Arc<dyn SqlDriver>,
    request: &QueryRequest,
    cancel: &CancellationToken,
) -> Result<QueryResponse, SureSqlError> {
    validate_table_name(&request.table, false)?;
    let start = Instant::now();
    let filter_present = has_filter(&request.condition);

    let records = match (request.single_row, filter_present) {
        (true, true) => {
            let condition = request.condition.as_ref().expect("checked above");
            match driver
                .select_one_with_condition(&request.table, condition, cancel)
                .await
            {
                Ok(record) => vec![record],
                Err(DriverError::NoRows) => vec![],
                Err(e) => return Err(dispatch_err("SelectOneWithCondition", e)),
            }
        }
        (true, false) => match driver.select_one(&request.table, cancel).await {
            Ok(record) => vec![record],
            Err(DriverError::NoRows) => vec![],
            Err(e) => return Err(dispatch_err("SelectOne", e)),
        },
        (false, true) => {
            let condition = request.condition.as_ref().expect("checked above");
            match driver
                .select_many_with_condition(&request.table, condition, cancel)
                .await
            {
                Ok(records) => records,
                Err(DriverError::NoRows) => vec![],
                Err(e) => return Err(dispatch_err("SelectManyWithCondition", e)),
            }
        }
        (false, false) => match driver.select_many(&request.table, cancel).await {
            Ok(records) => records,
            Err(DriverError::NoRows) => vec![],
            Err(e) => return Err(dispatch_err("SelectMany", e)),
        },
    };

    let count = records.len();
    Ok(QueryResponse {
        records,
        execution_time: elapsed_ms(start),
        count,
    })
}

/// Repeats the `SqlRequest` fan-out, but over the row-returning operations:
/// the one-statement case picks `SelectOnlyOneSQL(Parameterized)` vs.
/// `SelectOneSQL(Parameterized)` on `single_row`; the many-statement case
/// always yields one result set per statement regardless of `single_row`.
pub async fn dispatch_query_sql(
    driver: &Arc<dyn SqlDriver>,
    request: &QuerySqlRequest,
    cancel: &CancellationToken,
) -> Result<QueryResponseSql, SureSqlError> {
    let start = Instant::now();

    let result_sets: Vec<Vec<DbRecord>> = if !request.statements.is_empty() {
        if request.statements.len() == 1 {
            let sql = &request.statements[0];
            if request.single_row {
                match driver.select_only_one_sql(sql, cancel).await {
                    Ok(record) => vec![vec![record]],
                    Err(DriverError::NoRows) => vec![vec![]],
                    Err(e) => return Err(dispatch_err("SelectOnlyOneSQL", e)),
                }
            } else {
                match driver.select_one_sql(sql, cancel).await {
                    Ok(records) => vec![records],
                    Err(DriverError::NoRows) => vec![vec![]],
                    Err(e) => return Err(dispatch_err("SelectOneSQL", e)),
                }
            }
        } else {
            driver
                .select_many_sql(&request.statements, cancel)
                .await
                .map_err(|e| dispatch_err("SelectManySQL", e))?
        }
    } else if !request.param_sql.is_empty() {
        let statements = to_param_statements(&request.param_sql);
        if statements.len() == 1 {
            if request.single_row {
                match driver
                    .select_only_one_sql_parameterized(&statements[0], cancel)
                    .await
                {
                    Ok(record) => vec![vec![record]],
                    Err(DriverError::NoRows) => vec![vec![]],
                    Err(e) => return Err(dispatch_err("SelectOnlyOneSQLParameterized", e)),
                }
            } else {
                match driver
                    .select_one_sql_parameterized(&statements[0], cancel)
                    .await
                {
                    Ok(records) => vec![records],
                    Err(DriverError::NoRows) => vec![vec![]],
                    Err(e) => return Err(dispatch_err("SelectOneSQLParameterized", e)),
                }
            }
        } else {
            driver
                .select_many_sql_parameterized(&statements, cancel)
                .await
                .map_err(|e| dispatch_err("SelectManySQLParameterized", e))?
        }
    } else {
        return Err(SureSqlError::Validation(
            "a SQL request needs at least one of statements/param_sql".to_string(),
        ));
    };

    let execution_time = elapsed_ms(start);
    Ok(result_sets
        .into_iter()
        .map(|records| {
            let count = records.len();
            QueryResponse {
                records,
                execution_time,
                count,
            }
        })
        .collect())
}

/// Routes an insert batch by cardinality and `same_table`: one record always
/// goes through `InsertOneDBRecord`; more than one is split by whether every
/// record targets the same table.
pub async fn dispatch_insert(
    driver: &Arc<dyn SqlDriver>,
    request: &InsertRequest,
    cancel: &CancellationToken,
) -> Result<SqlResponse, SureSqlError> {
    if request.records.is_empty() {
        return Err(SureSqlError::Validation(
            "an insert request needs at least one record".to_string(),
        ));
    }
    let start = Instant::now();

    let results = if request.records.len() == 1 {
        vec![driver
            .insert_one_db_record(&request.records[0], request.queue, cancel)
            .await
            .map_err(|e| dispatch_err("InsertOneDBRecord", e))?]
    } else if request.same_table {
        driver
            .insert_many_db_records_same_table(&request.records, request.queue, cancel)
            .await
            .map_err(|e| dispatch_err("InsertManyDBRecordsSameTable", e))?
    } else {
        driver
            .insert_many_db_records(&request.records, request.queue, cancel)
            .await
            .map_err(|e| dispatch_err("InsertManyDBRecords", e))?
    };

    let rows_affected = results.iter().map(|r| r.rows_affected).sum();
    Ok(SqlResponse {
        results,
        execution_time: elapsed_ms(start),
        rows_affected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use suresql_core::driver::{
        EffectTally, Filter, InsertRecord, NodeStatus, Queued, SchemaInfo,
    };

    /// A driver whose row count and error behaviour are scripted per test,
    /// tracking how many times `select_many`/`exec_one_sql` were called so
    /// tests can assert on routing without inspecting SQL text.
    #[derive(Debug)]
    struct ScriptedDriver {
        rows: Vec<DbRecord>,
        no_rows: bool,
        exec_calls: AtomicUsize,
    }

    impl ScriptedDriver {
        fn with_rows(rows: Vec<DbRecord>) -> Self {
            Self {
                rows,
                no_rows: false,
                exec_calls: AtomicUsize::new(0),
            }
        }

        fn empty() -> Self {
            Self {
                rows: vec![],
                no_rows: true,
                exec_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SqlDriver for ScriptedDriver {
        fn driver_id(&self) -> &'static str {
            "scripted"
        }
        async fn status(&self, _c: &CancellationToken) -> suresql_core::DriverResult<NodeStatus> {
            unimplemented!()
        }
        async fn is_connected(&self) -> bool {
            true
        }
        async fn select_one(
            &self,
            _t: &str,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<DbRecord> {
            if self.no_rows {
                Err(DriverError::NoRows)
            } else {
                Ok(self.rows[0].clone())
            }
        }
        async fn select_many(
            &self,
            _t: &str,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<Vec<DbRecord>> {
            Ok(self.rows.clone())
        }
        async fn select_one_with_condition(
            &self,
            _t: &str,
            _f: &Filter,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<DbRecord> {
            if self.no_rows {
                Err(DriverError::NoRows)
            } else {
                Ok(self.rows[0].clone())
            }
        }
        async fn select_many_with_condition(
            &self,
            _t: &str,
            _f: &Filter,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<Vec<DbRecord>> {
            Ok(self.rows.clone())
        }
        async fn select_one_sql(
            &self,
            _s: &str,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<Vec<DbRecord>> {
            Ok(self.rows.clone())
        }
        async fn select_only_one_sql(
            &self,
            _s: &str,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<DbRecord> {
            if self.no_rows {
                Err(DriverError::NoRows)
            } else {
                Ok(self.rows[0].clone())
            }
        }
        async fn select_many_sql(
            &self,
            statements: &[String],
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<Vec<Vec<DbRecord>>> {
            Ok(statements.iter().map(|_| self.rows.clone()).collect())
        }
        async fn select_one_sql_parameterized(
            &self,
            _s: &suresql_core::driver::ParamStatement,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<Vec<DbRecord>> {
            Ok(self.rows.clone())
        }
        async fn select_only_one_sql_parameterized(
            &self,
            _s: &suresql_core::driver::ParamStatement,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<DbRecord> {
            if self.no_rows {
                Err(DriverError::NoRows)
            } else {
                Ok(self.rows[0].clone())
            }
        }
        async fn select_many_sql_parameterized(
            &self,
            statements: &[suresql_core::driver::ParamStatement],
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<Vec<Vec<DbRecord>>> {
            Ok(statements.iter().map(|_| self.rows.clone()).collect())
        }
        async fn exec_one_sql(
            &self,
            _s: &str,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<EffectTally> {
            self.exec_calls.fetch_add(1, Ordering::Relaxed);
            Ok(EffectTally {
                rows_affected: 1,
                last_insert_id: Some(1),
                error: None,
            })
        }
        async fn exec_many_sql(
            &self,
            statements: &[String],
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<Vec<EffectTally>> {
            self.exec_calls.fetch_add(1, Ordering::Relaxed);
            Ok(statements
                .iter()
                .map(|_| EffectTally {
                    rows_affected: 1,
                    last_insert_id: None,
                    error: None,
                })
                .collect())
        }
        async fn exec_one_sql_parameterized(
            &self,
            _s: &suresql_core::driver::ParamStatement,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<EffectTally> {
            self.exec_calls.fetch_add(1, Ordering::Relaxed);
            Ok(EffectTally {
                rows_affected: 1,
                last_insert_id: None,
                error: None,
            })
        }
        async fn exec_many_sql_parameterized(
            &self,
            statements: &[suresql_core::driver::ParamStatement],
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<Vec<EffectTally>> {
            self.exec_calls.fetch_add(1, Ordering::Relaxed);
            Ok(statements
                .iter()
                .map(|_| EffectTally {
                    rows_affected: 1,
                    last_insert_id: None,
                    error: None,
                })
                .collect())
        }
        async fn insert_one_db_record(
            &self,
            _r: &InsertRecord,
            _q: Queued,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<EffectTally> {
            Ok(EffectTally {
                rows_affected: 1,
                last_insert_id: Some(1),
                error: None,
            })
        }
        async fn insert_many_db_records_same_table(
            &self,
            r: &[InsertRecord],
            _q: Queued,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<Vec<EffectTally>> {
            Ok(r.iter()
                .map(|_| EffectTally {
                    rows_affected: 1,
                    last_insert_id: None,
                    error: None,
                })
                .collect())
        }
        async fn insert_many_db_records(
            &self,
            r: &[InsertRecord],
            _q: Queued,
            _c: &CancellationToken,
        ) -> suresql_core::DriverResult<Vec<EffectTally>> {
            Ok(r.iter()
                .map(|_| EffectTally {
                    rows_affected: 1,
                    last_insert_id: None,
                    error: None,
                })
                .collect())
        }
        async fn get_schema(&self, _c: &CancellationToken) -> suresql_core::DriverResult<SchemaInfo> {
            unimplemented!()
        }
        async fn close(&self) {}
    }

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    fn one_record() -> DbRecord {
        let mut record = DbRecord::new();
        record.insert("id".to_string(), json!(42));
        record
    }

    #[tokio::test]
    async fn query_no_rows_is_empty_not_an_error() {
        let driver: Arc<dyn SqlDriver> = Arc::new(ScriptedDriver::empty());
        let request = QueryRequest {
            table: "orders".to_string(),
            condition: Some(Filter {
                field: Some("id".to_string()),
                operator: Some(suresql_core::driver::FilterOperator::Eq),
                value: Some(json!(42)),
                ..Default::default()
            }),
            single_row: true,
        };
        let response = dispatch_query(&driver, &request, &cancel()).await.unwrap();
        assert_eq!(response.count, 0);
        assert!(response.records.is_empty());
        assert!(response.execution_time >= 0.0);
    }

    #[tokio::test]
    async fn query_routes_by_single_row_and_filter_presence() {
        let driver: Arc<dyn SqlDriver> = Arc::new(ScriptedDriver::with_rows(vec![one_record()]));
        let no_filter = QueryRequest {
            table: "orders".to_string(),
            condition: None,
            single_row: false,
        };
        let response = dispatch_query(&driver, &no_filter, &cancel()).await.unwrap();
        assert_eq!(response.count, 1);
    }

    #[tokio::test]
    async fn sql_single_statement_calls_exec_one() {
        let driver = Arc::new(ScriptedDriver::empty());
        let request = SqlRequest {
            statements: vec!["INSERT INTO t VALUES(1)".to_string()],
            ..Default::default()
        };
        let as_trait: Arc<dyn SqlDriver> = driver.clone();
        let response = dispatch_sql(&as_trait, &request, &cancel()).await.unwrap();
        assert_eq!(response.rows_affected, 1);
        assert_eq!(driver.exec_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn sql_two_statements_sums_rows_affected() {
        let driver: Arc<dyn SqlDriver> = Arc::new(ScriptedDriver::empty());
        let request = SqlRequest {
            statements: vec![
                "INSERT INTO t VALUES(1)".to_string(),
                "INSERT INTO t VALUES(2)".to_string(),
            ],
            ..Default::default()
        };
        let response = dispatch_sql(&driver, &request, &cancel()).await.unwrap();
        assert_eq!(response.rows_affected, 2);
    }

    #[tokio::test]
    async fn sql_prefers_statements_over_param_sql_when_both_present() {
        let driver = Arc::new(ScriptedDriver::empty());
        let request = SqlRequest {
            statements: vec!["INSERT INTO t VALUES(1)".to_string()],
            param_sql: vec![crate::wire::ParamSql {
                query: "INSERT INTO t VALUES(?)".to_string(),
                values: vec![json!(1)],
            }],
            single_row: false,
        };
        let as_trait: Arc<dyn SqlDriver> = driver.clone();
        dispatch_sql(&as_trait, &request, &cancel()).await.unwrap();
        assert_eq!(driver.exec_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn insert_single_record_uses_insert_one() {
        let driver: Arc<dyn SqlDriver> = Arc::new(ScriptedDriver::empty());
        let mut data = DbRecord::new();
        data.insert("id".to_string(), json!(1));
        let request = InsertRequest {
            records: vec![InsertRecord {
                table_name: "t1".to_string(),
                data,
            }],
            queue: false,
            same_table: false,
        };
        let response = dispatch_insert(&driver, &request, &cancel()).await.unwrap();
        assert_eq!(response.rows_affected, 1);
        assert_eq!(response.results.len(), 1);
    }

    #[tokio::test]
    async fn insert_heterogeneous_records_produces_one_tally_each() {
        let driver: Arc<dyn SqlDriver> = Arc::new(ScriptedDriver::empty());
        let mut data1 = DbRecord::new();
        data1.insert("id".to_string(), json!(1));
        let mut data2 = DbRecord::new();
        data2.insert("id".to_string(), json!(1));
        let request = InsertRequest {
            records: vec![
                InsertRecord {
                    table_name: "t1".to_string(),
                    data: data1,
                },
                InsertRecord {
                    table_name: "t2".to_string(),
                    data: data2,
                },
            ],
            queue: false,
            same_table: false,
        };
        let response = dispatch_insert(&driver, &request, &cancel()).await.unwrap();
        assert_eq!(response.rows_affected, 2);
        assert_eq!(response.results.len(), 2);
    }

    #[tokio::test]
    async fn query_sql_single_statement_single_row_wraps_one_record() {
        let driver: Arc<dyn SqlDriver> = Arc::new(ScriptedDriver::with_rows(vec![one_record()]));
        let request = QuerySqlRequest {
            statements: vec!["SELECT * FROM t".to_string()],
            param_sql: vec![],
            single_row: true,
        };
        let response = dispatch_query_sql(&driver, &request, &cancel()).await.unwrap();
        assert_eq!(response.len(), 1);
        assert_eq!(response[0].count, 1);
    }

    #[tokio::test]
    async fn query_sql_many_statements_yields_one_response_per_statement() {
        let driver: Arc<dyn SqlDriver> = Arc::new(ScriptedDriver::with_rows(vec![one_record()]));
        let request = QuerySqlRequest {
            statements: vec!["SELECT 1".to_string(), "SELECT 2".to_string()],
            param_sql: vec![],
            single_row: true,
        };
        let response = dispatch_query_sql(&driver, &request, &cancel()).await.unwrap();
        assert_eq!(response.len(), 2);
    }

    #[tokio::test]
    async fn empty_sql_request_is_a_validation_error() {
        let driver: Arc<dyn SqlDriver> = Arc::new(ScriptedDriver::empty());
        let request = SqlRequest::default();
        let err = dispatch_sql(&driver, &request, &cancel()).await.unwrap_err();
        assert!(matches!(err, SureSqlError::Validation(_)));
    }
}
