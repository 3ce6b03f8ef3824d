//! An [`SqlDriver`] binding for [rqlite](https://rqlite.io), the
//! Raft-replicated embedded SQL store.
//!
//! Talks to rqlite's HTTP API (`/db/query`, `/db/execute`, `/status`) through
//! one small client struct and one error enum, with no connection pooling of
//! its own — the gateway's own [`suresql`] pool is what bounds concurrency.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use suresql_core::driver::{
    DbRecord, DriverError, DriverResult, EffectTally, Filter, InsertRecord, NodeStatus,
    ParamStatement, Queued, SchemaInfo, SqlDriver,
};
use suresql_core::sql_compile::{compile_insert, compile_tail, compile_where};
use tokio_util::sync::CancellationToken;

/// Consistency level rqlite should use for reads (`none`, `weak`, `strong`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Consistency {
    None,
    Weak,
    Strong,
}

impl Consistency {
    fn as_query_param(self) -> &'static str {
        match self {
            Consistency::None => "none",
            Consistency::Weak => "weak",
            Consistency::Strong => "strong",
        }
    }
}

/// Connection parameters for an rqlite node, constructed by the driver
/// factory from configuration.
#[derive(Clone, Debug)]
pub struct RqliteConfig {
    pub scheme: &'static str, // "http" or "https"
    pub host: String,
    pub port: Option<u16>,
    pub basic_auth: Option<(String, String)>,
    pub consistency: Consistency,
    /// Extra `key=value` pairs appended to the query string, joined by `&`.
    pub extra_options: Vec<(String, String)>,
    pub http_timeout: Duration,
}

impl RqliteConfig {
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.host, port),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }
}

#[derive(Debug)]
pub struct RqliteDriver {
    client: Client,
    config: RqliteConfig,
}

impl RqliteDriver {
    pub fn new(config: RqliteConfig) -> DriverResult<Self> {
        let mut builder = Client::builder().timeout(config.http_timeout);
        if let Some((user, pass)) = &config.basic_auth {
            // reqwest applies basic auth per-request, not on the client
            // builder; we stash credentials and apply them per call instead.
            let _ = (user, pass);
        }
        let client = builder
            .build()
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn query_url(&self) -> String {
        let mut url = format!(
            "{}/db/query?level={}",
            self.config.base_url(),
            self.config.consistency.as_query_param()
        );
        for (k, v) in &self.config.extra_options {
            url.push('&');
            url.push_str(k);
            url.push('=');
            url.push_str(v);
        }
        url
    }

    fn execute_url(&self) -> String {
        format!("{}/db/execute?transaction=true", self.config.base_url())
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.basic_auth {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    async fn post_statements(
        &self,
        url: &str,
        body: Value,
        cancel: &CancellationToken,
    ) -> DriverResult<Value> {
        let request = self.apply_auth(self.client.post(url).json(&body));
        tokio::select! {
            _ = cancel.cancelled() => Err(DriverError::Cancelled),
            result = request.send() => {
                let response = result.map_err(|e| DriverError::Transport(e.to_string()))?;
                response
                    .json::<Value>()
                    .await
                    .map_err(|e| DriverError::Transport(e.to_string()))
            }
        }
    }

    /// Runs one or more raw SQL statements (no bind values) as a query batch
    /// and parses each result set.
    async fn run_query_batch(
        &self,
        statements: &[String],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<Vec<DbRecord>>> {
        let body = json!(statements);
        let response = self.post_statements(&self.query_url(), body, cancel).await?;
        parse_query_results(&response)
    }

    async fn run_query_batch_parameterized(
        &self,
        statements: &[ParamStatement],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<Vec<DbRecord>>> {
        let body: Vec<Value> = statements
            .iter()
            .map(|s| {
                let mut entry = vec![Value::String(s.query.clone())];
                entry.extend(s.values.iter().cloned());
                Value::Array(entry)
            })
            .collect();
        let response = self
            .post_statements(&self.query_url(), Value::Array(body), cancel)
            .await?;
        parse_query_results(&response)
    }

    async fn run_exec_batch(
        &self,
        statements: &[String],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>> {
        let body = json!(statements);
        let response = self.post_statements(&self.execute_url(), body, cancel).await?;
        parse_exec_results(&response)
    }

    async fn run_exec_batch_parameterized(
        &self,
        statements: &[ParamStatement],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>> {
        let body: Vec<Value> = statements
            .iter()
            .map(|s| {
                let mut entry = vec![Value::String(s.query.clone())];
                entry.extend(s.values.iter().cloned());
                Value::Array(entry)
            })
            .collect();
        let response = self
            .post_statements(&self.execute_url(), Value::Array(body), cancel)
            .await?;
        parse_exec_results(&response)
    }
}

fn qmark_placeholder(_: usize) -> String {
    "?".to_string()
}

/// Parses rqlite's `/db/query` response shape:
/// `{"results":[{"columns":[...],"values":[[...]]} | {"error":"..."}]}`.
fn parse_query_results(response: &Value) -> DriverResult<Vec<Vec<DbRecord>>> {
    let results = response
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| DriverError::Other("malformed rqlite query response".into()))?;

    let mut out = Vec::with_capacity(results.len());
    for result in results {
        if let Some(err) = result.get("error").and_then(Value::as_str) {
            return Err(DriverError::Other(err.to_string()));
        }
        let columns = result
            .get("columns")
            .and_then(Value::as_array)
            .map(|cols| {
                cols.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let rows = result
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let cells = row.as_array().cloned().unwrap_or_default();
            let mut record: DbRecord = HashMap::new();
            for (col, cell) in columns.iter().zip(cells.into_iter()) {
                record.insert(col.clone(), cell);
            }
            records.push(record);
        }
        out.push(records);
    }
    Ok(out)
}

/// Parses rqlite's `/db/execute` response shape:
/// `{"results":[{"last_insert_id":N,"rows_affected":N} | {"error":"..."}]}`.
fn parse_exec_results(response: &Value) -> DriverResult<Vec<EffectTally>> {
    let results = response
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| DriverError::Other("malformed rqlite execute response".into()))?;

    Ok(results
        .iter()
        .map(|result| {
            if let Some(err) = result.get("error").and_then(Value::as_str) {
                return EffectTally {
                    rows_affected: 0,
                    last_insert_id: None,
                    error: Some(err.to_string()),
                };
            }
            EffectTally {
                rows_affected: result
                    .get("rows_affected")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                last_insert_id: result.get("last_insert_id").and_then(Value::as_i64),
                error: None,
            }
        })
        .collect())
}

fn first_row_or_no_rows(mut rows: Vec<DbRecord>) -> DriverResult<DbRecord> {
    if rows.is_empty() {
        Err(DriverError::NoRows)
    } else {
        Ok(rows.remove(0))
    }
}

#[async_trait]
impl SqlDriver for RqliteDriver {
    fn driver_id(&self) -> &'static str {
        "rqlite"
    }

    async fn status(&self, cancel: &CancellationToken) -> DriverResult<NodeStatus> {
        let url = format!("{}/status", self.config.base_url());
        let request = self.apply_auth(self.client.get(&url));
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DriverError::Cancelled),
            result = request.send() => result.map_err(|e| DriverError::Transport(e.to_string()))?,
        };
        let body: Value = response
            .json()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        let leader = body
            .pointer("/store/raft/state")
            .and_then(Value::as_str)
            .map(|s| s.eq_ignore_ascii_case("leader"))
            .unwrap_or(false);
        let node_id = body
            .pointer("/store/node_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let peers = body
            .pointer("/store/raft/voter_info")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(NodeStatus {
            driver_id: self.driver_id().to_string(),
            size: peers.len().max(1),
            leader,
            peers,
            node_id,
            connected: true,
        })
    }

    async fn is_connected(&self) -> bool {
        let cancel = CancellationToken::new();
        self.status(&cancel).await.is_ok()
    }

    async fn select_one(&self, table: &str, cancel: &CancellationToken) -> DriverResult<DbRecord> {
        let sql = format!("SELECT * FROM {table} LIMIT 1");
        let rows = self.select_one_sql(&sql, cancel).await?;
        first_row_or_no_rows(rows)
    }

    async fn select_many(
        &self,
        table: &str,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<DbRecord>> {
        let sql = format!("SELECT * FROM {table}");
        self.select_one_sql(&sql, cancel).await
    }

    async fn select_one_with_condition(
        &self,
        table: &str,
        condition: &Filter,
        cancel: &CancellationToken,
    ) -> DriverResult<DbRecord> {
        let mut rows = self
            .select_many_with_condition(table, condition, cancel)
            .await?;
        if rows.is_empty() {
            Err(DriverError::NoRows)
        } else {
            Ok(rows.remove(0))
        }
    }

    async fn select_many_with_condition(
        &self,
        table: &str,
        condition: &Filter,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<DbRecord>> {
        let (where_clause, values) = compile_where(condition, &mut qmark_placeholder);
        let tail = compile_tail(condition);
        let mut sql = format!("SELECT * FROM {table}");
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }
        if !tail.is_empty() {
            sql.push(' ');
            sql.push_str(&tail);
        }
        let statement = ParamStatement { query: sql, values };
        self.select_one_sql_parameterized(&statement, cancel).await
    }

    async fn select_one_sql(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<DbRecord>> {
        let mut batches = self.run_query_batch(&[sql.to_string()], cancel).await?;
        Ok(batches.pop().unwrap_or_default())
    }

    async fn select_only_one_sql(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> DriverResult<DbRecord> {
        let rows = self.select_one_sql(sql, cancel).await?;
        first_row_or_no_rows(rows)
    }

    async fn select_many_sql(
        &self,
        statements: &[String],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<Vec<DbRecord>>> {
        self.run_query_batch(statements, cancel).await
    }

    async fn select_one_sql_parameterized(
        &self,
        statement: &ParamStatement,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<DbRecord>> {
        let mut batches = self
            .run_query_batch_parameterized(std::slice::from_ref(statement), cancel)
            .await?;
        Ok(batches.pop().unwrap_or_default())
    }

    async fn select_only_one_sql_parameterized(
        &self,
        statement: &ParamStatement,
        cancel: &CancellationToken,
    ) -> DriverResult<DbRecord> {
        let rows = self.select_one_sql_parameterized(statement, cancel).await?;
        first_row_or_no_rows(rows)
    }

    async fn select_many_sql_parameterized(
        &self,
        statements: &[ParamStatement],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<Vec<DbRecord>>> {
        self.run_query_batch_parameterized(statements, cancel).await
    }

    async fn exec_one_sql(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> DriverResult<EffectTally> {
        let mut tallies = self.run_exec_batch(&[sql.to_string()], cancel).await?;
        Ok(tallies.pop().unwrap_or_default())
    }

    async fn exec_many_sql(
        &self,
        statements: &[String],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>> {
        self.run_exec_batch(statements, cancel).await
    }

    async fn exec_one_sql_parameterized(
        &self,
        statement: &ParamStatement,
        cancel: &CancellationToken,
    ) -> DriverResult<EffectTally> {
        let mut tallies = self
            .run_exec_batch_parameterized(std::slice::from_ref(statement), cancel)
            .await?;
        Ok(tallies.pop().unwrap_or_default())
    }

    async fn exec_many_sql_parameterized(
        &self,
        statements: &[ParamStatement],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>> {
        self.run_exec_batch_parameterized(statements, cancel).await
    }

    async fn insert_one_db_record(
        &self,
        record: &InsertRecord,
        _queued: Queued,
        cancel: &CancellationToken,
    ) -> DriverResult<EffectTally> {
        let (sql, values) = compile_insert(record, &mut qmark_placeholder);
        self.exec_one_sql_parameterized(&ParamStatement { query: sql, values }, cancel)
            .await
    }

    async fn insert_many_db_records_same_table(
        &self,
        records: &[InsertRecord],
        _queued: Queued,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>> {
        let statements: Vec<ParamStatement> = records
            .iter()
            .map(|r| {
                let (sql, values) = compile_insert(r, &mut qmark_placeholder);
                ParamStatement { query: sql, values }
            })
            .collect();
        self.exec_many_sql_parameterized(&statements, cancel).await
    }

    async fn insert_many_db_records(
        &self,
        records: &[InsertRecord],
        queued: Queued,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>> {
        // Heterogeneous tables: same fan-out, the table name just varies per
        // statement already (compile_insert reads it from the record).
        self.insert_many_db_records_same_table(records, queued, cancel)
            .await
    }

    async fn get_schema(&self, cancel: &CancellationToken) -> DriverResult<SchemaInfo> {
        let sql =
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'";
        let table_rows = self.select_one_sql(sql, cancel).await?;
        let mut tables = HashMap::new();
        for row in table_rows {
            if let Some(Value::String(name)) = row.get("name") {
                let pragma = format!("PRAGMA table_info({name})");
                let columns = self
                    .select_one_sql(&pragma, cancel)
                    .await
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|col| col.get("name").and_then(Value::as_str).map(str::to_string))
                    .collect();
                tables.insert(name.clone(), columns);
            }
        }
        Ok(SchemaInfo { tables })
    }

    async fn close(&self) {
        // Stateless HTTP client: nothing to release.
    }
}
