//! An [`SqlDriver`] binding for PostgreSQL, the classical relational engine,
//! via [`sqlx`].
//!
//! Unlike the replicated-store driver this one owns a real connection pool
//! (`sqlx::PgPool`); the gateway's own per-session pool still
//! bounds how many sessions may hold a driver at once, but each driver here
//! is free to multiplex several physical connections underneath.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row, TypeInfo};
use suresql_core::driver::{
    DbRecord, DriverError, DriverResult, EffectTally, Filter, InsertRecord, NodeStatus,
    ParamStatement, Queued, SchemaInfo, SqlDriver,
};
use suresql_core::sql_compile::{compile_insert, compile_tail, compile_where};
use tokio_util::sync::CancellationToken;

/// Connection parameters for a PostgreSQL node, constructed by the driver
/// factory from configuration.
#[derive(Clone, Debug)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl: bool,
    pub max_connections: u32,
    pub connect_timeout: StdDuration,
}

impl PostgresConfig {
    pub fn connection_string(&self) -> String {
        let sslmode = if self.ssl { "require" } else { "disable" };
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.database, sslmode
        )
    }
}

/// Names of the bookkeeping tables the gateway keeps alongside tenant data.
pub const USERS_TABLE: &str = "_users";
pub const TOKENS_TABLE: &str = "_tokens";
pub const CONFIGS_TABLE: &str = "_configs";
pub const SETTINGS_TABLE: &str = "_settings";

const CREATE_USERS: &str = "CREATE TABLE IF NOT EXISTS _users (
    id BIGSERIAL PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const CREATE_TOKENS: &str = "CREATE TABLE IF NOT EXISTS _tokens (
    access_token TEXT PRIMARY KEY,
    refresh_token TEXT NOT NULL UNIQUE,
    user_id BIGINT NOT NULL,
    username TEXT NOT NULL,
    access_expires_at TIMESTAMPTZ NOT NULL,
    refresh_expires_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const CREATE_CONFIGS: &str = "CREATE TABLE IF NOT EXISTS _configs (
    label TEXT PRIMARY KEY,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    ssl BOOLEAN NOT NULL DEFAULT false,
    dbms_kind TEXT NOT NULL,
    mode TEXT NOT NULL,
    total_nodes INTEGER NOT NULL DEFAULT 1,
    this_node_index INTEGER NOT NULL DEFAULT 1,
    init_done BOOLEAN NOT NULL DEFAULT false,
    split_write BOOLEAN NOT NULL DEFAULT false,
    encryption_method TEXT,
    token_expiry_minutes INTEGER NOT NULL DEFAULT 1440,
    refresh_expiry_minutes INTEGER NOT NULL DEFAULT 2880,
    sweep_interval_secs INTEGER NOT NULL DEFAULT 300
)";

const CREATE_SETTINGS: &str = "CREATE TABLE IF NOT EXISTS _settings (
    category TEXT NOT NULL,
    key TEXT NOT NULL,
    data_type TEXT NOT NULL,
    text_value TEXT,
    int_value BIGINT,
    float_value DOUBLE PRECISION,
    PRIMARY KEY (category, key)
)";

#[derive(Debug)]
pub struct PostgresDriver {
    pool: PgPool,
}

impl PostgresDriver {
    pub async fn connect(config: &PostgresConfig) -> DriverResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.connection_string())
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the gateway's own bookkeeping tables if they are absent.
    /// Tenant tables are never created by the gateway.
    pub async fn ensure_schema(&self, cancel: &CancellationToken) -> DriverResult<()> {
        for ddl in [CREATE_USERS, CREATE_TOKENS, CREATE_CONFIGS, CREATE_SETTINGS] {
            self.exec_one_sql(ddl, cancel).await?;
        }
        Ok(())
    }
}

fn dollar_placeholder(n: usize) -> String {
    format!("${n}")
}

/// Decodes one column of a [`PgRow`] into a JSON value without knowing its
/// static Rust type ahead of time, matching on the column's reported
/// Postgres type name. Unrecognized types fall back to their text
/// representation rather than failing the whole row.
fn column_to_json(row: &PgRow, idx: usize) -> Value {
    let column = row.column(idx);
    let type_name = column.type_info().name();
    match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "INT2" | "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::from(v))
            .unwrap_or(Value::Null),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::from(v as f64))
            .unwrap_or(Value::Null),
        "FLOAT8" | "NUMERIC" => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" | "TIMESTAMP" => row
            .try_get::<Option<time::OffsetDateTime>, _>(idx)
            .ok()
            .flatten()
            .and_then(|t| t.format(&time::format_description::well_known::Rfc3339).ok())
            .map(Value::String)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn row_to_record(row: &PgRow) -> DbRecord {
    let mut record: DbRecord = HashMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        record.insert(column.name().to_string(), column_to_json(row, idx));
    }
    record
}

/// Binds a JSON value onto a query, dispatching on its runtime shape since
/// the gateway never knows a parameter's static Postgres type ahead of time.
fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.clone()),
    }
}

async fn run_query(
    pool: &PgPool,
    statement: &ParamStatement,
    cancel: &CancellationToken,
) -> DriverResult<Vec<DbRecord>> {
    let mut query = sqlx::query(&statement.query);
    for value in &statement.values {
        query = bind_value(query, value);
    }
    let rows = tokio::select! {
        _ = cancel.cancelled() => return Err(DriverError::Cancelled),
        result = query.fetch_all(pool) => result.map_err(|e| DriverError::Other(e.to_string()))?,
    };
    Ok(rows.iter().map(row_to_record).collect())
}

async fn run_exec(
    pool: &PgPool,
    statement: &ParamStatement,
    cancel: &CancellationToken,
) -> DriverResult<EffectTally> {
    let mut query = sqlx::query(&statement.query);
    for value in &statement.values {
        query = bind_value(query, value);
    }
    let outcome = tokio::select! {
        _ = cancel.cancelled() => return Err(DriverError::Cancelled),
        result = query.execute(pool) => result,
    };
    match outcome {
        Ok(done) => Ok(EffectTally {
            rows_affected: done.rows_affected(),
            last_insert_id: None,
            error: None,
        }),
        Err(e) => Ok(EffectTally {
            rows_affected: 0,
            last_insert_id: None,
            error: Some(e.to_string()),
        }),
    }
}

#[async_trait]
impl SqlDriver for PostgresDriver {
    fn driver_id(&self) -> &'static str {
        "postgresql"
    }

    async fn status(&self, cancel: &CancellationToken) -> DriverResult<NodeStatus> {
        let statement = ParamStatement {
            query: "SELECT version()".to_string(),
            values: vec![],
        };
        let connected = run_query(&self.pool, &statement, cancel).await.is_ok();
        Ok(NodeStatus {
            driver_id: self.driver_id().to_string(),
            size: 1,
            leader: true,
            peers: vec![],
            node_id: "postgresql".to_string(),
            connected,
        })
    }

    async fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn select_one(&self, table: &str, cancel: &CancellationToken) -> DriverResult<DbRecord> {
        let sql = format!("SELECT * FROM {table} LIMIT 1");
        let rows = self.select_one_sql(&sql, cancel).await?;
        rows.into_iter().next().ok_or(DriverError::NoRows)
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
        let mut counter = 0usize;
        let (where_clause, values) = compile_where(condition, &mut |_| {
            counter += 1;
            dollar_placeholder(counter)
        });
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
        run_query(&self.pool, &ParamStatement { query: sql, values }, cancel).await
    }

    async fn select_one_sql(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<DbRecord>> {
        let statement = ParamStatement {
            query: sql.to_string(),
            values: vec![],
        };
        run_query(&self.pool, &statement, cancel).await
    }

    async fn select_only_one_sql(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> DriverResult<DbRecord> {
        let rows = self.select_one_sql(sql, cancel).await?;
        rows.into_iter().next().ok_or(DriverError::NoRows)
    }

    async fn select_many_sql(
        &self,
        statements: &[String],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<Vec<DbRecord>>> {
        let mut out = Vec::with_capacity(statements.len());
        for sql in statements {
            out.push(self.select_one_sql(sql, cancel).await?);
        }
        Ok(out)
    }

    async fn select_one_sql_parameterized(
        &self,
        statement: &ParamStatement,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<DbRecord>> {
        run_query(&self.pool, statement, cancel).await
    }

    async fn select_only_one_sql_parameterized(
        &self,
        statement: &ParamStatement,
        cancel: &CancellationToken,
    ) -> DriverResult<DbRecord> {
        let rows = run_query(&self.pool, statement, cancel).await?;
        rows.into_iter().next().ok_or(DriverError::NoRows)
    }

    async fn select_many_sql_parameterized(
        &self,
        statements: &[ParamStatement],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<Vec<DbRecord>>> {
        let mut out = Vec::with_capacity(statements.len());
        for statement in statements {
            out.push(run_query(&self.pool, statement, cancel).await?);
        }
        Ok(out)
    }

    async fn exec_one_sql(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> DriverResult<EffectTally> {
        let statement = ParamStatement {
            query: sql.to_string(),
            values: vec![],
        };
        run_exec(&self.pool, &statement, cancel).await
    }

    async fn exec_many_sql(
        &self,
        statements: &[String],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>> {
        let mut out = Vec::with_capacity(statements.len());
        for sql in statements {
            out.push(self.exec_one_sql(sql, cancel).await?);
        }
        Ok(out)
    }

    async fn exec_one_sql_parameterized(
        &self,
        statement: &ParamStatement,
        cancel: &CancellationToken,
    ) -> DriverResult<EffectTally> {
        run_exec(&self.pool, statement, cancel).await
    }

    async fn exec_many_sql_parameterized(
        &self,
        statements: &[ParamStatement],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>> {
        let mut out = Vec::with_capacity(statements.len());
        for statement in statements {
            out.push(run_exec(&self.pool, statement, cancel).await?);
        }
        Ok(out)
    }

    async fn insert_one_db_record(
        &self,
        record: &InsertRecord,
        _queued: Queued,
        cancel: &CancellationToken,
    ) -> DriverResult<EffectTally> {
        let mut counter = 0usize;
        let (sql, values) = compile_insert(record, &mut |_| {
            counter += 1;
            dollar_placeholder(counter)
        });
        run_exec(&self.pool, &ParamStatement { query: sql, values }, cancel).await
    }

    async fn insert_many_db_records_same_table(
        &self,
        records: &[InsertRecord],
        queued: Queued,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(self.insert_one_db_record(record, queued, cancel).await?);
        }
        Ok(out)
    }

    async fn insert_many_db_records(
        &self,
        records: &[InsertRecord],
        queued: Queued,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>> {
        self.insert_many_db_records_same_table(records, queued, cancel)
            .await
    }

    async fn get_schema(&self, cancel: &CancellationToken) -> DriverResult<SchemaInfo> {
        let table_rows = self
            .select_one_sql(
                "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'",
                cancel,
            )
            .await?;
        let mut tables = HashMap::new();
        for row in table_rows {
            if let Some(Value::String(name)) = row.get("table_name") {
                let statement = ParamStatement {
                    query: "SELECT column_name FROM information_schema.columns \
                            WHERE table_schema = 'public' AND table_name = $1 \
                            ORDER BY ordinal_position"
                        .to_string(),
                    values: vec![Value::String(name.clone())],
                };
                let columns = run_query(&self.pool, &statement, cancel)
                    .await
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|r| r.get("column_name").and_then(Value::as_str).map(str::to_string))
                    .collect();
                tables.insert(name.clone(), columns);
            }
        }
        Ok(SchemaInfo { tables })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
