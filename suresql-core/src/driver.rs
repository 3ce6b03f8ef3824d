//! The abstract database driver contract.
//!
//! Any concrete SQL engine binding (the replicated embedded store, a
//! classical relational server, ...) implements [`SqlDriver`]. The
//! dispatcher (in the `suresql` crate) only ever talks to this trait object,
//! never to a concrete engine — the same pluggable-backend shape as a
//! `SessionStore`, generalised from "save/load/delete" to a full SQL surface.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One row, keyed by column name. Intentionally untyped: the gateway is a
/// pass-through, not an ORM.
pub type DbRecord = HashMap<String, Value>;

/// Errors a driver may report. `NoRows` is not surfaced as a dispatcher
/// failure; `Cancelled` is distinct from `NoRows` so a
/// cancelled request is never mistaken for an empty result.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("no rows")]
    NoRows,

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// A single comparison or a nested composite predicate.
///
/// An empty filter (every field at its zero value, no nested filters) is
/// semantically "no filter" — see [`Filter::is_empty`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<FilterOperator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<Filter>,
    #[serde(default, rename = "order_by", skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<String>,
    #[serde(default, rename = "group_by", skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl Filter {
    /// True when every field carries its zero value: no leaf predicate, no
    /// nested predicates, no pagination/ordering. Such a filter is
    /// semantically equivalent to "no filter".
    pub fn is_empty(&self) -> bool {
        self.field.is_none()
            && self.operator.is_none()
            && self.value.is_none()
            && self.nested.is_empty()
            && self.order_by.is_empty()
            && self.group_by.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

/// A raw SQL statement paired with positional bind values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamStatement {
    pub query: String,
    #[serde(default)]
    pub values: Vec<Value>,
}

/// Per-statement result of a non-row operation (the "effect tally" of the
/// glossary).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EffectTally {
    pub rows_affected: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A record to insert, tagged with its target table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InsertRecord {
    #[serde(rename = "TableName")]
    pub table_name: String,
    #[serde(rename = "Data")]
    pub data: DbRecord,
}

/// Node-level status as reported by a driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeStatus {
    pub driver_id: String,
    pub size: usize,
    pub leader: bool,
    pub peers: Vec<String>,
    pub node_id: String,
    pub connected: bool,
}

/// A minimal schema description: table name to ordered column names.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: HashMap<String, Vec<String>>,
}

/// Whether a driver should request asynchronous commit when it supports one.
/// Correctness must never depend on this hint.
pub type Queued = bool;

/// The abstract database driver contract.
#[async_trait]
pub trait SqlDriver: Debug + Send + Sync {
    /// A stable identifier for the concrete engine bound to this driver
    /// instance (e.g. `"rqlite"`, `"postgresql"`); surfaced in
    /// [`NodeStatus::driver_id`].
    fn driver_id(&self) -> &'static str;

    async fn status(&self, cancel: &CancellationToken) -> DriverResult<NodeStatus>;

    async fn is_connected(&self) -> bool;

    async fn select_one(&self, table: &str, cancel: &CancellationToken) -> DriverResult<DbRecord>;

    async fn select_many(
        &self,
        table: &str,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<DbRecord>>;

    async fn select_one_with_condition(
        &self,
        table: &str,
        condition: &Filter,
        cancel: &CancellationToken,
    ) -> DriverResult<DbRecord>;

    async fn select_many_with_condition(
        &self,
        table: &str,
        condition: &Filter,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<DbRecord>>;

    async fn select_one_sql(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<DbRecord>>;

    async fn select_only_one_sql(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> DriverResult<DbRecord>;

    async fn select_many_sql(
        &self,
        statements: &[String],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<Vec<DbRecord>>>;

    async fn select_one_sql_parameterized(
        &self,
        statement: &ParamStatement,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<DbRecord>>;

    async fn select_only_one_sql_parameterized(
        &self,
        statement: &ParamStatement,
        cancel: &CancellationToken,
    ) -> DriverResult<DbRecord>;

    async fn select_many_sql_parameterized(
        &self,
        statements: &[ParamStatement],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<Vec<DbRecord>>>;

    async fn exec_one_sql(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> DriverResult<EffectTally>;

    async fn exec_many_sql(
        &self,
        statements: &[String],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>>;

    async fn exec_one_sql_parameterized(
        &self,
        statement: &ParamStatement,
        cancel: &CancellationToken,
    ) -> DriverResult<EffectTally>;

    async fn exec_many_sql_parameterized(
        &self,
        statements: &[ParamStatement],
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>>;

    async fn insert_one_db_record(
        &self,
        record: &InsertRecord,
        queued: Queued,
        cancel: &CancellationToken,
    ) -> DriverResult<EffectTally>;

    async fn insert_many_db_records_same_table(
        &self,
        records: &[InsertRecord],
        queued: Queued,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>>;

    async fn insert_many_db_records(
        &self,
        records: &[InsertRecord],
        queued: Queued,
        cancel: &CancellationToken,
    ) -> DriverResult<Vec<EffectTally>>;

    async fn get_schema(&self, cancel: &CancellationToken) -> DriverResult<SchemaInfo>;

    /// Best-effort close. Implementations must not panic on double-close.
    async fn close(&self);
}
