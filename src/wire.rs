//! JSON wire envelopes for the gateway's request/response API.
//!
//! The HTTP transport itself (routing, middleware, CORS, basic-auth
//! wrapping) is an external collaborator; only the shapes exchanged across
//! that boundary live here. For reference, the contractual endpoint table:
//!
//! | Method+Path | Auth | Shape |
//! |---|---|---|
//! | POST /db/connect | API key + client id | [`AuthenticateRequest`] → [`TokenResponse`] |
//! | POST /db/refresh | API key + client id | [`RefreshRequest`] → [`TokenResponse`] |
//! | GET  /db/api/status | Bearer | — → `NodeStatus` |
//! | POST /db/api/sql | Bearer | [`SqlRequest`] → [`SqlResponse`] |
//! | POST /db/api/query | Bearer | [`QueryRequest`] → [`QueryResponse`] |
//! | POST /db/api/querysql | Bearer | [`SqlRequest`] → [`QueryResponseSql`] |
//! | POST /db/api/insert | Bearer | [`InsertRequest`] → [`SqlResponse`] |
//! | GET  /monitoring/metrics | Basic | — → `MetricsSnapshot` |
//! | GET  /monitoring/alerts?level=&limit= | Basic | — → `Alert[]` |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use suresql_core::driver::{EffectTally, Filter, InsertRecord};
use suresql_core::DbRecord;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParamSql {
    pub query: String,
    #[serde(default)]
    pub values: Vec<Value>,
}

/// Shared by `/db/api/sql` and `/db/api/querysql`; the endpoint determines
/// whether the statements are routed through the effect-producing or
/// row-returning half of the driver contract.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SqlRequest {
    #[serde(default)]
    pub statements: Vec<String>,
    #[serde(default)]
    pub param_sql: Vec<ParamSql>,
    #[serde(default)]
    pub single_row: bool,
}

pub type QuerySqlRequest = SqlRequest;

#[derive(Clone, Debug, Deserialize)]
pub struct QueryRequest {
    pub table: String,
    #[serde(default)]
    pub condition: Option<Filter>,
    #[serde(default)]
    pub single_row: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InsertRequest {
    pub records: Vec<InsertRecord>,
    #[serde(default)]
    pub queue: bool,
    #[serde(default)]
    pub same_table: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct SqlResponse {
    pub results: Vec<EffectTally>,
    pub execution_time: f64,
    pub rows_affected: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueryResponse {
    pub records: Vec<DbRecord>,
    pub execution_time: f64,
    pub count: usize,
}

pub type QueryResponseSql = Vec<QueryResponse>;

#[derive(Clone, Debug, Deserialize)]
pub struct AuthenticateRequest {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
}

impl From<crate::session::IssuedToken> for TokenResponse {
    fn from(issued: crate::session::IssuedToken) -> Self {
        Self {
            access_token: issued.access_token,
            refresh_token: issued.refresh_token,
            access_expires_at: issued.access_expires_at,
            refresh_expires_at: issued.refresh_expires_at,
        }
    }
}

/// The standard `{status, message, data}` wrapper every response is carried
/// in; `status` is an HTTP-style code propagated unchanged in the transport
/// status line.
#[derive(Clone, Debug, Serialize)]
pub struct Envelope<T> {
    pub status: u16,
    pub message: String,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: 200,
            message: "ok".to_string(),
            data,
        }
    }
}
