//! Error kinds surfaced at the gateway boundary.
//!
//! `no-rows` is deliberately absent: it is not an error, it is converted to
//! an empty result by the dispatcher before it ever reaches this type.

use thiserror::Error;

/// The gateway's single error type. Every variant maps to exactly one
/// [`ErrorKind`] and one HTTP status code.
#[derive(Error, Debug)]
pub enum SureSqlError {
    /// Malformed input (400).
    #[error("validation error: {0}")]
    Validation(String),

    /// No bearer/basic credential presented (401).
    #[error("missing authentication token")]
    AuthMissingToken,

    /// Bearer/basic credential does not resolve to a live session (401).
    #[error("invalid authentication token")]
    AuthInvalidToken,

    /// Credential resolved but its lifetime has elapsed (401).
    #[error("authentication expired")]
    AuthExpired,

    /// Username/password pair did not match (401).
    #[error("invalid credentials")]
    AuthInvalidCredentials,

    /// Authenticated, but the requested table is off-limits (403).
    #[error("access to table {0:?} is not permitted")]
    Authorisation(String),

    /// `_users` lookup on update/delete found nothing (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// User-already-exists on create (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Pool admission failed (503 normally; 406 is preserved only for the
    /// legacy `/db/connect` response path — see `status_code_connect`).
    #[error("pool exhausted")]
    PoolExhausted,

    /// Any operational failure reported by a driver, annotated with the
    /// dispatcher operation that triggered it (500).
    #[error("driver error in {op}: {source}")]
    DriverError {
        op: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Anything else (500).
    #[error("internal error: {0}")]
    Internal(String),
}

/// The error-kind taxonomy, independent of the detail string.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Validation,
    AuthMissingToken,
    AuthInvalidToken,
    AuthExpired,
    AuthInvalidCredentials,
    Authorisation,
    NotFound,
    Conflict,
    PoolExhausted,
    DriverError,
    Internal,
}

impl SureSqlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SureSqlError::Validation(_) => ErrorKind::Validation,
            SureSqlError::AuthMissingToken => ErrorKind::AuthMissingToken,
            SureSqlError::AuthInvalidToken => ErrorKind::AuthInvalidToken,
            SureSqlError::AuthExpired => ErrorKind::AuthExpired,
            SureSqlError::AuthInvalidCredentials => ErrorKind::AuthInvalidCredentials,
            SureSqlError::Authorisation(_) => ErrorKind::Authorisation,
            SureSqlError::NotFound(_) => ErrorKind::NotFound,
            SureSqlError::Conflict(_) => ErrorKind::Conflict,
            SureSqlError::PoolExhausted => ErrorKind::PoolExhausted,
            SureSqlError::DriverError { .. } => ErrorKind::DriverError,
            SureSqlError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The HTTP-style status code an outer transport should use, with the
    /// `/db/refresh` compatibility mapping for pool exhaustion (503).
    pub fn status_code_refresh(&self) -> u16 {
        self.status_code_default()
    }

    /// The HTTP-style status code for the `/db/connect` path, which
    /// historically returned 406 (not 503) on pool exhaustion. Implementations
    /// may normalise this to 503; we preserve the distinction here.
    pub fn status_code_connect(&self) -> u16 {
        match self {
            SureSqlError::PoolExhausted => 406,
            _ => self.status_code_default(),
        }
    }

    fn status_code_default(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::AuthMissingToken
            | ErrorKind::AuthInvalidToken
            | ErrorKind::AuthExpired
            | ErrorKind::AuthInvalidCredentials => 401,
            ErrorKind::Authorisation => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::PoolExhausted => 503,
            ErrorKind::DriverError | ErrorKind::Internal => 500,
        }
    }

    /// Annotate a driver-reported error with the dispatcher operation that
    /// triggered it.
    pub fn from_driver(op: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        SureSqlError::DriverError {
            op,
            source: Box::new(source),
        }
    }

    /// A message safe to hand back to a client: never reveals the driver's
    /// internal error chain.
    pub fn public_message(&self) -> String {
        match self {
            SureSqlError::DriverError { op, .. } => format!("operation {op} failed"),
            SureSqlError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SureSqlError>;
