//! Core types and traits for the SureSQL gateway.
//!
//! This crate holds everything that is shared by the facade crate and every
//! driver crate: the TTL map, the abstract [`driver::SqlDriver`] contract,
//! the data model, the validator, and the layered configuration resolver.
//! It deliberately carries no transport or engine-specific dependencies.

pub mod config;
pub mod driver;
pub mod error;
pub mod model;
pub mod sql_compile;
pub mod ttl_map;
pub mod validate;

pub use driver::{DbRecord, DriverError, DriverResult, SqlDriver};
pub use error::{ErrorKind, SureSqlError};
