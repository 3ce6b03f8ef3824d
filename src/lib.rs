//! SureSQL: a multi-tenant SQL gateway.
//!
//! A client authenticates against a node ([`node::NodeState`]) to receive a
//! short-lived access/refresh token pair ([`session`]), which the node binds
//! to a leased driver instance in its connection pool ([`pool`]). Ongoing
//! requests resolve their access token back to that driver and have their
//! SQL routed by shape ([`dispatcher`]) onto the abstract
//! [`suresql_core::driver::SqlDriver`] contract. A background
//! [`cleanup`] supervisor reconciles the pool against token liveness;
//! [`metrics`] and [`alert`] give the node observability into its own
//! saturation and failure rates.
//!
//! The wire shapes exchanged with a front-end transport live in [`wire`];
//! transport plumbing itself (HTTP routing, TLS, CORS) is an external
//! collaborator this crate does not implement.

pub mod alert;
pub mod cleanup;
pub mod dispatcher;
pub mod factory;
pub mod metrics;
pub mod node;
pub mod pool;
pub mod session;
pub mod token_store;
pub mod users;
pub mod wire;

pub use node::NodeState;
pub use session::{Credentials, IssuedToken, PasswordHasher};
pub use suresql_core::{DbRecord, DriverError, DriverResult, SqlDriver, SureSqlError};
