//! pgscope
//!
//! Pooled PostgreSQL/TimescaleDB execution with a schema-aware SQL
//! statement builder.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sql;

pub use config::{Config, ConnectTarget, ConnectionParams, PoolOptions};
pub use db::{Pool, PoolRegistry, PgDriver, RecordingDriver, Transaction};
pub use error::{DbError, DbResult};
pub use models::{Row, SchemaDescriptor, SqlValue};
pub use sql::{Statement, TablePlan};
