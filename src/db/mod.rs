//! Pooled execution layer.
//!
//! - [`Pool`]: lifecycle, connection guards and transactions
//! - [`PoolRegistry`]: named pools and the current-pool overlay
//! - [`driver`]: the boundary a database backend implements
//! - [`PgDriver`]: the sqlx Postgres backend
//! - [`RecordingDriver`]: an in-process backend for dry runs and tests

pub mod driver;
pub mod params;
pub mod pool;
pub mod postgres;
pub mod recording;
pub mod registry;
pub mod types;

pub use driver::{Driver, DriverConnection, DriverPool, IsolationLevel, TransactionOptions};
pub use pool::{Pool, PoolBuilder, PoolState, PooledConnection, Transaction};
pub use postgres::{
    ConnectionHook, PgClient, PgDriver, PgDriverPool, PgSession, global_registry,
};
pub use recording::{RecordedStatement, RecordingDriver};
pub use registry::{CurrentPoolGuard, PoolRegistry};
