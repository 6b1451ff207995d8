//! Driver boundary consumed by [`Pool`](super::Pool).
//!
//! A [`Driver`] opens a [`DriverPool`]; the driver pool lends out
//! [`DriverConnection`]s. The pool layer never looks inside these types, it
//! only sequences calls to them.

use crate::config::{ConnectTarget, PoolOptions};
use crate::error::DbResult;
use crate::models::{Row, SqlValue};
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for starting a transaction. The default is a plain `BEGIN`, which
/// leaves isolation and access mode to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
    /// Only meaningful for `SERIALIZABLE READ ONLY` transactions.
    pub deferrable: bool,
}

impl TransactionOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn deferrable(mut self) -> Self {
        self.deferrable = true;
        self
    }

    /// The statement that opens the transaction, e.g.
    /// `BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY DEFERRABLE`.
    pub fn begin_statement(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TransactionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BEGIN")?;
        if let Some(level) = self.isolation {
            write!(f, " ISOLATION LEVEL {}", level.as_sql())?;
        }
        if self.read_only {
            f.write_str(" READ ONLY")?;
        }
        if self.deferrable {
            f.write_str(" DEFERRABLE")?;
        }
        Ok(())
    }
}

/// Opens driver pools.
pub trait Driver: Send + Sync + 'static {
    type Connection: DriverConnection;
    type Pool: DriverPool<Connection = Self::Connection>;

    /// Create a driver pool with at least `options.min_size` connections.
    fn connect(
        &self,
        target: &ConnectTarget,
        options: &PoolOptions,
    ) -> impl Future<Output = DbResult<Self::Pool>> + Send;
}

/// A live driver-side pool, exclusively owned by one [`Pool`](super::Pool).
pub trait DriverPool: Send + Sync + 'static {
    type Connection: DriverConnection;

    fn acquire(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// Return a connection. Called exactly once per successful `acquire`.
    fn release(&self, connection: Self::Connection) -> impl Future<Output = ()> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// One database session lent out by a [`DriverPool`].
pub trait DriverConnection: Send + 'static {
    /// Run a statement and return the number of rows affected.
    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> impl Future<Output = DbResult<u64>> + Send + 'a;

    fn fetch<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> impl Future<Output = DbResult<Vec<Row>>> + Send + 'a;

    /// First row, if any.
    fn fetch_one<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> impl Future<Output = DbResult<Option<Row>>> + Send + 'a;

    /// Column `column` (zero-based) of the first row. `None` when there is no
    /// row; a column past the end of the row is an error.
    fn fetch_value<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
        column: usize,
    ) -> impl Future<Output = DbResult<Option<JsonValue>>> + Send + 'a;

    fn begin<'a>(
        &'a mut self,
        options: &'a TransactionOptions,
    ) -> impl Future<Output = DbResult<()>> + Send + 'a;

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send + '_;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send + '_;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_render_plain_begin() {
        assert_eq!(TransactionOptions::default().begin_statement(), "BEGIN");
    }

    #[test]
    fn test_options_render_in_order() {
        let options = TransactionOptions::default()
            .deferrable()
            .read_only()
            .isolation(IsolationLevel::Serializable);
        assert_eq!(
            options.begin_statement(),
            "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY DEFERRABLE"
        );
        assert_eq!(
            TransactionOptions::default()
                .isolation(IsolationLevel::RepeatableRead)
                .begin_statement(),
            "BEGIN ISOLATION LEVEL REPEATABLE READ"
        );
    }
}
