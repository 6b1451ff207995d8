//! sqlx-backed Postgres driver.

use super::driver::{Driver, DriverConnection, DriverPool, TransactionOptions};
use super::params::bind_all;
use super::registry::PoolRegistry;
use super::types::RowToJson;
use crate::config::{ConnectTarget, PoolOptions};
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};
use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Connection, PgConnection, PgPool, Postgres, Row as _};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Per-connection callback run by the driver.
pub type ConnectionHook = Arc<
    dyn for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<(), sqlx::Error>> + Send + Sync,
>;

/// Longest statement prefix quoted in error context.
const SQL_CONTEXT_LEN: usize = 80;

/// Postgres driver on top of [`PgPool`].
///
/// The optional hooks are handed to sqlx untouched: `init` runs once on each
/// new connection, `setup` runs every time a connection is acquired.
#[derive(Clone, Default)]
pub struct PgDriver {
    init: Option<ConnectionHook>,
    setup: Option<ConnectionHook>,
}

impl std::fmt::Debug for PgDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDriver")
            .field("init", &self.init.is_some())
            .field("setup", &self.setup.is_some())
            .finish()
    }
}

impl PgDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_init<F>(mut self, hook: F) -> Self
    where
        F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<(), sqlx::Error>>
            + Send
            + Sync
            + 'static,
    {
        self.init = Some(Arc::new(hook));
        self
    }

    pub fn with_setup<F>(mut self, hook: F) -> Self
    where
        F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<(), sqlx::Error>>
            + Send
            + Sync
            + 'static,
    {
        self.setup = Some(Arc::new(hook));
        self
    }

    /// Open one connection outside any pool. The init hook runs on it; the
    /// setup hook does not, since nothing is ever acquired.
    pub async fn connect_single(&self, target: impl Into<ConnectTarget>) -> DbResult<PgClient> {
        let target = target.into();
        let context = || format!("connecting to {}", target.masked());
        let mut conn = PgConnection::connect(&target.dsn())
            .await
            .map_err(|e| DbError::from(e).with_context(context()))?;
        if let Some(init) = &self.init {
            init(&mut conn)
                .await
                .map_err(|e| DbError::from(e).with_context(context()))?;
        }
        debug!(dsn = %target.masked(), "Opened single connection");
        Ok(PgClient { conn })
    }
}

impl Driver for PgDriver {
    type Connection = PgSession;
    type Pool = PgDriverPool;

    async fn connect(
        &self,
        target: &ConnectTarget,
        options: &PoolOptions,
    ) -> DbResult<PgDriverPool> {
        let mut pool_options = PgPoolOptions::new()
            .min_connections(options.min_size_or_default())
            .max_connections(options.max_size_or_default())
            .acquire_timeout(options.acquire_timeout_or_default())
            .idle_timeout(Some(options.max_idle_lifetime_or_default()))
            .test_before_acquire(options.test_before_acquire_or_default());

        if let Some(init) = self.init.clone() {
            pool_options = pool_options.after_connect(move |conn, _meta| init(conn));
        }
        if let Some(setup) = self.setup.clone() {
            pool_options = pool_options.before_acquire(move |conn, _meta| {
                let hook = setup(conn);
                Box::pin(async move {
                    hook.await?;
                    Ok(true)
                })
            });
        }

        // sqlx recycles on idle lifetime only
        debug!(
            max_queries = options.max_queries_or_default(),
            "max_queries has no sqlx counterpart; not applied"
        );

        let pool = pool_options.connect(&target.dsn()).await.map_err(|e| {
            DbError::from(e).with_context(format!("connecting to {}", target.masked()))
        })?;

        info!(
            dsn = %target.masked(),
            min_size = options.min_size_or_default(),
            max_size = options.max_size_or_default(),
            "Connected to Postgres"
        );
        Ok(PgDriverPool { pool })
    }
}

/// A live [`PgPool`].
#[derive(Debug, Clone)]
pub struct PgDriverPool {
    pool: PgPool,
}

impl PgDriverPool {
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

impl DriverPool for PgDriverPool {
    type Connection = PgSession;

    async fn acquire(&self) -> DbResult<PgSession> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbError::from(e).with_context("acquiring a connection"))?;
        Ok(PgSession {
            conn,
            in_transaction: false,
        })
    }

    async fn release(&self, mut session: PgSession) {
        if session.in_transaction {
            if let Err(e) = session.rollback().await {
                warn!(error = %e, "Discarding connection left inside a transaction");
                drop(session.conn.detach());
                return;
            }
        }
        // Dropping a PoolConnection hands it back to sqlx
        drop(session);
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// One pooled Postgres connection.
#[derive(Debug)]
pub struct PgSession {
    conn: PoolConnection<Postgres>,
    /// Set between BEGIN and COMMIT/ROLLBACK
    in_transaction: bool,
}

pub(crate) fn statement_context(sql: &str) -> String {
    let sql = sql.trim();
    match sql.char_indices().nth(SQL_CONTEXT_LEN) {
        Some((cut, _)) => format!("executing `{}...`", &sql[..cut]),
        None => format!("executing `{}`", sql),
    }
}

async fn run_execute(conn: &mut PgConnection, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
    let result = bind_all(sql, params)
        .execute(&mut *conn)
        .await
        .map_err(|e| DbError::from(e).with_context(statement_context(sql)))?;
    Ok(result.rows_affected())
}

async fn run_fetch(conn: &mut PgConnection, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
    let rows = bind_all(sql, params)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DbError::from(e).with_context(statement_context(sql)))?;
    Ok(rows.iter().map(RowToJson::to_json_map).collect())
}

async fn run_fetch_first(
    conn: &mut PgConnection,
    sql: &str,
    params: &[SqlValue],
) -> DbResult<Option<PgRow>> {
    bind_all(sql, params)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| DbError::from(e).with_context(statement_context(sql)))
}

async fn run_fetch_value(
    conn: &mut PgConnection,
    sql: &str,
    params: &[SqlValue],
    column: usize,
) -> DbResult<Option<JsonValue>> {
    let Some(row) = run_fetch_first(conn, sql, params).await? else {
        return Ok(None);
    };
    let width = row.columns().len();
    if column >= width {
        return Err(DbError::driver(
            statement_context(sql),
            format!("column index {} out of range for {} column(s)", column, width),
        ));
    }
    Ok(Some(row.column_json(column)))
}

/// BEGIN, COMMIT or ROLLBACK.
async fn run_control(conn: &mut PgConnection, command: &str) -> DbResult<()> {
    sqlx::query(command)
        .execute(&mut *conn)
        .await
        .map_err(|e| DbError::from(e).with_context(statement_context(command)))?;
    Ok(())
}

impl DriverConnection for PgSession {
    async fn execute<'a>(&'a mut self, sql: &'a str, params: &'a [SqlValue]) -> DbResult<u64> {
        run_execute(&mut self.conn, sql, params).await
    }

    async fn fetch<'a>(&'a mut self, sql: &'a str, params: &'a [SqlValue]) -> DbResult<Vec<Row>> {
        run_fetch(&mut self.conn, sql, params).await
    }

    async fn fetch_one<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> DbResult<Option<Row>> {
        let row = run_fetch_first(&mut self.conn, sql, params).await?;
        Ok(row.as_ref().map(RowToJson::to_json_map))
    }

    async fn fetch_value<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
        column: usize,
    ) -> DbResult<Option<JsonValue>> {
        run_fetch_value(&mut self.conn, sql, params, column).await
    }

    async fn begin<'a>(&'a mut self, options: &'a TransactionOptions) -> DbResult<()> {
        run_control(&mut self.conn, &options.begin_statement()).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        // A failed COMMIT still ends the transaction server-side
        self.in_transaction = false;
        run_control(&mut self.conn, "COMMIT").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let result = run_control(&mut self.conn, "ROLLBACK").await;
        if result.is_ok() {
            self.in_transaction = false;
        }
        result
    }
}

/// A single Postgres connection outside any pool.
///
/// For one-off scripts and maintenance work; everything else should go
/// through a [`Pool`](super::Pool).
#[derive(Debug)]
pub struct PgClient {
    conn: PgConnection,
}

impl PgClient {
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        run_execute(&mut self.conn, sql, params).await
    }

    pub async fn fetch(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        run_fetch(&mut self.conn, sql, params).await
    }

    pub async fn fetch_one(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Option<Row>> {
        let row = run_fetch_first(&mut self.conn, sql, params).await?;
        Ok(row.as_ref().map(RowToJson::to_json_map))
    }

    pub async fn fetch_value(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        column: usize,
    ) -> DbResult<Option<JsonValue>> {
        run_fetch_value(&mut self.conn, sql, params, column).await
    }

    /// Send Terminate and wait for the server to close the socket.
    pub async fn close(self) -> DbResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DbError::from(e).with_context("closing connection"))
    }
}

/// Process-wide registry of Postgres pools.
pub fn global_registry() -> &'static PoolRegistry<PgDriver> {
    static REGISTRY: OnceLock<PoolRegistry<PgDriver>> = OnceLock::new();
    REGISTRY.get_or_init(PoolRegistry::new)
}
