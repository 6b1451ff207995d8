//! Pool lifecycle, connection guards and transactions.
//!
//! A [`Pool`] moves through `Uninitialized -> Initializing -> Ready -> Closed`.
//! Only the first transition is serialized; steady-state acquire/release
//! calls go straight to the driver pool.
//!
//! # Release guarantees
//!
//! Every successful [`Pool::acquire`] yields a [`PooledConnection`] that is
//! returned to the driver exactly once:
//! - Use [`PooledConnection::release`] (or [`Pool::release`]) on the normal path
//! - Dropping an unreleased guard (error, panic, cancellation) spawns the
//!   release and logs a warning
//! - Release consumes the guard, so a second release cannot be expressed
//!
//! # Timeouts
//!
//! The `*_timeout` and [`fetch_value_at`](Pool::fetch_value_at) variants bound
//! the statement itself, not the wait for a connection (that is
//! `PoolOptions::acquire_timeout`). A timed-out statement surfaces as a
//! retryable [`DbError::Driver`]; the connection is still released.

use super::driver::{Driver, DriverConnection, DriverPool, TransactionOptions};
use super::postgres::statement_context;
use super::registry::{PoolRegistry, WeakRegistry, with_current_pool};
use crate::config::{ConnectTarget, DEFAULT_POOL_NAME, PoolOptions};
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};
use crate::sql::Statement;
use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observable lifecycle state of a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum State<P> {
    Uninitialized,
    Initializing,
    Ready(Arc<P>),
    Closed,
}

impl<P> State<P> {
    fn kind(&self) -> PoolState {
        match self {
            Self::Uninitialized => PoolState::Uninitialized,
            Self::Initializing => PoolState::Initializing,
            Self::Ready(_) => PoolState::Ready,
            Self::Closed => PoolState::Closed,
        }
    }
}

struct PoolInner<D: Driver> {
    name: String,
    id: Uuid,
    target: ConnectTarget,
    options: PoolOptions,
    driver: D,
    state: RwLock<State<D::Pool>>,
    /// Serializes initialize/close; never held by acquire or release.
    init_lock: tokio::sync::Mutex<()>,
    registry: Option<WeakRegistry<D>>,
}

impl<D: Driver> PoolInner<D> {
    fn set_state(&self, state: State<D::Pool>) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Puts the pool back to `Uninitialized` if initialization does not finish,
/// including when the initializing future is dropped mid-connect.
struct InitGuard<'a, D: Driver> {
    inner: &'a PoolInner<D>,
    armed: bool,
}

impl<D: Driver> Drop for InitGuard<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.set_state(State::Uninitialized);
        }
    }
}

/// Await `fut`, giving up after `timeout` if one is set.
async fn timed<T>(
    timeout: Option<Duration>,
    sql: &str,
    fut: impl Future<Output = DbResult<T>>,
) -> DbResult<T> {
    let Some(limit) = timeout else {
        return fut.await;
    };
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_ms = limit.as_millis() as u64, "Statement timed out");
            Err(DbError::timeout(statement_context(sql), limit))
        }
    }
}

/// A named, lazily-connected pool of driver connections.
///
/// Cloning is cheap and yields another handle to the same pool.
pub struct Pool<D: Driver> {
    inner: Arc<PoolInner<D>>,
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Two handles are equal when they refer to the same pool instance.
impl<D: Driver> PartialEq for Pool<D> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<D: Driver> Eq for Pool<D> {}

impl<D: Driver> fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("target", &self.inner.target)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Pool`].
pub struct PoolBuilder<D: Driver> {
    driver: D,
    target: ConnectTarget,
    name: String,
    options: PoolOptions,
    registry: Option<PoolRegistry<D>>,
}

impl<D: Driver> PoolBuilder<D> {
    /// Registry key (default: `"default"`).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn options(mut self, options: PoolOptions) -> Self {
        self.options = options;
        self
    }

    /// Register the pool here on build and unregister it on close.
    pub fn registry(mut self, registry: &PoolRegistry<D>) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    pub fn build(self) -> DbResult<Pool<D>> {
        if self.name.trim().is_empty() {
            return Err(DbError::validation("name", "pool name must not be empty"));
        }
        self.options
            .validate()
            .map_err(|message| DbError::validation("pool_options", message))?;

        let pool = Pool {
            inner: Arc::new(PoolInner {
                name: self.name,
                id: Uuid::new_v4(),
                target: self.target,
                options: self.options,
                driver: self.driver,
                state: RwLock::new(State::Uninitialized),
                init_lock: tokio::sync::Mutex::new(()),
                registry: self.registry.as_ref().map(PoolRegistry::downgrade),
            }),
        };
        if let Some(registry) = &self.registry {
            registry.register(pool.clone());
        }
        Ok(pool)
    }
}

impl<D: Driver> Pool<D> {
    pub fn builder(driver: D, target: impl Into<ConnectTarget>) -> PoolBuilder<D> {
        PoolBuilder {
            driver,
            target: target.into(),
            name: DEFAULT_POOL_NAME.to_string(),
            options: PoolOptions::default(),
            registry: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Unique per instance; distinguishes pools that share a name.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    /// Connection target with any password masked.
    pub fn masked_target(&self) -> String {
        self.inner.target.masked()
    }

    pub fn state(&self) -> PoolState {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .kind()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == PoolState::Ready
    }

    pub fn is_closed(&self) -> bool {
        self.state() == PoolState::Closed
    }

    fn registry(&self) -> Option<PoolRegistry<D>> {
        self.inner.registry.as_ref().and_then(WeakRegistry::upgrade)
    }

    fn state_error(&self, state: PoolState, message: &str) -> DbError {
        DbError::pool_state(&self.inner.name, state.as_str(), message)
    }

    fn ready_pool(&self) -> DbResult<Arc<D::Pool>> {
        match &*self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
        {
            State::Ready(pool) => Ok(Arc::clone(pool)),
            State::Closed => Err(self.state_error(
                PoolState::Closed,
                "pool has been closed; build a new pool",
            )),
            other => Err(self.state_error(
                other.kind(),
                "not initialized; call initialize() before acquiring connections",
            )),
        }
    }

    /// Create the driver pool. Idempotent; concurrent callers wait for the
    /// first one and a failed attempt leaves the pool `Uninitialized`.
    pub async fn initialize(&self) -> DbResult<()> {
        if self.is_ready() {
            return Ok(());
        }

        let _lock = self.inner.init_lock.lock().await;
        match self.state() {
            PoolState::Ready => return Ok(()),
            PoolState::Closed => {
                return Err(self.state_error(
                    PoolState::Closed,
                    "pool has been closed; build a new pool",
                ));
            }
            PoolState::Uninitialized | PoolState::Initializing => {}
        }

        self.inner.set_state(State::Initializing);
        let mut guard = InitGuard {
            inner: &self.inner,
            armed: true,
        };

        info!(
            pool = %self.inner.name,
            dsn = %self.masked_target(),
            "Initializing pool"
        );
        match self
            .inner
            .driver
            .connect(&self.inner.target, &self.inner.options)
            .await
        {
            Ok(driver_pool) => {
                guard.armed = false;
                self.inner.set_state(State::Ready(Arc::new(driver_pool)));
                info!(pool = %self.inner.name, id = %self.inner.id, "Pool ready");
                Ok(())
            }
            Err(e) => {
                warn!(pool = %self.inner.name, error = %e, "Pool initialization failed");
                Err(e)
            }
        }
    }

    /// Borrow a connection. The pool must already be initialized.
    pub async fn acquire(&self) -> DbResult<PooledConnection<D>> {
        let driver_pool = self.ready_pool()?;
        let connection = driver_pool.acquire().await?;
        debug!(pool = %self.inner.name, "Connection acquired");
        Ok(PooledConnection {
            pool_name: self.inner.name.clone(),
            pool_id: self.inner.id,
            driver_pool,
            connection: Some(connection),
        })
    }

    /// Return a connection to this pool.
    ///
    /// A guard from another pool is handed back to its own pool and reported
    /// as an error.
    pub async fn release(&self, connection: PooledConnection<D>) -> DbResult<()> {
        if connection.pool_id != self.inner.id {
            let owner = connection.pool_name.clone();
            connection.release().await;
            return Err(self.state_error(
                self.state(),
                &format!("connection belongs to pool '{}'", owner),
            ));
        }
        connection.release().await;
        Ok(())
    }

    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        self.run_execute(sql, params, None).await
    }

    pub async fn execute_timeout(
        &self,
        sql: &str,
        params: &[SqlValue],
        timeout: Duration,
    ) -> DbResult<u64> {
        self.run_execute(sql, params, Some(timeout)).await
    }

    async fn run_execute(
        &self,
        sql: &str,
        params: &[SqlValue],
        timeout: Option<Duration>,
    ) -> DbResult<u64> {
        let mut conn = self.acquire().await?;
        let result = conn.run_execute(sql, params, timeout).await;
        conn.release().await;
        result
    }

    pub async fn fetch(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.run_fetch(sql, params, None).await
    }

    pub async fn fetch_timeout(
        &self,
        sql: &str,
        params: &[SqlValue],
        timeout: Duration,
    ) -> DbResult<Vec<Row>> {
        self.run_fetch(sql, params, Some(timeout)).await
    }

    async fn run_fetch(
        &self,
        sql: &str,
        params: &[SqlValue],
        timeout: Option<Duration>,
    ) -> DbResult<Vec<Row>> {
        let mut conn = self.acquire().await?;
        let result = conn.run_fetch(sql, params, timeout).await;
        conn.release().await;
        result
    }

    pub async fn fetch_one(&self, sql: &str, params: &[SqlValue]) -> DbResult<Option<Row>> {
        self.run_fetch_one(sql, params, None).await
    }

    pub async fn fetch_one_timeout(
        &self,
        sql: &str,
        params: &[SqlValue],
        timeout: Duration,
    ) -> DbResult<Option<Row>> {
        self.run_fetch_one(sql, params, Some(timeout)).await
    }

    async fn run_fetch_one(
        &self,
        sql: &str,
        params: &[SqlValue],
        timeout: Option<Duration>,
    ) -> DbResult<Option<Row>> {
        let mut conn = self.acquire().await?;
        let result = conn.run_fetch_one(sql, params, timeout).await;
        conn.release().await;
        result
    }

    /// First column of the first row.
    pub async fn fetch_value(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Option<JsonValue>> {
        self.fetch_value_at(sql, params, 0, None).await
    }

    /// Column `column` (zero-based) of the first row, optionally bounded by
    /// `timeout`.
    pub async fn fetch_value_at(
        &self,
        sql: &str,
        params: &[SqlValue],
        column: usize,
        timeout: Option<Duration>,
    ) -> DbResult<Option<JsonValue>> {
        let mut conn = self.acquire().await?;
        let result = conn.fetch_value_at(sql, params, column, timeout).await;
        conn.release().await;
        result
    }

    pub async fn execute_statement(&self, statement: &Statement) -> DbResult<u64> {
        self.execute(statement.sql(), statement.params()).await
    }

    pub async fn fetch_statement(&self, statement: &Statement) -> DbResult<Vec<Row>> {
        self.fetch(statement.sql(), statement.params()).await
    }

    /// Start a transaction on a dedicated connection.
    pub async fn begin(&self) -> DbResult<Transaction<D>> {
        self.begin_with(TransactionOptions::default()).await
    }

    /// Start a transaction with an explicit isolation level or access mode.
    pub async fn begin_with(&self, options: TransactionOptions) -> DbResult<Transaction<D>> {
        let mut conn = self.acquire().await?;
        if let Err(e) = conn.begin(&options).await {
            conn.release().await;
            return Err(e);
        }
        debug!(pool = %self.inner.name, begin = %options, "Transaction started");
        Ok(Transaction {
            pool_name: self.inner.name.clone(),
            connection: Some(conn),
        })
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// The body's error comes back wrapped in [`DbError::Transaction`]; a
    /// failing rollback is logged and never replaces it. Each call uses its
    /// own connection, there are no savepoints.
    ///
    /// ```ignore
    /// pool.transaction(|tx| Box::pin(async move {
    ///     tx.execute("INSERT INTO t (a) VALUES ($1)", &[SqlValue::Int(1)]).await?;
    ///     Ok(())
    /// })).await?;
    /// ```
    pub async fn transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<D>) -> BoxFuture<'t, DbResult<T>>,
    {
        self.transaction_with(TransactionOptions::default(), f).await
    }

    /// [`transaction`](Self::transaction) with explicit [`TransactionOptions`].
    pub async fn transaction_with<T, F>(&self, options: TransactionOptions, f: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<D>) -> BoxFuture<'t, DbResult<T>>,
    {
        let mut tx = self.begin_with(options).await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        pool = %self.inner.name,
                        error = %rollback_err,
                        "Rollback failed after transaction error"
                    );
                }
                Err(DbError::transaction(err))
            }
        }
    }

    /// Close the driver pool, unregister and clear the current slot.
    /// A no-op unless the pool is `Ready`.
    pub async fn close(&self) {
        let _lock = self.inner.init_lock.lock().await;
        let driver_pool = {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match &*state {
                State::Ready(pool) => {
                    let pool = Arc::clone(pool);
                    *state = State::Closed;
                    Some(pool)
                }
                _ => None,
            }
        };
        let Some(driver_pool) = driver_pool else {
            debug!(pool = %self.inner.name, state = %self.state(), "Close skipped");
            return;
        };

        driver_pool.close().await;
        if let Some(registry) = self.registry() {
            registry.unregister_instance(self);
            registry.clear_current_if(self);
        }
        info!(pool = %self.inner.name, id = %self.inner.id, "Pool closed");
    }

    /// Initialize, register, run `fut` with this pool as the task-local
    /// current pool, then close, whether or not `fut` succeeded.
    ///
    /// The current pool does not follow into tasks spawned by `fut`.
    pub async fn scope<T, Fut>(&self, fut: Fut) -> DbResult<T>
    where
        Fut: Future<Output = DbResult<T>>,
    {
        self.initialize().await?;
        if let Some(registry) = self.registry() {
            registry.register(self.clone());
        }

        let mut close_guard = CloseOnDrop {
            pool: Some(self.clone()),
        };
        let result = with_current_pool(self.clone(), fut).await;
        close_guard.pool = None;
        self.close().await;
        result
    }
}

/// Closes the pool if a scope is abandoned before reaching its own close.
struct CloseOnDrop<D: Driver> {
    pool: Option<Pool<D>>,
}

impl<D: Driver> Drop for CloseOnDrop<D> {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        warn!(pool = %pool.name(), "Pool scope abandoned - closing in background");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { pool.close().await });
        }
    }
}

/// A connection on loan from a [`Pool`].
pub struct PooledConnection<D: Driver> {
    pool_name: String,
    pool_id: Uuid,
    driver_pool: Arc<D::Pool>,
    connection: Option<D::Connection>,
}

impl<D: Driver> fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool_name", &self.pool_name)
            .field("pool_id", &self.pool_id)
            .field("released", &self.connection.is_none())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> PooledConnection<D> {
    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn pool_id(&self) -> Uuid {
        self.pool_id
    }

    fn connection(&mut self) -> DbResult<&mut D::Connection> {
        let pool = &self.pool_name;
        self.connection
            .as_mut()
            .ok_or_else(|| DbError::pool_state(pool, "ready", "connection already released"))
    }

    async fn run_execute(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        timeout: Option<Duration>,
    ) -> DbResult<u64> {
        let conn = self.connection()?;
        timed(timeout, sql, conn.execute(sql, params)).await
    }

    async fn run_fetch(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        timeout: Option<Duration>,
    ) -> DbResult<Vec<Row>> {
        let conn = self.connection()?;
        timed(timeout, sql, conn.fetch(sql, params)).await
    }

    async fn run_fetch_one(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        timeout: Option<Duration>,
    ) -> DbResult<Option<Row>> {
        let conn = self.connection()?;
        timed(timeout, sql, conn.fetch_one(sql, params)).await
    }

    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        self.run_execute(sql, params, None).await
    }

    pub async fn execute_timeout(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        timeout: Duration,
    ) -> DbResult<u64> {
        self.run_execute(sql, params, Some(timeout)).await
    }

    pub async fn fetch(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.run_fetch(sql, params, None).await
    }

    pub async fn fetch_timeout(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        timeout: Duration,
    ) -> DbResult<Vec<Row>> {
        self.run_fetch(sql, params, Some(timeout)).await
    }

    pub async fn fetch_one(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Option<Row>> {
        self.run_fetch_one(sql, params, None).await
    }

    pub async fn fetch_one_timeout(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        timeout: Duration,
    ) -> DbResult<Option<Row>> {
        self.run_fetch_one(sql, params, Some(timeout)).await
    }

    pub async fn fetch_value(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Option<JsonValue>> {
        self.fetch_value_at(sql, params, 0, None).await
    }

    pub async fn fetch_value_at(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        column: usize,
        timeout: Option<Duration>,
    ) -> DbResult<Option<JsonValue>> {
        let conn = self.connection()?;
        timed(timeout, sql, conn.fetch_value(sql, params, column)).await
    }

    pub async fn execute_statement(&mut self, statement: &Statement) -> DbResult<u64> {
        self.execute(statement.sql(), statement.params()).await
    }

    pub async fn fetch_statement(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        self.fetch(statement.sql(), statement.params()).await
    }

    async fn begin(&mut self, options: &TransactionOptions) -> DbResult<()> {
        self.connection()?.begin(options).await
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.connection()?.commit().await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.connection()?.rollback().await
    }

    /// Hand the connection back to its pool (preferred over relying on Drop).
    pub async fn release(mut self) {
        if let Some(connection) = self.connection.take() {
            self.driver_pool.release(connection).await;
            debug!(pool = %self.pool_name, "Connection released");
        }
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let driver_pool = Arc::clone(&self.driver_pool);
        let pool_name = self.pool_name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    driver_pool.release(connection).await;
                    warn!(
                        pool = %pool_name,
                        "Connection released via Drop - consider using explicit release()"
                    );
                });
            }
            Err(_) => {
                warn!(pool = %pool_name, "No runtime to release connection; dropping it");
            }
        }
    }
}

/// An open transaction holding one connection.
///
/// Dropping it without [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) rolls back and releases in the background.
pub struct Transaction<D: Driver> {
    pool_name: String,
    connection: Option<PooledConnection<D>>,
}

impl<D: Driver> fmt::Debug for Transaction<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("pool_name", &self.pool_name)
            .field("connection", &self.connection)
            .finish()
    }
}

impl<D: Driver> Transaction<D> {
    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    fn connection(&mut self) -> DbResult<&mut PooledConnection<D>> {
        let pool = &self.pool_name;
        self.connection.as_mut().ok_or_else(|| {
            DbError::pool_state(pool, "ready", "transaction already committed or rolled back")
        })
    }

    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        self.connection()?.execute(sql, params).await
    }

    pub async fn execute_timeout(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        timeout: Duration,
    ) -> DbResult<u64> {
        self.connection()?.execute_timeout(sql, params, timeout).await
    }

    pub async fn fetch(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.connection()?.fetch(sql, params).await
    }

    pub async fn fetch_timeout(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        timeout: Duration,
    ) -> DbResult<Vec<Row>> {
        self.connection()?.fetch_timeout(sql, params, timeout).await
    }

    pub async fn fetch_one(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Option<Row>> {
        self.connection()?.fetch_one(sql, params).await
    }

    pub async fn fetch_one_timeout(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        timeout: Duration,
    ) -> DbResult<Option<Row>> {
        self.connection()?.fetch_one_timeout(sql, params, timeout).await
    }

    pub async fn fetch_value(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Option<JsonValue>> {
        self.connection()?.fetch_value(sql, params).await
    }

    pub async fn fetch_value_at(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        column: usize,
        timeout: Option<Duration>,
    ) -> DbResult<Option<JsonValue>> {
        self.connection()?
            .fetch_value_at(sql, params, column, timeout)
            .await
    }

    pub async fn execute_statement(&mut self, statement: &Statement) -> DbResult<u64> {
        self.execute(statement.sql(), statement.params()).await
    }

    pub async fn fetch_statement(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        self.fetch(statement.sql(), statement.params()).await
    }

    /// Commit and release the connection.
    pub async fn commit(mut self) -> DbResult<()> {
        self.finish(true).await
    }

    /// Roll back and release the connection.
    pub async fn rollback(mut self) -> DbResult<()> {
        self.finish(false).await
    }

    async fn finish(&mut self, commit: bool) -> DbResult<()> {
        let Some(mut conn) = self.connection.take() else {
            return Ok(());
        };
        let result = if commit {
            conn.commit().await
        } else {
            conn.rollback().await
        };
        conn.release().await;
        debug!(
            pool = %self.pool_name,
            committed = commit,
            ok = result.is_ok(),
            "Transaction finished"
        );
        result
    }
}

impl<D: Driver> Drop for Transaction<D> {
    fn drop(&mut self) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };
        warn!(pool = %conn.pool_name, "Transaction dropped while open - rolling back");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = conn.rollback().await {
                    warn!(error = %e, "Background rollback failed");
                }
                conn.release().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordingDriver;

    #[tokio::test]
    async fn test_finished_transaction_reports_its_pool() {
        let mut tx = Transaction::<RecordingDriver> {
            pool_name: "metrics".to_string(),
            connection: None,
        };

        let err = tx.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::PoolState { .. }));
        assert!(err.to_string().contains("Pool 'metrics'"));
        assert!(err.to_string().contains("already committed or rolled back"));
    }

    #[tokio::test]
    async fn test_timed_passes_through_without_limit() {
        let value = timed(None, "SELECT 1", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);

        let err = timed(Some(Duration::from_millis(5)), "SELECT pg_sleep(1)", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }
}
