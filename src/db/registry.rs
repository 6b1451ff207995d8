//! Named pool directory plus the "current pool" overlay.
//!
//! The current pool is resolved in two layers:
//! 1. the task-local value installed by [`Pool::scope`](super::Pool::scope),
//!    which nests and never leaks into other tasks
//! 2. a registry-wide fallback slot set with [`PoolRegistry::set_current`]
//!
//! The fallback slot is shared by every task using the registry. Concurrent
//! scopes that install different pools through it will see each other's
//! value; use `Pool::scope` when pools differ per task.

use super::driver::Driver;
use super::pool::{Pool, PooledConnection};
use crate::error::{DbError, DbResult};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, info};

tokio::task_local! {
    static CURRENT_POOL: Arc<dyn Any + Send + Sync>;
}

/// Run `fut` with `pool` as the task-local current pool.
pub(crate) async fn with_current_pool<D, F>(pool: Pool<D>, fut: F) -> F::Output
where
    D: Driver,
    F: Future,
{
    CURRENT_POOL.scope(Arc::new(pool), fut).await
}

/// Task-local current pool, if one of this driver type is in scope.
fn task_current<D: Driver>() -> Option<Pool<D>> {
    CURRENT_POOL
        .try_with(|current| current.downcast_ref::<Pool<D>>().cloned())
        .ok()
        .flatten()
}

struct RegistryInner<D: Driver> {
    pools: RwLock<HashMap<String, Pool<D>>>,
    current: RwLock<Option<Pool<D>>>,
}

/// Directory of pools keyed by name. Cheap to clone; clones share state.
pub struct PoolRegistry<D: Driver> {
    inner: Arc<RegistryInner<D>>,
}

impl<D: Driver> Clone for PoolRegistry<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> Default for PoolRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Driver> std::fmt::Debug for PoolRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.names())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> PoolRegistry<D> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                pools: RwLock::new(HashMap::new()),
                current: RwLock::new(None),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry<D> {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register `pool` under its own name. Returns the pool it replaced.
    pub fn register(&self, pool: Pool<D>) -> Option<Pool<D>> {
        let name = pool.name().to_string();
        self.register_as(name, pool)
    }

    /// Register `pool` under `name`; the last registration wins.
    pub fn register_as(&self, name: impl Into<String>, pool: Pool<D>) -> Option<Pool<D>> {
        let name = name.into();
        debug!(pool = %name, id = %pool.id(), "Registering pool");
        self.inner
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, pool)
    }

    pub fn lookup(&self, name: &str) -> DbResult<Pool<D>> {
        self.inner
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::pool_not_found(name))
    }

    pub fn unregister(&self, name: &str) -> Option<Pool<D>> {
        self.inner
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Remove every entry that refers to this exact pool instance.
    pub(crate) fn unregister_instance(&self, pool: &Pool<D>) -> bool {
        let mut pools = self
            .inner
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = pools.len();
        pools.retain(|_, registered| registered != pool);
        before != pools.len()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Install `pool` in the fallback slot until the guard is dropped, at
    /// which point the previous value is restored.
    pub fn set_current(&self, pool: Pool<D>) -> CurrentPoolGuard<D> {
        let previous = self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pool);
        CurrentPoolGuard {
            registry: self.clone(),
            previous,
        }
    }

    /// The pool in scope: task-local first, then the fallback slot.
    /// Closed pools are never returned.
    pub fn current(&self) -> DbResult<Pool<D>> {
        if let Some(pool) = task_current::<D>().filter(|p| !p.is_closed()) {
            return Ok(pool);
        }
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|p| !p.is_closed())
            .ok_or_else(DbError::no_current_pool)
    }

    /// Empty the fallback slot if it holds this exact pool.
    pub fn clear_current_if(&self, pool: &Pool<D>) -> bool {
        let mut current = self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if current.as_ref() == Some(pool) {
            *current = None;
            return true;
        }
        false
    }

    /// Acquire from the named pool, or from the current pool when `name` is
    /// `None`.
    pub async fn connection(&self, name: Option<&str>) -> DbResult<PooledConnection<D>> {
        let pool = match name {
            Some(name) => self.lookup(name)?,
            None => self.current()?,
        };
        pool.acquire().await
    }

    /// Close and remove every registered pool.
    pub async fn close_all(&self) {
        let pools: Vec<Pool<D>> = self
            .inner
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, pool)| pool)
            .collect();
        let count = pools.len();
        for pool in pools {
            pool.close().await;
        }
        info!(count, "All pools closed");
    }
}

/// Non-owning handle a pool keeps back to its registry.
pub(crate) struct WeakRegistry<D: Driver> {
    inner: Weak<RegistryInner<D>>,
}

impl<D: Driver> WeakRegistry<D> {
    pub(crate) fn upgrade(&self) -> Option<PoolRegistry<D>> {
        self.inner.upgrade().map(|inner| PoolRegistry { inner })
    }
}

/// Restores the previous fallback current pool when dropped.
#[must_use = "the previous current pool is restored when this guard is dropped"]
pub struct CurrentPoolGuard<D: Driver> {
    registry: PoolRegistry<D>,
    previous: Option<Pool<D>>,
}

impl<D: Driver> Drop for CurrentPoolGuard<D> {
    fn drop(&mut self) {
        *self
            .registry
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = self.previous.take();
    }
}
