//! Integration tests for the pool registry and the current-pool overlay.

use pgscope::db::{Pool, PoolRegistry, RecordingDriver};
use pgscope::error::DbError;
use std::time::Duration;

const TARGET: &str = "postgresql://localhost/app";

fn build(registry: &PoolRegistry<RecordingDriver>, name: &str) -> Pool<RecordingDriver> {
    Pool::builder(RecordingDriver::new(), TARGET)
        .name(name)
        .registry(registry)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_lookup_and_unregister() {
    let registry = PoolRegistry::new();
    let analytics = build(&registry, "analytics");
    let _reporting = build(&registry, "reporting");

    assert_eq!(registry.names(), vec!["analytics", "reporting"]);
    assert_eq!(registry.lookup("analytics").unwrap(), analytics);

    let err = registry.lookup("missing").unwrap_err();
    assert!(matches!(err, DbError::RegistryLookup { .. }));
    assert!(err.to_string().contains("missing"));

    assert!(registry.unregister("analytics").is_some());
    assert!(registry.lookup("analytics").is_err());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_last_registration_wins() {
    let registry = PoolRegistry::new();
    let first = build(&registry, "main");
    let second = build(&registry, "main");

    assert_ne!(first, second);
    assert_eq!(registry.lookup("main").unwrap(), second);

    // closing the replaced pool must not evict its successor
    first.initialize().await.unwrap();
    first.close().await;
    assert_eq!(registry.lookup("main").unwrap(), second);
}

#[tokio::test]
async fn test_no_current_pool() {
    let registry: PoolRegistry<RecordingDriver> = PoolRegistry::new();
    let err = registry.current().unwrap_err();
    assert!(err.to_string().contains("no current pool"));
    assert!(registry.connection(None).await.is_err());
}

#[tokio::test]
async fn test_set_current_guard_restores_previous() {
    let registry = PoolRegistry::new();
    let outer = build(&registry, "outer");
    let inner = build(&registry, "inner");

    let outer_guard = registry.set_current(outer.clone());
    assert_eq!(registry.current().unwrap(), outer);
    {
        let _inner_guard = registry.set_current(inner.clone());
        assert_eq!(registry.current().unwrap(), inner);
    }
    assert_eq!(registry.current().unwrap(), outer);
    drop(outer_guard);
    assert!(registry.current().is_err());
}

#[tokio::test]
async fn test_scope_sets_current_and_closes() {
    let registry = PoolRegistry::new();
    let pool = build(&registry, "scoped");

    let seen = pool
        .scope(async {
            let current = registry.current()?;
            let mut conn = registry.connection(None).await?;
            conn.execute("SELECT 1", &[]).await?;
            conn.release().await;
            Ok(current)
        })
        .await
        .unwrap();

    assert_eq!(seen, pool);
    assert!(pool.is_closed());
    assert!(registry.is_empty());
    assert!(registry.current().is_err());
}

#[tokio::test]
async fn test_scope_closes_on_error() {
    let registry = PoolRegistry::new();
    let pool = build(&registry, "failing");

    let result: Result<(), DbError> = pool
        .scope(async { Err(DbError::validation("body", "failed on purpose")) })
        .await;

    assert_eq!(result.unwrap_err().field(), Some("body"));
    assert!(pool.is_closed());
    assert!(registry.lookup("failing").is_err());
}

#[tokio::test]
async fn test_nested_scopes_restore_outer() {
    let registry = PoolRegistry::new();
    let outer = build(&registry, "outer");
    let inner = build(&registry, "inner");

    outer
        .scope(async {
            assert_eq!(registry.current()?, outer);
            inner
                .scope(async {
                    assert_eq!(registry.current()?, inner);
                    Ok(())
                })
                .await?;
            assert_eq!(registry.current()?, outer);
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scopes_are_isolated() {
    let registry = PoolRegistry::new();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = registry.clone();
            let pool = build(&registry, &format!("pool_{}", i));
            tokio::spawn(async move {
                pool.scope(async {
                    for _ in 0..5 {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        assert_eq!(registry.current()?, pool);
                    }
                    Ok(())
                })
                .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_current_skips_closed_pool() {
    let unowned = PoolRegistry::new();
    let registry = PoolRegistry::new();
    // not built against `registry`, so closing cannot clear its slot
    let pool = build(&unowned, "detached");
    pool.initialize().await.unwrap();

    let _guard = registry.set_current(pool.clone());
    assert_eq!(registry.current().unwrap(), pool);

    pool.close().await;
    assert!(registry.current().is_err());
}

#[tokio::test]
async fn test_close_all() {
    let registry = PoolRegistry::new();
    let a = build(&registry, "a");
    let b = build(&registry, "b");
    a.initialize().await.unwrap();
    b.initialize().await.unwrap();

    registry.close_all().await;

    assert!(a.is_closed());
    assert!(b.is_closed());
    assert!(registry.is_empty());
}
