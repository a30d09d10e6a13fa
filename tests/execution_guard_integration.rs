//! Single-flight execution across concurrent callers
//!
//! Each "instance" gets its own registry over a shared backend, the way
//! separate processes share one lease table.

use bulwark::lock::{
    ExecutionGuard, LockBackend, LockRegistry, LockSettings, MemoryLockBackend, SqliteLockBackend,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

const KEY: &str = "waf-report:attack-type";

fn memory_guard(backend: Arc<MemoryLockBackend>) -> ExecutionGuard {
    ExecutionGuard::new(LockRegistry::new(backend, LockSettings::default()))
}

async fn sqlite_backend() -> Arc<SqliteLockBackend> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let backend = SqliteLockBackend::from_pool(Arc::new(pool));
    backend.init().await.unwrap();
    Arc::new(backend)
}

fn explode() -> anyhow::Result<()> {
    panic!("report body blew up")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_zero_wait_calls_run_once() {
    const CALLERS: usize = 8;
    let backend = Arc::new(MemoryLockBackend::new());
    let barrier = Arc::new(Barrier::new(CALLERS));
    let runs = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..CALLERS {
        let guard = memory_guard(Arc::clone(&backend));
        let barrier = Arc::clone(&barrier);
        let runs = Arc::clone(&runs);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            guard
                .run_guarded(KEY, Duration::ZERO, || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok::<_, anyhow::Error>(())
                })
                .await
                .unwrap()
        }));
    }

    let mut ran = 0;
    let mut skipped = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Some(()) => ran += 1,
            None => skipped += 1,
        }
    }

    assert_eq!(ran, 1);
    assert_eq!(skipped, CALLERS - 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiting_callers_run_one_at_a_time() {
    const CALLERS: usize = 5;
    let backend = Arc::new(MemoryLockBackend::new());
    let active = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for _ in 0..CALLERS {
        let guard = memory_guard(Arc::clone(&backend));
        let active = Arc::clone(&active);
        let overlapped = Arc::clone(&overlapped);
        handles.push(tokio::spawn(async move {
            guard
                .run_guarded(KEY, Duration::from_secs(10), || async {
                    if active.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlapped.store(true, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                })
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Some(()));
    }
    assert!(!overlapped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_body_error_propagates_and_releases() {
    let guard = memory_guard(Arc::new(MemoryLockBackend::new()));

    let result: anyhow::Result<Option<()>> = guard
        .run_guarded(KEY, Duration::ZERO, || async {
            Err(anyhow::anyhow!("index unavailable"))
        })
        .await;
    assert_eq!(result.unwrap_err().to_string(), "index unavailable");

    let rerun = guard
        .run_guarded(KEY, Duration::ZERO, || async { Ok::<_, anyhow::Error>(7) })
        .await
        .unwrap();
    assert_eq!(rerun, Some(7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_body_releases_lock() {
    let backend = Arc::new(MemoryLockBackend::new());
    let guard = memory_guard(Arc::clone(&backend));

    let panicked = tokio::spawn(async move {
        guard
            .run_guarded(KEY, Duration::ZERO, || async { explode() })
            .await
    })
    .await;
    assert!(panicked.is_err());

    let guard = memory_guard(backend);
    let mut reacquired = false;
    for _ in 0..50 {
        let outcome = guard
            .run_guarded(KEY, Duration::ZERO, || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        if outcome.is_some() {
            reacquired = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reacquired);
}

#[tokio::test]
async fn test_sqlite_leases_exclude_other_instances() {
    let backend = sqlite_backend().await;
    let first = LockRegistry::new(backend.clone(), LockSettings::default());
    let second = LockRegistry::new(backend, LockSettings::default());

    let lease = first.acquire(KEY, Duration::ZERO).await.unwrap().unwrap();
    assert!(second.acquire(KEY, Duration::ZERO).await.unwrap().is_none());

    let releaser = first.clone();
    let held = lease.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        releaser.release(&held).await.unwrap();
    });

    let taken = second.acquire(KEY, Duration::from_secs(5)).await.unwrap();
    assert!(taken.is_some());
}

#[tokio::test]
async fn test_sqlite_expired_lease_is_taken_over() {
    let backend = sqlite_backend().await;
    let short = LockSettings {
        lease: Duration::from_millis(50),
        poll_interval: Duration::from_millis(10),
    };
    let crashed = LockRegistry::new(backend.clone(), short);
    let survivor = LockRegistry::new(backend, LockSettings::default());

    // Never released, as if the holder died mid-run
    let _abandoned = crashed.acquire(KEY, Duration::ZERO).await.unwrap().unwrap();

    let taken = survivor.acquire(KEY, Duration::from_secs(2)).await.unwrap();
    assert!(taken.is_some());
}

#[tokio::test]
async fn test_distinct_keys_do_not_contend() {
    let guard = memory_guard(Arc::new(MemoryLockBackend::new()));
    let registry = guard.registry().clone();
    let held = registry
        .acquire("waf-report:attack-ip", Duration::ZERO)
        .await
        .unwrap()
        .unwrap();

    let outcome = guard
        .run_guarded("waf-report:target-url", Duration::ZERO, || async {
            Ok::<_, anyhow::Error>("ran")
        })
        .await
        .unwrap();
    assert_eq!(outcome, Some("ran"));

    registry.release(&held).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_lease_outlives_short_ttl_while_body_runs() {
    let backend = sqlite_backend().await;
    let settings = LockSettings {
        lease: Duration::from_millis(150),
        poll_interval: Duration::from_millis(10),
    };
    let active = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let guard = ExecutionGuard::new(LockRegistry::new(backend.clone(), settings));
        let active = Arc::clone(&active);
        let overlapped = Arc::clone(&overlapped);
        handles.push(tokio::spawn(async move {
            guard
                .run_guarded(KEY, Duration::from_secs(5), || async {
                    if active.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlapped.store(true, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                })
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Some(()));
    }
    assert!(!overlapped.load(Ordering::SeqCst));
}
