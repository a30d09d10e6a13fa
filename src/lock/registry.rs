use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::lock::{LockBackend, LockError, LockResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// How long a lease survives without being released
    pub lease: Duration,
    /// Pause between acquisition attempts while waiting
    pub poll_interval: Duration,
}

impl LockSettings {
    /// How often a held lease is extended while its body runs
    pub fn renew_interval(&self) -> Duration {
        (self.lease / 3).max(Duration::from_millis(1))
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// A held lease. Each acquisition gets its own owner token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    key: String,
    owner: String,
    acquired_at: Instant,
}

impl LockLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Bounded-wait acquisition on top of a [`LockBackend`]
#[derive(Clone)]
pub struct LockRegistry {
    backend: Arc<dyn LockBackend>,
    settings: LockSettings,
    shutdown: Option<watch::Receiver<bool>>,
}

impl LockRegistry {
    pub fn new(backend: Arc<dyn LockBackend>, settings: LockSettings) -> Self {
        Self {
            backend,
            settings,
            shutdown: None,
        }
    }

    /// Abort pending waits once `shutdown` flips to `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn settings(&self) -> LockSettings {
        self.settings
    }

    /// Try to take `key`, polling for at most `wait`.
    ///
    /// A zero `wait` makes exactly one attempt. Returns `Ok(None)` when the
    /// lock stayed held elsewhere for the whole window.
    pub async fn acquire(&self, key: &str, wait: Duration) -> LockResult<Option<LockLease>> {
        let owner = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;
        let mut shutdown = self.shutdown.clone();

        loop {
            if shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                return Err(LockError::Interrupted(key.to_string()));
            }

            if self
                .backend
                .try_acquire(key, &owner, self.settings.lease)
                .await?
            {
                return Ok(Some(LockLease {
                    key: key.to_string(),
                    owner,
                    acquired_at: Instant::now(),
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let pause = self.settings.poll_interval.min(deadline - now);
            debug!(lock_key = key, ?pause, "lock busy, waiting");

            match shutdown.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = sleep(pause) => {}
                        changed = rx.changed() => {
                            if changed.is_err() || *rx.borrow() {
                                return Err(LockError::Interrupted(key.to_string()));
                            }
                        }
                    }
                }
                None => sleep(pause).await,
            }
        }
    }

    /// Extend `lease` by the configured lease time. `false` means it was lost.
    pub async fn renew(&self, lease: &LockLease) -> LockResult<bool> {
        self.backend
            .renew(&lease.key, &lease.owner, self.settings.lease)
            .await
    }

    pub async fn release(&self, lease: &LockLease) -> LockResult<()> {
        self.backend.release(&lease.key, &lease.owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryLockBackend;

    fn registry() -> LockRegistry {
        LockRegistry::new(Arc::new(MemoryLockBackend::new()), LockSettings::default())
    }

    #[tokio::test]
    async fn test_reentrant_acquire_fails() {
        let registry = registry();
        let first = registry.acquire("report", Duration::ZERO).await.unwrap();
        assert!(first.is_some());
        assert!(registry
            .acquire("report", Duration::ZERO)
            .await
            .unwrap()
            .is_none());

        registry.release(&first.unwrap()).await.unwrap();
        assert!(registry
            .acquire("report", Duration::ZERO)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait_gives_up() {
        let registry = registry();
        let _held = registry.acquire("report", Duration::ZERO).await.unwrap();

        let started = Instant::now();
        let lease = registry
            .acquire("report", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(lease.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gets_lock_after_release() {
        let registry = registry();
        let held = registry
            .acquire("report", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();

        let releaser = registry.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(500)).await;
            releaser.release(&held).await.unwrap();
        });

        let lease = registry
            .acquire("report", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(lease.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_wait() {
        let (tx, rx) = watch::channel(false);
        let registry = registry().with_shutdown(rx);
        let _held = registry.acquire("report", Duration::ZERO).await.unwrap();

        let waiter = registry.clone();
        let pending =
            tokio::spawn(async move { waiter.acquire("report", Duration::from_secs(30)).await });
        sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(LockError::Interrupted(_))));
    }

    #[test]
    fn test_renew_interval_is_a_third_of_the_lease() {
        let settings = LockSettings {
            lease: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
        };
        assert_eq!(settings.renew_interval(), Duration::from_secs(20));

        let tiny = LockSettings {
            lease: Duration::ZERO,
            ..settings
        };
        assert_eq!(tiny.renew_interval(), Duration::from_millis(1));
    }
}
