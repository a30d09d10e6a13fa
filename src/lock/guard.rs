use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::lock::{LockError, LockLease, LockRegistry};

/// Scoped ownership of a lease.
///
/// [`LeaseGuard::release`] is the normal path. If the guard is dropped while
/// still holding the lease (panic or cancellation of the guarded future) the
/// release is handed to the runtime instead.
pub struct LeaseGuard {
    registry: LockRegistry,
    lease: Option<LockLease>,
}

impl LeaseGuard {
    pub fn new(registry: LockRegistry, lease: LockLease) -> Self {
        Self {
            registry,
            lease: Some(lease),
        }
    }

    pub fn lease(&self) -> Option<&LockLease> {
        self.lease.as_ref()
    }

    pub async fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            release_logged(&self.registry, &lease).await;
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registry = self.registry.clone();
                handle.spawn(async move {
                    release_logged(&registry, &lease).await;
                });
            }
            Err(_) => {
                warn!(
                    lock_key = lease.key(),
                    "no runtime to release lock, lease will expire on its own"
                );
            }
        }
    }
}

async fn release_logged(registry: &LockRegistry, lease: &LockLease) {
    match registry.release(lease).await {
        Ok(()) => info!(
            lock_key = lease.key(),
            held_ms = lease.held_for().as_millis() as u64,
            "lock released"
        ),
        Err(e) => warn!(
            lock_key = lease.key(),
            error = %e,
            "failed to release lock, lease will expire on its own"
        ),
    }
}

/// Runs a computation only while holding a named lock
#[derive(Clone)]
pub struct ExecutionGuard {
    registry: LockRegistry,
}

impl ExecutionGuard {
    pub fn new(registry: LockRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &LockRegistry {
        &self.registry
    }

    /// Run `body` under `lock_key`, waiting at most `max_wait` for the lock.
    ///
    /// Returns `Ok(None)` without running `body` when the lock stayed held
    /// elsewhere or the wait was interrupted by shutdown. A failing lock
    /// backend is an error for the run. Otherwise returns `body`'s own result;
    /// the lease is renewed while `body` runs and released on every exit path.
    pub async fn run_guarded<T, E, F, Fut>(
        &self,
        lock_key: &str,
        max_wait: Duration,
        body: F,
    ) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        info!(lock_key, "trying to acquire lock");
        let lease = match self.registry.acquire(lock_key, max_wait).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                info!(lock_key, "lock held by another instance, skipping run");
                return Ok(None);
            }
            Err(LockError::Interrupted(_)) => {
                error!(lock_key, "interrupted while waiting for lock, skipping run");
                return Ok(None);
            }
            Err(e) => {
                error!(lock_key, error = %e, "lock backend failed");
                return Err(e.into());
            }
        };

        info!(lock_key, "lock acquired");
        let guard = LeaseGuard::new(self.registry.clone(), lease);
        let result = self.run_renewing(&guard, body()).await;
        guard.release().await;
        result.map(Some)
    }

    /// Drive `body` to completion, extending the lease every
    /// `renew_interval` until it finishes
    async fn run_renewing<T, E, Fut>(&self, guard: &LeaseGuard, body: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(lease) = guard.lease() else {
            return body.await;
        };

        let mut renew = tokio::time::interval(self.registry.settings().renew_interval());
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
        renew.tick().await;

        tokio::pin!(body);
        loop {
            tokio::select! {
                result = &mut body => return result,
                _ = renew.tick() => match self.registry.renew(lease).await {
                    Ok(true) => debug!(lock_key = lease.key(), "lease renewed"),
                    Ok(false) => warn!(lock_key = lease.key(), "lease lost while running"),
                    Err(e) => warn!(lock_key = lease.key(), error = %e, "failed to renew lease"),
                },
            }
        }
    }
}
