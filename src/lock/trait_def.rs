use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("interrupted while waiting for lock `{0}`")]
    Interrupted(String),
    #[error("lock backend failure: {0}")]
    Backend(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type LockResult<T> = Result<T, LockError>;

/// Shared registry of expiring named leases
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Prepare backend state (tables etc.)
    async fn init(&self) -> LockResult<()> {
        Ok(())
    }

    /// Take `key` for `owner` unless another owner holds an unexpired lease.
    /// Never waits.
    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> LockResult<bool>;

    /// Push the expiry of `owner`'s lease on `key` to `lease` from now.
    /// Returns `false` when `owner` no longer holds `key`.
    async fn renew(&self, key: &str, owner: &str, lease: Duration) -> LockResult<bool>;

    /// Drop `owner`'s lease on `key`. Releasing a lease that is not held is a no-op.
    async fn release(&self, key: &str, owner: &str) -> LockResult<()>;
}
