use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::lock::{LockBackend, LockResult};

struct Lease {
    owner: String,
    expires_at: Instant,
}

/// Process-local lease table, for single-instance deployments and tests
#[derive(Default)]
pub struct MemoryLockBackend {
    leases: DashMap<String, Lease>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an unexpired lease is currently held on `key`
    pub fn is_held(&self, key: &str) -> bool {
        self.leases
            .get(key)
            .is_some_and(|lease| lease.expires_at > Instant::now())
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> LockResult<bool> {
        let now = Instant::now();
        let fresh = Lease {
            owner: owner.to_string(),
            expires_at: now + lease,
        };

        let acquired = match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at <= now {
                    held.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                true
            }
        };
        Ok(acquired)
    }

    async fn renew(&self, key: &str, owner: &str, lease: Duration) -> LockResult<bool> {
        let renewed = match self.leases.get_mut(key) {
            Some(mut held) if held.owner == owner => {
                held.expires_at = Instant::now() + lease;
                true
            }
            _ => false,
        };
        Ok(renewed)
    }

    async fn release(&self, key: &str, owner: &str) -> LockResult<()> {
        self.leases.remove_if(key, |_, lease| lease.owner == owner);
        Ok(())
    }
}
