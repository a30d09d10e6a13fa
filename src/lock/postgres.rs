use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::lock::{LockBackend, LockResult};

/// Lease table in PostgreSQL, shared by every instance of the fleet
pub struct PostgresLockBackend {
    pool: Arc<PgPool>,
}

impl PostgresLockBackend {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(Arc::new(pool)))
    }

    pub fn from_pool(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockBackend for PostgresLockBackend {
    async fn init(&self) -> LockResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS distributed_locks (
                lock_key TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                expires_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> LockResult<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let expires_at = now + lease.as_millis() as i64;

        // Takes the row when free or expired; a live lease leaves it untouched
        let result = sqlx::query(
            r#"
            INSERT INTO distributed_locks (lock_key, owner, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (lock_key) DO UPDATE SET
                owner = excluded.owner,
                expires_at = excluded.expires_at
            WHERE distributed_locks.expires_at <= $4
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(expires_at)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn renew(&self, key: &str, owner: &str, lease: Duration) -> LockResult<bool> {
        let expires_at = chrono::Utc::now().timestamp_millis() + lease.as_millis() as i64;

        let result = sqlx::query(
            r#"
            UPDATE distributed_locks
            SET expires_at = $1
            WHERE lock_key = $2 AND owner = $3
            "#,
        )
        .bind(expires_at)
        .bind(key)
        .bind(owner)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, owner: &str) -> LockResult<()> {
        sqlx::query("DELETE FROM distributed_locks WHERE lock_key = $1 AND owner = $2")
            .bind(key)
            .bind(owner)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }
}
