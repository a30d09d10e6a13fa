use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use crate::models::{AttackIpStat, AttackTypeStat, ReportKind, TargetUrlStat};
use crate::storage::trait_def::table_for;
use crate::storage::{ReportStore, StorageResult};

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
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

    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

#[async_trait]
impl ReportStore for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attack_type_stats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                sub_domain_id TEXT NOT NULL,
                top_domain_id TEXT NOT NULL,
                attack_type TEXT NOT NULL,
                attack_time BIGINT NOT NULL,
                attack_count BIGINT NOT NULL,
                statis_time BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attack_ip_stats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                sub_domain_id TEXT NOT NULL,
                top_domain_id TEXT NOT NULL,
                attack_ip TEXT NOT NULL,
                attack_time BIGINT NOT NULL,
                attack_count BIGINT NOT NULL,
                ip_count BIGINT,
                statis_time BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS target_url_stats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                sub_domain_id TEXT NOT NULL,
                top_domain_id TEXT NOT NULL,
                target_url TEXT NOT NULL,
                attack_time BIGINT NOT NULL,
                attack_count BIGINT NOT NULL,
                ip_count BIGINT,
                statis_time BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        for kind in ReportKind::ALL {
            let table = table_for(kind);
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_statis_time ON {table}(statis_time)"
            ))
            .execute(self.pool.as_ref())
            .await?;
        }

        Ok(())
    }

    async fn replace_attack_type(
        &self,
        statis_time: DateTime<FixedOffset>,
        records: &[AttackTypeStat],
    ) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM attack_type_stats WHERE statis_time = $1")
            .bind(statis_time.timestamp())
            .execute(&mut *tx)
            .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO attack_type_stats
                    (id, user_id, sub_domain_id, top_domain_id, attack_type,
                     attack_time, attack_count, statis_time)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(&record.id)
            .bind(&record.user_id)
            .bind(&record.sub_domain_id)
            .bind(&record.top_domain_id)
            .bind(&record.attack_type)
            .bind(record.attack_time.timestamp())
            .bind(record.attack_count)
            .bind(record.statis_time.timestamp())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len() as u64)
    }

    async fn replace_attack_ip(
        &self,
        statis_time: DateTime<FixedOffset>,
        records: &[AttackIpStat],
    ) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM attack_ip_stats WHERE statis_time = $1")
            .bind(statis_time.timestamp())
            .execute(&mut *tx)
            .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO attack_ip_stats
                    (id, user_id, sub_domain_id, top_domain_id, attack_ip,
                     attack_time, attack_count, ip_count, statis_time)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(&record.id)
            .bind(&record.user_id)
            .bind(&record.sub_domain_id)
            .bind(&record.top_domain_id)
            .bind(&record.attack_ip)
            .bind(record.attack_time.timestamp())
            .bind(record.attack_count)
            .bind(record.ip_count)
            .bind(record.statis_time.timestamp())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len() as u64)
    }

    async fn replace_target_url(
        &self,
        statis_time: DateTime<FixedOffset>,
        records: &[TargetUrlStat],
    ) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM target_url_stats WHERE statis_time = $1")
            .bind(statis_time.timestamp())
            .execute(&mut *tx)
            .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO target_url_stats
                    (id, user_id, sub_domain_id, top_domain_id, target_url,
                     attack_time, attack_count, ip_count, statis_time)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(&record.id)
            .bind(&record.user_id)
            .bind(&record.sub_domain_id)
            .bind(&record.top_domain_id)
            .bind(&record.target_url)
            .bind(record.attack_time.timestamp())
            .bind(record.attack_count)
            .bind(record.ip_count)
            .bind(record.statis_time.timestamp())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len() as u64)
    }

    async fn count_reports(
        &self,
        kind: ReportKind,
        statis_time: DateTime<FixedOffset>,
    ) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {} WHERE statis_time = $1",
            table_for(kind)
        ))
        .bind(statis_time.timestamp())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn purge_reports_before(&self, cutoff: DateTime<FixedOffset>) -> StorageResult<u64> {
        let mut deleted = 0;
        for kind in ReportKind::ALL {
            let result = sqlx::query(&format!(
                "DELETE FROM {} WHERE statis_time < $1",
                table_for(kind)
            ))
            .bind(cutoff.timestamp())
            .execute(self.pool.as_ref())
            .await?;
            deleted += result.rows_affected();
        }

        Ok(deleted)
    }
}
