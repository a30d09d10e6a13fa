use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::models::{AttackIpStat, AttackTypeStat, ReportKind, TargetUrlStat};
use crate::storage::trait_def::table_for;
use crate::storage::{ReportStore, StorageResult};

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(Arc::new(pool)))
    }

    pub fn from_pool(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> Arc<SqlitePool> {
        Arc::clone(&self.pool)
    }
}

#[async_trait]
impl ReportStore for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attack_type_stats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                sub_domain_id TEXT NOT NULL,
                top_domain_id TEXT NOT NULL,
                attack_type TEXT NOT NULL,
                attack_time INTEGER NOT NULL,
                attack_count INTEGER NOT NULL,
                statis_time INTEGER NOT NULL
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
                attack_time INTEGER NOT NULL,
                attack_count INTEGER NOT NULL,
                ip_count INTEGER,
                statis_time INTEGER NOT NULL
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
                attack_time INTEGER NOT NULL,
                attack_count INTEGER NOT NULL,
                ip_count INTEGER,
                statis_time INTEGER NOT NULL
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

        sqlx::query("DELETE FROM attack_type_stats WHERE statis_time = ?")
            .bind(statis_time.timestamp())
            .execute(&mut *tx)
            .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO attack_type_stats
                    (id, user_id, sub_domain_id, top_domain_id, attack_type,
                     attack_time, attack_count, statis_time)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
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

        sqlx::query("DELETE FROM attack_ip_stats WHERE statis_time = ?")
            .bind(statis_time.timestamp())
            .execute(&mut *tx)
            .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO attack_ip_stats
                    (id, user_id, sub_domain_id, top_domain_id, attack_ip,
                     attack_time, attack_count, ip_count, statis_time)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
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

        sqlx::query("DELETE FROM target_url_stats WHERE statis_time = ?")
            .bind(statis_time.timestamp())
            .execute(&mut *tx)
            .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO target_url_stats
                    (id, user_id, sub_domain_id, top_domain_id, target_url,
                     attack_time, attack_count, ip_count, statis_time)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
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
            "SELECT COUNT(*) FROM {} WHERE statis_time = ?",
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
                "DELETE FROM {} WHERE statis_time < ?",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReportBatch;
    use crate::time::STATISTICS_OFFSET;
    use chrono::{TimeZone, Utc};

    async fn setup() -> SqliteStorage {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        storage
    }

    fn day(d: u32) -> DateTime<FixedOffset> {
        STATISTICS_OFFSET
            .with_ymd_and_hms(2024, 3, d, 0, 0, 0)
            .unwrap()
    }

    fn attack_type(id: &str, statis_time: DateTime<FixedOffset>) -> AttackTypeStat {
        AttackTypeStat {
            id: id.to_string(),
            user_id: "u1".to_string(),
            sub_domain_id: "s1".to_string(),
            top_domain_id: "d1".to_string(),
            attack_type: "sql_injection".to_string(),
            attack_time: Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap(),
            attack_count: 5,
            statis_time,
        }
    }

    #[tokio::test]
    async fn test_replace_is_idempotent_per_statis_time() {
        let storage = setup().await;
        let today = day(1);

        let first = vec![attack_type("a", today), attack_type("b", today)];
        storage.replace_attack_type(today, &first).await.unwrap();

        let rerun = vec![attack_type("c", today), attack_type("d", today)];
        storage.replace_attack_type(today, &rerun).await.unwrap();

        let count = storage
            .count_reports(ReportKind::AttackType, today)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_replace_keeps_other_days() {
        let storage = setup().await;

        storage
            .replace_attack_type(day(1), &[attack_type("a", day(1))])
            .await
            .unwrap();
        storage
            .replace_attack_type(day(2), &[attack_type("b", day(2))])
            .await
            .unwrap();

        assert_eq!(
            storage
                .count_reports(ReportKind::AttackType, day(1))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            storage
                .count_reports(ReportKind::AttackType, day(2))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_replace_batch_dispatches_by_shape() {
        let storage = setup().await;
        let today = day(1);
        let batch = ReportBatch::AttackIp(vec![AttackIpStat {
            id: "ip-1".to_string(),
            attack_ip: "10.0.0.1".to_string(),
            ip_count: Some(1),
            statis_time: today,
            ..Default::default()
        }]);

        let written = storage.replace_batch(today, &batch).await.unwrap();
        assert_eq!(written, 1);
        assert_eq!(
            storage
                .count_reports(ReportKind::AttackIp, today)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            storage
                .count_reports(ReportKind::AttackType, today)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_purge_reports_before_cutoff() {
        let storage = setup().await;
        storage
            .replace_attack_type(day(1), &[attack_type("a", day(1))])
            .await
            .unwrap();
        storage
            .replace_target_url(
                day(1),
                &[TargetUrlStat {
                    id: "u".to_string(),
                    target_url: "/login".to_string(),
                    statis_time: day(1),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();
        storage
            .replace_attack_type(day(3), &[attack_type("b", day(3))])
            .await
            .unwrap();

        let purged = storage.purge_reports_before(day(2)).await.unwrap();
        assert_eq!(purged, 2);
        assert_eq!(
            storage
                .count_reports(ReportKind::AttackType, day(3))
                .await
                .unwrap(),
            1
        );
    }
}
