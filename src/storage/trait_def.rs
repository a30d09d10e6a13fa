use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use thiserror::Error;

use crate::models::{AttackIpStat, AttackTypeStat, ReportBatch, ReportKind, TargetUrlStat};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence for generated report rows.
///
/// Each `replace_*` call swaps out every row of that shape stamped with
/// `statis_time` inside one transaction, so re-running a day's report never
/// duplicates rows.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Initialize the storage (create tables, indexes)
    async fn init(&self) -> Result<()>;

    async fn replace_attack_type(
        &self,
        statis_time: DateTime<FixedOffset>,
        records: &[AttackTypeStat],
    ) -> StorageResult<u64>;

    async fn replace_attack_ip(
        &self,
        statis_time: DateTime<FixedOffset>,
        records: &[AttackIpStat],
    ) -> StorageResult<u64>;

    async fn replace_target_url(
        &self,
        statis_time: DateTime<FixedOffset>,
        records: &[TargetUrlStat],
    ) -> StorageResult<u64>;

    /// Number of stored rows of `kind` stamped with `statis_time`
    async fn count_reports(
        &self,
        kind: ReportKind,
        statis_time: DateTime<FixedOffset>,
    ) -> StorageResult<i64>;

    /// Delete report rows of every shape stamped before `cutoff`
    async fn purge_reports_before(&self, cutoff: DateTime<FixedOffset>) -> StorageResult<u64>;

    async fn replace_batch(
        &self,
        statis_time: DateTime<FixedOffset>,
        batch: &ReportBatch,
    ) -> StorageResult<u64> {
        match batch {
            ReportBatch::AttackType(records) => self.replace_attack_type(statis_time, records).await,
            ReportBatch::AttackIp(records) => self.replace_attack_ip(statis_time, records).await,
            ReportBatch::TargetUrl(records) => self.replace_target_url(statis_time, records).await,
        }
    }
}

pub(crate) fn table_for(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::AttackType => "attack_type_stats",
        ReportKind::AttackIp => "attack_ip_stats",
        ReportKind::TargetUrl => "target_url_stats",
    }
}
