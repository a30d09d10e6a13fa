//! Report generation
//!
//! A report run builds the aggregation request for one record shape, executes
//! it against the event index, flattens the bucket tree into rows, hydrates the
//! rows into records and stamps every record with the run's statistics time.

pub mod scheduler;

use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::aggregation::{flatten_response, Hydrator, ReportRecord};
use crate::lock::LockError;
use crate::models::{AttackIpStat, AttackTypeStat, ReportBatch, TargetUrlStat};
use crate::query::ReportQueryBuilder;
use crate::search::{EventIndex, SearchError};
use crate::storage::{ReportStore, StorageError};
use crate::time::{begin_of_day, StatisticsWindow};

pub use scheduler::{
    purge_before, ReportScheduler, RetentionOutcome, SchedulerSettings, RETENTION_SCOPE,
};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("search failed: {0}")]
    Search(#[from] SearchError),
    #[error("persisting reports failed: {0}")]
    Storage(#[from] StorageError),
    #[error("lock backend failed: {0}")]
    Lock(#[from] LockError),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Stamped records of one shape from a single run
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReport<R> {
    pub statis_time: DateTime<FixedOffset>,
    pub records: Vec<R>,
}

#[derive(Clone)]
pub struct ReportService {
    index: Arc<dyn EventIndex>,
    hydrator: Hydrator,
    builder: ReportQueryBuilder,
}

impl ReportService {
    pub fn new(index: Arc<dyn EventIndex>, hydrator: Hydrator, builder: ReportQueryBuilder) -> Self {
        Self {
            index,
            hydrator,
            builder,
        }
    }

    pub fn index(&self) -> &Arc<dyn EventIndex> {
        &self.index
    }

    /// Compute the report for `R` over `window`, stamped relative to `run_at`
    pub async fn generate<R: ReportRecord>(
        &self,
        window: StatisticsWindow,
        run_at: DateTime<Utc>,
    ) -> ReportResult<GeneratedReport<R>> {
        let query = self.builder.build(R::KIND, window);
        let aggregations = self.index.search_aggregations(&query).await?;
        let rows = flatten_response(&aggregations);
        let row_count = rows.len();

        let statis_time = begin_of_day(run_at);
        let mut records = self.hydrator.hydrate::<R>(rows);
        for record in &mut records {
            record.stamp(statis_time, Uuid::now_v7().to_string());
        }

        info!(
            kind = %R::KIND,
            rows = row_count,
            records = records.len(),
            "report generated"
        );

        Ok(GeneratedReport {
            statis_time,
            records,
        })
    }

    pub async fn attack_type_report(
        &self,
        window: StatisticsWindow,
        run_at: DateTime<Utc>,
    ) -> ReportResult<GeneratedReport<AttackTypeStat>> {
        self.generate(window, run_at).await
    }

    pub async fn attack_ip_report(
        &self,
        window: StatisticsWindow,
        run_at: DateTime<Utc>,
    ) -> ReportResult<GeneratedReport<AttackIpStat>> {
        self.generate(window, run_at).await
    }

    pub async fn target_url_report(
        &self,
        window: StatisticsWindow,
        run_at: DateTime<Utc>,
    ) -> ReportResult<GeneratedReport<TargetUrlStat>> {
        self.generate(window, run_at).await
    }

    /// Generate the report for `R` and replace the stored rows of the same
    /// statistics time. Returns the number of rows written.
    pub async fn run_and_persist<R: ReportRecord>(
        &self,
        store: &dyn ReportStore,
        window: StatisticsWindow,
        run_at: DateTime<Utc>,
    ) -> ReportResult<u64> {
        let report = self.generate::<R>(window, run_at).await?;
        let batch: ReportBatch = R::into_batch(report.records);
        let written = store.replace_batch(report.statis_time, &batch).await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DefendLogDocument;
    use crate::search::MemoryIndex;
    use crate::time::STATISTICS_OFFSET;
    use chrono::{TimeZone, Timelike};

    fn doc(log_id: &str, user: &str, ip: &str, url: &str, hour: u32) -> DefendLogDocument {
        DefendLogDocument {
            log_id: log_id.to_string(),
            statis_date: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            target_url: url.to_string(),
            site_name: "site".to_string(),
            atk_ip: ip.to_string(),
            atk_type: "xss".to_string(),
            rule_id: "r1".to_string(),
            rule_level: "high".to_string(),
            log_time: Utc.with_ymd_and_hms(2024, 3, 1, hour, 15, 0).unwrap(),
            top_domain_id: "top".to_string(),
            sub_domain_id: "sub".to_string(),
            user_id: user.to_string(),
        }
    }

    async fn service(docs: Vec<DefendLogDocument>) -> ReportService {
        let index = MemoryIndex::new();
        index.insert_logs(docs).await.unwrap();
        ReportService::new(
            Arc::new(index),
            Hydrator::default(),
            ReportQueryBuilder::default(),
        )
    }

    fn window() -> StatisticsWindow {
        StatisticsWindow::new(
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_target_url_report_counts_distinct_ips() {
        let service = service(vec![
            doc("1", "u1", "10.0.0.1", "/login", 3),
            doc("2", "u1", "10.0.0.2", "/login", 3),
            doc("3", "u1", "10.0.0.2", "/login", 3),
        ])
        .await;

        let report = service
            .target_url_report(window(), Utc::now())
            .await
            .unwrap();

        assert_eq!(report.records.len(), 1);
        let record = &report.records[0];
        assert_eq!(record.target_url, "/login");
        assert_eq!(record.attack_count, 3);
        assert_eq!(record.ip_count, Some(2));
        assert_eq!(record.attack_time.hour(), 3);
    }

    #[tokio::test]
    async fn test_records_are_stamped_with_begin_of_day() {
        let service = service(vec![
            doc("1", "u1", "10.0.0.1", "/a", 1),
            doc("2", "u2", "10.0.0.1", "/a", 1),
        ])
        .await;
        let run_at = Utc.with_ymd_and_hms(2024, 3, 1, 18, 30, 0).unwrap();

        let report = service.attack_ip_report(window(), run_at).await.unwrap();

        let expected = STATISTICS_OFFSET
            .with_ymd_and_hms(2024, 3, 2, 0, 0, 0)
            .unwrap();
        assert_eq!(report.statis_time, expected);
        assert_eq!(report.records.len(), 2);
        assert!(report.records.iter().all(|r| r.statis_time == expected));
        assert_ne!(report.records[0].id, report.records[1].id);
        assert!(report.records.iter().all(|r| !r.id.is_empty()));
    }

    #[tokio::test]
    async fn test_empty_index_yields_no_records() {
        let service = service(Vec::new()).await;
        let report = service
            .attack_type_report(window(), Utc::now())
            .await
            .unwrap();
        assert!(report.records.is_empty());
    }
}
