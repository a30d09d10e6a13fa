//! Periodic, fleet-wide single-flight report jobs

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::lock::ExecutionGuard;
use crate::models::{AttackIpStat, AttackTypeStat, ReportKind, TargetUrlStat};
use crate::report::{ReportError, ReportResult, ReportService};
use crate::storage::ReportStore;
use crate::time::{begin_of_day, StatisticsWindow};

/// Lock scope shared by every retention pass, scheduled or manual
pub const RETENTION_SCOPE: &str = "retention";

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub report_interval: Duration,
    pub retention_interval: Duration,
    pub retention_days: i64,
    pub lock_key_prefix: String,
    pub lock_wait: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            report_interval: Duration::from_secs(3600),
            retention_interval: Duration::from_secs(86_400),
            retention_days: 30,
            lock_key_prefix: "waf-report".to_string(),
            lock_wait: Duration::ZERO,
        }
    }
}

/// Rows removed by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub documents: u64,
    pub reports: u64,
}

pub struct ReportScheduler {
    service: ReportService,
    store: Arc<dyn ReportStore>,
    guard: ExecutionGuard,
    settings: SchedulerSettings,
    shutdown: watch::Receiver<bool>,
}

impl ReportScheduler {
    pub fn new(
        service: ReportService,
        store: Arc<dyn ReportStore>,
        guard: ExecutionGuard,
        settings: SchedulerSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            store,
            guard,
            settings,
            shutdown,
        }
    }

    pub fn lock_key(&self, scope: &str) -> String {
        format!("{}:{}", self.settings.lock_key_prefix, scope)
    }

    /// Generate and persist one report kind for the statistics day containing
    /// `now`, guarded by the kind's lock. `Ok(None)` means another instance
    /// holds the lock.
    pub async fn run_report(&self, kind: ReportKind, now: DateTime<Utc>) -> ReportResult<Option<u64>> {
        let window = StatisticsWindow::day_of(now);
        let store = self.store.as_ref();
        let key = self.lock_key(kind.as_str());

        self.guard
            .run_guarded(&key, self.settings.lock_wait, || async move {
                match kind {
                    ReportKind::AttackType => {
                        self.service
                            .run_and_persist::<AttackTypeStat>(store, window, now)
                            .await
                    }
                    ReportKind::AttackIp => {
                        self.service
                            .run_and_persist::<AttackIpStat>(store, window, now)
                            .await
                    }
                    ReportKind::TargetUrl => {
                        self.service
                            .run_and_persist::<TargetUrlStat>(store, window, now)
                            .await
                    }
                }
            })
            .await
    }

    /// Delete source documents and report rows older than the retention period
    pub async fn run_retention(&self, now: DateTime<Utc>) -> ReportResult<Option<RetentionOutcome>> {
        let cutoff = now - ChronoDuration::days(self.settings.retention_days);
        purge_before(
            &self.guard,
            &self.service,
            self.store.as_ref(),
            &self.lock_key(RETENTION_SCOPE),
            self.settings.lock_wait,
            cutoff,
        )
        .await
    }

    /// Spawn one task per report kind plus the retention task. Tasks exit when
    /// the shutdown signal flips.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(ReportKind::ALL.len() + 1);

        for kind in ReportKind::ALL {
            let scheduler = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                scheduler.report_loop(kind).await;
            }));
        }

        let scheduler = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            scheduler.retention_loop().await;
        }));

        handles
    }

    async fn report_loop(&self, kind: ReportKind) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.settings.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(kind = %kind, interval_secs = self.settings.report_interval.as_secs(), "report task started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_report(kind, Utc::now()).await {
                        Ok(Some(written)) => info!(kind = %kind, written, "report persisted"),
                        Ok(None) => {}
                        Err(e) => error!(kind = %kind, error = %e, "report run failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(kind = %kind, "report task stopped");
    }

    async fn retention_loop(&self) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.settings.retention_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_retention(Utc::now()).await {
                        Ok(Some(outcome)) => info!(
                            documents = outcome.documents,
                            reports = outcome.reports,
                            "retention pass finished"
                        ),
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "retention pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("retention task stopped");
    }
}

/// Remove documents with a statistics date on or before `cutoff` and report
/// rows stamped before its statistics day, under `lock_key`
pub async fn purge_before(
    guard: &ExecutionGuard,
    service: &ReportService,
    store: &dyn ReportStore,
    lock_key: &str,
    max_wait: Duration,
    cutoff: DateTime<Utc>,
) -> ReportResult<Option<RetentionOutcome>> {
    guard
        .run_guarded(lock_key, max_wait, || async move {
            let documents = service.index().delete_before(cutoff).await?;
            let reports = store.purge_reports_before(begin_of_day(cutoff)).await?;
            Ok::<_, ReportError>(RetentionOutcome { documents, reports })
        })
        .await
}
