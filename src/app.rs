//! Component wiring shared by the daemon and the admin CLI

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::aggregation::{AliasCache, Hydrator};
use crate::config::{Config, DatabaseBackend, LockBackendKind, SearchBackend};
use crate::lock::{
    ExecutionGuard, LockBackend, LockRegistry, MemoryLockBackend, PostgresLockBackend,
    SqliteLockBackend,
};
use crate::query::ReportQueryBuilder;
use crate::report::ReportService;
use crate::search::{ElasticsearchIndex, EventIndex, MemoryIndex};
use crate::storage::{PostgresStorage, ReportStore, SqliteStorage};

pub struct App {
    pub index: Arc<dyn EventIndex>,
    pub store: Arc<dyn ReportStore>,
    pub guard: ExecutionGuard,
    pub service: ReportService,
}

impl App {
    /// Connect every backend named by `config` and create the schema.
    /// `shutdown` interrupts pending lock waits when it flips.
    pub async fn build(config: &Config, shutdown: Option<watch::Receiver<bool>>) -> Result<Self> {
        let index: Arc<dyn EventIndex> = match config.search.backend {
            SearchBackend::Memory => {
                info!("Using in-memory event index");
                Arc::new(MemoryIndex::new())
            }
            SearchBackend::Elasticsearch => {
                info!(
                    "Using Elasticsearch index '{}' at {}",
                    config.search.index, config.search.url
                );
                Arc::new(ElasticsearchIndex::new(
                    &config.search.url,
                    &config.search.index,
                    config.search.bulk_batch_size,
                )?)
            }
        };

        let (store, database_locks): (Arc<dyn ReportStore>, Arc<dyn LockBackend>) =
            match config.database.backend {
                DatabaseBackend::Sqlite => {
                    info!("Using SQLite storage: {}", config.database.url);
                    let storage =
                        SqliteStorage::new(&config.database.url, config.database.max_connections)
                            .await
                            .context("failed to connect to SQLite")?;
                    let locks = SqliteLockBackend::from_pool(storage.pool());
                    (Arc::new(storage), Arc::new(locks))
                }
                DatabaseBackend::Postgres => {
                    info!("Using PostgreSQL storage: {}", config.database.url);
                    let storage = PostgresStorage::new(
                        &config.database.url,
                        config.database.max_connections,
                    )
                    .await
                    .context("failed to connect to PostgreSQL")?;
                    let locks = PostgresLockBackend::from_pool(storage.pool());
                    (Arc::new(storage), Arc::new(locks))
                }
            };

        info!("Initializing database...");
        store.init().await?;

        let locks: Arc<dyn LockBackend> = match config.lock.backend {
            LockBackendKind::Memory => Arc::new(MemoryLockBackend::new()),
            LockBackendKind::Database => database_locks,
        };
        locks
            .init()
            .await
            .context("failed to initialize lock backend")?;

        let mut registry = LockRegistry::new(locks, config.lock.settings());
        if let Some(shutdown) = shutdown {
            registry = registry.with_shutdown(shutdown);
        }

        let service = ReportService::new(
            Arc::clone(&index),
            Hydrator::new(Arc::new(AliasCache::new())),
            ReportQueryBuilder::new(config.report.default_term_size),
        );

        Ok(Self {
            index,
            store,
            guard: ExecutionGuard::new(registry),
            service,
        })
    }
}
