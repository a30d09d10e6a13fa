use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::lock::LockSettings;
use crate::report::SchedulerSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub search: SearchConfig,
    pub database: DatabaseConfig,
    pub lock: LockConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub backend: SearchBackend,
    pub url: String,
    pub index: String,
    pub bulk_batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    Memory,
    Elasticsearch,
}

impl SearchBackend {
    /// Parse `SEARCH_BACKEND`. Unset means Elasticsearch; the memory index is
    /// private to one process and only suits tests and demos.
    pub fn from_setting(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return SearchBackend::Elasticsearch;
        };
        match value.trim().to_lowercase().as_str() {
            "elasticsearch" | "es" => SearchBackend::Elasticsearch,
            "memory" => SearchBackend::Memory,
            other => {
                tracing::warn!(
                    "Unknown SEARCH_BACKEND '{other}', falling back to 'elasticsearch'. Supported values: memory, elasticsearch"
                );
                SearchBackend::Elasticsearch
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    pub backend: LockBackendKind,
    pub key_prefix: String,
    pub wait_secs: u64,
    pub lease_secs: u64,
    pub poll_ms: u64,
}

/// Where leases live: process memory (single instance) or the report database
/// (shared by the fleet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackendKind {
    Memory,
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub interval_secs: u64,
    pub default_term_size: usize,
    pub retention_days: i64,
    pub retention_interval_secs: u64,
}

impl LockConfig {
    pub fn settings(&self) -> LockSettings {
        LockSettings {
            lease: Duration::from_secs(self.lease_secs),
            poll_interval: Duration::from_millis(self.poll_ms),
        }
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let search_backend =
            SearchBackend::from_setting(std::env::var("SEARCH_BACKEND").ok().as_deref());
        let search_url = env_or("ELASTICSEARCH_URL", "http://127.0.0.1:9200");
        let search_index = env_or("ELASTICSEARCH_INDEX", "waf_defend_log");
        let bulk_batch_size = parse_env("BULK_BATCH_SIZE", 500usize)?;

        let database_backend = match env_or("DATABASE_BACKEND", "sqlite").to_lowercase().as_str()
        {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };
        let database_url = env_or("DATABASE_URL", "sqlite://./bulwark.db?mode=rwc");
        let max_connections = parse_env("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let lock_backend = match env_or("LOCK_BACKEND", "database").to_lowercase().as_str() {
            "memory" => LockBackendKind::Memory,
            "database" | "db" => LockBackendKind::Database,
            other => {
                tracing::warn!(
                    "Unknown LOCK_BACKEND '{other}', falling back to 'database'. Supported values: memory, database"
                );
                LockBackendKind::Database
            }
        };

        let lease_secs = parse_env("LOCK_LEASE_SECS", 60u64)?;
        if lease_secs == 0 {
            anyhow::bail!("LOCK_LEASE_SECS must be greater than zero");
        }

        Ok(Config {
            search: SearchConfig {
                backend: search_backend,
                url: search_url,
                index: search_index,
                bulk_batch_size,
            },
            database: DatabaseConfig {
                backend: database_backend,
                url: database_url,
                max_connections,
            },
            lock: LockConfig {
                backend: lock_backend,
                key_prefix: env_or("LOCK_KEY_PREFIX", "waf-report"),
                wait_secs: parse_env("LOCK_WAIT_SECS", 0u64)?,
                lease_secs,
                poll_ms: parse_env("LOCK_POLL_MS", 100u64)?,
            },
            report: ReportConfig {
                interval_secs: parse_env("REPORT_INTERVAL_SECS", 3600u64)?,
                default_term_size: parse_env("DEFAULT_TERM_SIZE", 10_000usize)?,
                retention_days: parse_env("RETENTION_DAYS", 30i64)?,
                retention_interval_secs: parse_env("RETENTION_INTERVAL_SECS", 86_400u64)?,
            },
        })
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            report_interval: Duration::from_secs(self.report.interval_secs),
            retention_interval: Duration::from_secs(self.report.retention_interval_secs),
            retention_days: self.report.retention_days,
            lock_key_prefix: self.lock.key_prefix.clone(),
            lock_wait: self.lock.wait(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
