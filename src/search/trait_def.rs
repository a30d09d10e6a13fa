use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::aggregation::Aggregation;
use crate::models::DefendLogDocument;
use crate::query::ReportQuery;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("search engine returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed search response: {0}")]
    Malformed(String),
    #[error("bulk indexing rejected {failed} of {total} documents")]
    Bulk { failed: usize, total: usize },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SearchResult<T> = Result<T, SearchError>;

/// Document index holding defense logs
#[async_trait]
pub trait EventIndex: Send + Sync {
    /// Execute an aggregation request and return the top-level results
    async fn search_aggregations(&self, query: &ReportQuery) -> SearchResult<Vec<Aggregation>>;

    /// Index documents, replacing any with the same log id
    async fn insert_logs(&self, documents: Vec<DefendLogDocument>) -> SearchResult<usize>;

    /// Delete documents whose statistics date is on or before `cutoff`
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> SearchResult<u64>;
}
