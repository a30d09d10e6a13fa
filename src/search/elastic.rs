//! Elasticsearch-backed document index.
//!
//! Aggregation requests are sent with `typed_keys=true` so every result name in
//! the response carries its aggregation type (`date_histogram#attackTime`),
//! which tells histogram bucket keys apart from plain numeric keys.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::aggregation::{Aggregation, Bucket, EngineScalar};
use crate::models::DefendLogDocument;
use crate::query::ReportQuery;
use crate::search::{EventIndex, SearchError, SearchResult};

const TIMESTAMP_KEYED_TYPES: &[&str] = &["date_histogram", "auto_date_histogram"];

/// Bucket entries that are bucket metadata rather than sub-aggregations
const BUCKET_METADATA: &[&str] = &[
    "key",
    "key_as_string",
    "doc_count",
    "bg_count",
    "score",
    "from",
    "from_as_string",
    "to",
    "to_as_string",
];

pub struct ElasticsearchIndex {
    client: Client,
    base_url: String,
    index: String,
    bulk_batch_size: usize,
}

impl ElasticsearchIndex {
    pub fn new(base_url: &str, index: &str, bulk_batch_size: usize) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Elasticsearch HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            bulk_batch_size: bulk_batch_size.max(1),
        })
    }

    async fn post_json(&self, url: String, body: &Value) -> SearchResult<Value> {
        let response = self.client.post(&url).json(body).send().await?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> SearchResult<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SearchError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<Value>().await?)
}

#[async_trait]
impl EventIndex for ElasticsearchIndex {
    async fn search_aggregations(&self, query: &ReportQuery) -> SearchResult<Vec<Aggregation>> {
        let url = format!("{}/{}/_search?typed_keys=true", self.base_url, self.index);
        let response = self.post_json(url, &query.to_search_body()).await?;

        match response.get("aggregations") {
            Some(Value::Object(aggregations)) => parse_aggregations(aggregations),
            Some(other) => Err(SearchError::Malformed(format!(
                "`aggregations` is not an object: {other}"
            ))),
            None => Ok(Vec::new()),
        }
    }

    async fn insert_logs(&self, documents: Vec<DefendLogDocument>) -> SearchResult<usize> {
        let total = documents.len();
        let url = format!("{}/_bulk", self.base_url);

        for chunk in documents.chunks(self.bulk_batch_size) {
            let mut body = String::new();
            for doc in chunk {
                let action = json!({ "index": { "_index": self.index, "_id": doc.log_id } });
                body.push_str(&action.to_string());
                body.push('\n');
                body.push_str(
                    &serde_json::to_string(doc)
                        .map_err(|e| SearchError::Other(anyhow::Error::new(e)))?,
                );
                body.push('\n');
            }

            let response = self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "application/x-ndjson")
                .body(body)
                .send()
                .await?;
            let result = read_json(response).await?;

            if result.get("errors").and_then(Value::as_bool) == Some(true) {
                let failed = result
                    .get("items")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter(|item| item.pointer("/index/error").is_some())
                            .count()
                    })
                    .unwrap_or(chunk.len());
                warn!(failed, batch = chunk.len(), "bulk indexing reported errors");
                return Err(SearchError::Bulk { failed, total });
            }
            debug!(batch = chunk.len(), "indexed defense log batch");
        }

        Ok(total)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> SearchResult<u64> {
        let url = format!("{}/{}/_delete_by_query", self.base_url, self.index);
        let body = json!({
            "query": {
                "range": {
                    "statis_date": { "lte": cutoff.timestamp_millis(), "format": "epoch_millis" }
                }
            }
        });
        let response = self.post_json(url, &body).await?;
        response
            .get("deleted")
            .and_then(Value::as_u64)
            .ok_or_else(|| SearchError::Malformed("missing `deleted` count".to_string()))
    }
}

/// Convert an `aggregations` object into one tree level.
///
/// Results that are neither bucketed nor single-valued (e.g. `stats`) are
/// skipped.
pub fn parse_aggregations(aggregations: &Map<String, Value>) -> SearchResult<Vec<Aggregation>> {
    let mut level = Vec::with_capacity(aggregations.len());
    for (typed_name, body) in aggregations {
        let (agg_type, name) = match typed_name.split_once('#') {
            Some((agg_type, name)) => (Some(agg_type), name),
            None => (None, typed_name.as_str()),
        };

        let Value::Object(body) = body else {
            return Err(SearchError::Malformed(format!(
                "aggregation `{typed_name}` is not an object"
            )));
        };

        if let Some(buckets) = body.get("buckets") {
            let timestamp_keys = agg_type.is_some_and(|t| TIMESTAMP_KEYED_TYPES.contains(&t));
            let buckets = parse_buckets(typed_name, buckets, timestamp_keys)?;
            level.push(Aggregation::multi_bucket(name, buckets));
        } else if let Some(value) = body.get("value") {
            level.push(Aggregation::single_value(name, metric_scalar(value)));
        } else {
            debug!(aggregation = %typed_name, "skipping unsupported aggregation result");
        }
    }
    Ok(level)
}

fn parse_buckets(owner: &str, buckets: &Value, timestamp_keys: bool) -> SearchResult<Vec<Bucket>> {
    match buckets {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(bucket) => {
                    let key = bucket.get("key").cloned().unwrap_or(Value::Null);
                    parse_bucket(bucket, key, timestamp_keys)
                }
                _ => Err(SearchError::Malformed(format!(
                    "bucket of `{owner}` is not an object"
                ))),
            })
            .collect(),
        // Keyed buckets (filters, keyed ranges) carry their key as the entry name
        Value::Object(keyed) => keyed
            .iter()
            .map(|(key, item)| match item {
                Value::Object(bucket) => {
                    parse_bucket(bucket, Value::String(key.clone()), timestamp_keys)
                }
                _ => Err(SearchError::Malformed(format!(
                    "bucket `{key}` of `{owner}` is not an object"
                ))),
            })
            .collect(),
        _ => Err(SearchError::Malformed(format!(
            "`buckets` of `{owner}` is neither a list nor an object"
        ))),
    }
}

fn parse_bucket(
    bucket: &Map<String, Value>,
    key: Value,
    timestamp_keys: bool,
) -> SearchResult<Bucket> {
    let key = match key {
        Value::Number(n) if timestamp_keys && n.is_i64() => {
            EngineScalar::Timestamp(n.as_i64().unwrap_or_default())
        }
        other => key_scalar(other),
    };
    let doc_count = bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0);

    let children: Map<String, Value> = bucket
        .iter()
        .filter(|(name, value)| !BUCKET_METADATA.contains(&name.as_str()) && value.is_object())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    Ok(Bucket::new(key, doc_count, parse_aggregations(&children)?))
}

fn key_scalar(key: Value) -> EngineScalar {
    match key {
        Value::String(s) => EngineScalar::Keyword(s),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => EngineScalar::Long(i),
            (None, Some(f)) => EngineScalar::Double(f),
            _ => EngineScalar::Json(Value::Number(n)),
        },
        other => EngineScalar::Json(other),
    }
}

fn metric_scalar(value: &Value) -> EngineScalar {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) => EngineScalar::Double(f),
            None => EngineScalar::Json(value.clone()),
        },
        Value::String(s) => EngineScalar::Keyword(s.clone()),
        other => EngineScalar::Json(other.clone()),
    }
}
