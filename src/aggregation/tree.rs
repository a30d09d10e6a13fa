//! Bucket tree returned by the search engine for an aggregation request

use serde_json::Value;

/// Scalar exactly as the search engine reported it
#[derive(Debug, Clone, PartialEq)]
pub enum EngineScalar {
    /// Keyword bucket key or string metric
    Keyword(String),
    /// Integral bucket key
    Long(i64),
    /// Metric value (counts and cardinalities are reported as doubles)
    Double(f64),
    /// Date histogram bucket key, epoch milliseconds
    Timestamp(i64),
    /// Anything else (composite keys, booleans, nulls), kept verbatim
    Json(Value),
}

/// One distinct grouped value and the aggregations nested under it
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub key: EngineScalar,
    pub doc_count: u64,
    pub children: Vec<Aggregation>,
}

impl Bucket {
    pub fn new(key: EngineScalar, doc_count: u64, children: Vec<Aggregation>) -> Self {
        Self {
            key,
            doc_count,
            children,
        }
    }
}

/// Result shape of a single named aggregation
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationResult {
    MultiBucket(Vec<Bucket>),
    SingleValue(EngineScalar),
}

/// A named aggregation result.
///
/// A tree level is a `Vec<Aggregation>`: every sibling in it was evaluated over
/// the same parent bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub name: String,
    pub result: AggregationResult,
}

impl Aggregation {
    pub fn multi_bucket(name: impl Into<String>, buckets: Vec<Bucket>) -> Self {
        Self {
            name: name.into(),
            result: AggregationResult::MultiBucket(buckets),
        }
    }

    pub fn single_value(name: impl Into<String>, value: EngineScalar) -> Self {
        Self {
            name: name.into(),
            result: AggregationResult::SingleValue(value),
        }
    }
}
