//! Flattening of nested bucket aggregations into denormalized rows
//!
//! Every bucket contributes its key to the rows produced beneath it, and
//! sibling aggregations at the same level are combined with a cartesian merge,
//! so a tree with bucket counts `n1, n2, ..., nk` yields `n1 * n2 * ... * nk`
//! rows, each carrying every leaf metric.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::aggregation::tree::{Aggregation, AggregationResult};
use crate::aggregation::value::{normalize, FieldValue};

/// One denormalized row: dimension/metric name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FlatRow {
    fields: BTreeMap<String, FieldValue>,
}

impl FlatRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Union of both rows; on a name collision `other` wins
    fn merged_with(&self, other: &FlatRow) -> FlatRow {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        FlatRow { fields }
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for FlatRow {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Flatten one tree level beneath `parent`.
///
/// An empty level is the recursion base and yields a copy of `parent`.
pub fn flatten(level: &[Aggregation], parent: &FlatRow) -> Vec<FlatRow> {
    if level.is_empty() {
        return vec![parent.clone()];
    }

    let mut rows = Vec::new();
    for aggregation in level {
        let produced = match &aggregation.result {
            AggregationResult::MultiBucket(buckets) => {
                let mut bucket_rows = Vec::new();
                for bucket in buckets {
                    let mut row = parent.clone();
                    row.insert(aggregation.name.as_str(), normalize(&bucket.key));
                    bucket_rows.extend(flatten(&bucket.children, &row));
                }
                bucket_rows
            }
            AggregationResult::SingleValue(value) => {
                let mut row = parent.clone();
                row.insert(aggregation.name.as_str(), normalize(value));
                vec![row]
            }
        };
        rows = cross_merge(rows, produced);
    }
    rows
}

/// Flatten a complete engine response.
///
/// Unlike [`flatten`], a response with no aggregations at all yields no rows.
pub fn flatten_response(aggregations: &[Aggregation]) -> Vec<FlatRow> {
    if aggregations.is_empty() {
        return Vec::new();
    }
    flatten(aggregations, &FlatRow::new())
}

/// Cartesian merge of two independent row lists.
///
/// When exactly one side is empty the other passes through unchanged, so an
/// aggregation whose buckets were all suppressed does not wipe out its
/// siblings' rows.
pub fn cross_merge(left: Vec<FlatRow>, right: Vec<FlatRow>) -> Vec<FlatRow> {
    if left.is_empty() {
        return right;
    }
    if right.is_empty() {
        return left;
    }

    let mut merged = Vec::with_capacity(left.len() * right.len());
    for l in &left {
        for r in &right {
            merged.push(l.merged_with(r));
        }
    }
    merged
}
