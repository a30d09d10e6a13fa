use serde_json::{json, Map, Value};

use crate::models::ReportKind;
use crate::time::StatisticsWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Number of events carrying the field
    Count,
    /// Distinct values of the field
    Cardinality,
}

/// Terminal aggregation producing one scalar per bucket path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricNode {
    pub name: String,
    pub field: String,
    pub kind: MetricKind,
}

impl MetricNode {
    pub fn count(name: &str, field: &str) -> Self {
        Self {
            name: name.to_string(),
            field: field.to_string(),
            kind: MetricKind::Count,
        }
    }

    pub fn cardinality(name: &str, field: &str) -> Self {
        Self {
            name: name.to_string(),
            field: field.to_string(),
            kind: MetricKind::Cardinality,
        }
    }

    fn to_json(&self) -> Value {
        match self.kind {
            MetricKind::Count => json!({ "value_count": { "field": self.field } }),
            MetricKind::Cardinality => json!({ "cardinality": { "field": self.field } }),
        }
    }
}

/// Drops buckets whose `metric` is zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSelector {
    pub name: String,
    pub metric: String,
}

impl BucketSelector {
    fn to_json(&self) -> Value {
        json!({
            "bucket_selector": {
                "buckets_path": { "count": self.metric },
                "script": "params.count > 0"
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bucketing {
    /// One bucket per distinct value, at most `size` buckets
    Terms { size: usize },
    /// One-hour date histogram
    Hourly { selector: Option<BucketSelector> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelChild {
    Group(Box<GroupingLevel>),
    Metrics(Vec<MetricNode>),
}

/// One group-by dimension in a strictly linear chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingLevel {
    pub name: String,
    pub field: String,
    pub bucketing: Bucketing,
    pub child: LevelChild,
}

impl GroupingLevel {
    /// This level and every level nested beneath it, outermost first
    pub fn chain(&self) -> Vec<&GroupingLevel> {
        let mut levels = vec![self];
        let mut current = self;
        while let LevelChild::Group(next) = &current.child {
            levels.push(&**next);
            current = &**next;
        }
        levels
    }

    /// Metrics at the end of the chain
    pub fn metrics(&self) -> &[MetricNode] {
        let mut current = self;
        loop {
            match &current.child {
                LevelChild::Group(next) => current = &**next,
                LevelChild::Metrics(metrics) => return metrics,
            }
        }
    }

    fn to_json(&self) -> Value {
        let mut body = Map::new();
        match &self.bucketing {
            Bucketing::Terms { size } => {
                body.insert(
                    "terms".to_string(),
                    json!({ "field": self.field, "size": size }),
                );
            }
            Bucketing::Hourly { .. } => {
                body.insert(
                    "date_histogram".to_string(),
                    json!({ "field": self.field, "calendar_interval": "1h" }),
                );
            }
        }

        let mut aggs = Map::new();
        if let Bucketing::Hourly {
            selector: Some(selector),
        } = &self.bucketing
        {
            aggs.insert(selector.name.clone(), selector.to_json());
        }
        match &self.child {
            LevelChild::Group(next) => {
                aggs.insert(next.name.clone(), next.to_json());
            }
            LevelChild::Metrics(metrics) => {
                for metric in metrics {
                    aggs.insert(metric.name.clone(), metric.to_json());
                }
            }
        }
        body.insert("aggs".to_string(), Value::Object(aggs));
        Value::Object(body)
    }
}

/// Inclusive range filter on a date field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFilter {
    pub field: String,
    pub window: StatisticsWindow,
}

/// Complete aggregation request for one report shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportQuery {
    pub kind: ReportKind,
    pub filter: RangeFilter,
    pub root: GroupingLevel,
}

impl ReportQuery {
    /// Elasticsearch `_search` body: no hits, only aggregations
    pub fn to_search_body(&self) -> Value {
        json!({
            "size": 0,
            "query": {
                "range": {
                    self.filter.field.as_str(): {
                        "gte": self.filter.window.start.timestamp_millis(),
                        "lte": self.filter.window.end.timestamp_millis(),
                        "format": "epoch_millis"
                    }
                }
            },
            "aggs": { self.root.name.as_str(): self.root.to_json() }
        })
    }
}
