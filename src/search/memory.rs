//! In-process document index.
//!
//! Evaluates report queries with the same result shape as the search engine:
//! terms buckets ordered by document count, hourly histogram buckets in time
//! order with empty hours filled in, and bucket selectors applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

use crate::aggregation::{Aggregation, AggregationResult, Bucket, EngineScalar};
use crate::models::DefendLogDocument;
use crate::query::{Bucketing, GroupingLevel, LevelChild, MetricKind, MetricNode, ReportQuery};
use crate::search::{EventIndex, SearchResult};
use crate::time::hour_bucket_millis;

const HOUR_MILLIS: i64 = 3_600_000;

#[derive(Default)]
struct DocumentStore {
    documents: Vec<DefendLogDocument>,
    /// `log_id` -> position in `documents`
    positions: HashMap<String, usize>,
}

impl DocumentStore {
    fn upsert(&mut self, doc: DefendLogDocument) {
        match self.positions.get(&doc.log_id).copied() {
            Some(pos) => self.documents[pos] = doc,
            None => {
                self.positions.insert(doc.log_id.clone(), self.documents.len());
                self.documents.push(doc);
            }
        }
    }

    fn retain_after(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.documents.len();
        self.documents.retain(|doc| doc.statis_date > cutoff);
        let removed = before - self.documents.len();
        if removed > 0 {
            self.positions = self
                .documents
                .iter()
                .enumerate()
                .map(|(pos, doc)| (doc.log_id.clone(), pos))
                .collect();
        }
        removed
    }
}

#[derive(Default)]
pub struct MemoryIndex {
    store: RwLock<DocumentStore>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.documents.is_empty()
    }
}

#[async_trait]
impl EventIndex for MemoryIndex {
    async fn search_aggregations(&self, query: &ReportQuery) -> SearchResult<Vec<Aggregation>> {
        let store = self.store.read().await;
        let matching: Vec<&DefendLogDocument> = store
            .documents
            .iter()
            .filter(|doc| {
                doc.timestamp(&query.filter.field)
                    .is_some_and(|t| query.filter.window.contains(t))
            })
            .collect();

        debug!(
            kind = %query.kind,
            matched = matching.len(),
            "evaluating report query in memory"
        );
        Ok(vec![evaluate_level(&query.root, &matching)])
    }

    async fn insert_logs(&self, documents: Vec<DefendLogDocument>) -> SearchResult<usize> {
        let count = documents.len();
        let mut store = self.store.write().await;
        for doc in documents {
            store.upsert(doc);
        }
        Ok(count)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> SearchResult<u64> {
        let removed = self.store.write().await.retain_after(cutoff);
        Ok(removed as u64)
    }
}

fn evaluate_level(level: &GroupingLevel, docs: &[&DefendLogDocument]) -> Aggregation {
    let buckets = match &level.bucketing {
        Bucketing::Terms { size } => terms_buckets(level, docs, *size),
        Bucketing::Hourly { selector } => {
            let mut buckets = hourly_buckets(level, docs);
            if let Some(selector) = selector {
                buckets.retain(|bucket| metric_value(bucket, &selector.metric) > 0.0);
            }
            buckets
        }
    };
    Aggregation::multi_bucket(level.name.as_str(), buckets)
}

fn terms_buckets(level: &GroupingLevel, docs: &[&DefendLogDocument], size: usize) -> Vec<Bucket> {
    let mut groups: HashMap<&str, Vec<&DefendLogDocument>> = HashMap::new();
    for &doc in docs {
        if let Some(key) = doc.keyword(&level.field) {
            groups.entry(key).or_default().push(doc);
        }
    }

    let mut groups: Vec<(&str, Vec<&DefendLogDocument>)> = groups.into_iter().collect();
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));
    groups.truncate(size);

    groups
        .into_iter()
        .map(|(key, group)| {
            Bucket::new(
                EngineScalar::Keyword(key.to_string()),
                group.len() as u64,
                evaluate_child(&level.child, &group),
            )
        })
        .collect()
}

fn hourly_buckets(level: &GroupingLevel, docs: &[&DefendLogDocument]) -> Vec<Bucket> {
    let mut groups: BTreeMap<i64, Vec<&DefendLogDocument>> = BTreeMap::new();
    for &doc in docs {
        if let Some(t) = doc.timestamp(&level.field) {
            groups.entry(hour_bucket_millis(t)).or_default().push(doc);
        }
    }

    let (Some(&first), Some(&last)) = (groups.keys().next(), groups.keys().next_back()) else {
        return Vec::new();
    };

    // Hours between the first and last event come back as empty buckets
    let mut buckets = Vec::new();
    let mut hour = first;
    while hour <= last {
        let group = groups.remove(&hour).unwrap_or_default();
        buckets.push(Bucket::new(
            EngineScalar::Timestamp(hour),
            group.len() as u64,
            evaluate_child(&level.child, &group),
        ));
        hour += HOUR_MILLIS;
    }
    buckets
}

fn evaluate_child(child: &LevelChild, docs: &[&DefendLogDocument]) -> Vec<Aggregation> {
    match child {
        LevelChild::Group(next) => vec![evaluate_level(next, docs)],
        LevelChild::Metrics(metrics) => metrics
            .iter()
            .map(|metric| evaluate_metric(metric, docs))
            .collect(),
    }
}

fn evaluate_metric(metric: &MetricNode, docs: &[&DefendLogDocument]) -> Aggregation {
    let values = docs.iter().filter_map(|&doc| doc.keyword(&metric.field));
    let value = match metric.kind {
        MetricKind::Count => values.count(),
        MetricKind::Cardinality => values.collect::<HashSet<_>>().len(),
    };
    Aggregation::single_value(metric.name.as_str(), EngineScalar::Double(value as f64))
}

fn metric_value(bucket: &Bucket, name: &str) -> f64 {
    bucket
        .children
        .iter()
        .find(|agg| agg.name == name)
        .and_then(|agg| match &agg.result {
            AggregationResult::SingleValue(EngineScalar::Double(v)) => Some(*v),
            _ => None,
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReportKind;
    use crate::query::ReportQueryBuilder;
    use crate::time::StatisticsWindow;
    use chrono::{Duration, TimeZone};

    fn doc(id: &str, user: &str, atk_type: &str, ip: &str, log_time: DateTime<Utc>) -> DefendLogDocument {
        DefendLogDocument {
            log_id: id.to_string(),
            statis_date: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            target_url: "/login".to_string(),
            site_name: "shop".to_string(),
            atk_ip: ip.to_string(),
            atk_type: atk_type.to_string(),
            rule_id: "1".to_string(),
            rule_level: "high".to_string(),
            log_time,
            top_domain_id: "top-1".to_string(),
            sub_domain_id: "sub-1".to_string(),
            user_id: user.to_string(),
        }
    }

    fn window() -> StatisticsWindow {
        StatisticsWindow::day_of(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
    }

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, 10, 0).unwrap()
    }

    #[tokio::test]
    async fn test_terms_buckets_ordered_by_count() {
        let index = MemoryIndex::new();
        index
            .insert_logs(vec![
                doc("1", "u1", "xss", "1.1.1.1", hour(1)),
                doc("2", "u2", "xss", "1.1.1.1", hour(1)),
                doc("3", "u2", "sqli", "1.1.1.2", hour(1)),
            ])
            .await
            .unwrap();

        let query = ReportQueryBuilder::default().build(ReportKind::AttackType, window());
        let tree = index.search_aggregations(&query).await.unwrap();
        let AggregationResult::MultiBucket(users) = &tree[0].result else {
            panic!("expected buckets");
        };
        assert_eq!(users[0].key, EngineScalar::Keyword("u2".into()));
        assert_eq!(users[0].doc_count, 2);
        assert_eq!(users[1].key, EngineScalar::Keyword("u1".into()));
    }

    #[tokio::test]
    async fn test_empty_hours_are_suppressed() {
        let index = MemoryIndex::new();
        index
            .insert_logs(vec![
                doc("1", "u1", "xss", "1.1.1.1", hour(1)),
                doc("2", "u1", "xss", "1.1.1.1", hour(4)),
            ])
            .await
            .unwrap();

        let query = ReportQueryBuilder::default().build(ReportKind::AttackType, window());
        let rows = crate::aggregation::flatten_response(
            &index.search_aggregations(&query).await.unwrap(),
        );
        // Hours 2 and 3 were filled in as empty buckets and then dropped
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_term_size_caps_buckets() {
        let index = MemoryIndex::new();
        let docs = (0..5)
            .map(|i| doc(&i.to_string(), &format!("u{i}"), "xss", "1.1.1.1", hour(1)))
            .collect();
        index.insert_logs(docs).await.unwrap();

        let query = ReportQueryBuilder::new(3).build(ReportKind::AttackType, window());
        let tree = index.search_aggregations(&query).await.unwrap();
        let AggregationResult::MultiBucket(users) = &tree[0].result else {
            panic!("expected buckets");
        };
        assert_eq!(users.len(), 3);
    }

    #[tokio::test]
    async fn test_window_and_retention() {
        let index = MemoryIndex::new();
        let mut old = doc("old", "u1", "xss", "1.1.1.1", hour(1));
        old.statis_date = old.statis_date - Duration::days(40);
        index
            .insert_logs(vec![old, doc("new", "u1", "xss", "1.1.1.1", hour(1))])
            .await
            .unwrap();

        let query = ReportQueryBuilder::default().build(ReportKind::AttackType, window());
        let rows = crate::aggregation::flatten_response(
            &index.search_aggregations(&query).await.unwrap(),
        );
        assert_eq!(rows.len(), 1);

        let cutoff = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        assert_eq!(index.delete_before(cutoff).await.unwrap(), 1);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_reinsert_replaces_by_log_id() {
        let index = MemoryIndex::new();
        index
            .insert_logs(vec![doc("1", "u1", "xss", "1.1.1.1", hour(1))])
            .await
            .unwrap();
        index
            .insert_logs(vec![doc("1", "u1", "sqli", "1.1.1.1", hour(1))])
            .await
            .unwrap();
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_replacement_after_delete_targets_surviving_document() {
        let index = MemoryIndex::new();
        let mut old = doc("old", "u1", "xss", "1.1.1.1", hour(1));
        old.statis_date = old.statis_date - Duration::days(40);
        index
            .insert_logs(vec![
                old,
                doc("a", "u1", "xss", "1.1.1.1", hour(1)),
                doc("b", "u2", "xss", "1.1.1.1", hour(1)),
            ])
            .await
            .unwrap();

        let cutoff = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        index.delete_before(cutoff).await.unwrap();
        index
            .insert_logs(vec![
                doc("b", "u3", "xss", "1.1.1.1", hour(1)),
                doc("c", "u4", "xss", "1.1.1.1", hour(1)),
            ])
            .await
            .unwrap();

        let store = index.store.read().await;
        let users: Vec<&str> = store.documents.iter().map(|d| d.user_id.as_str()).collect();
        assert_eq!(users, vec!["u1", "u3", "u4"]);
        assert_eq!(store.positions.len(), 3);
        assert_eq!(store.positions["b"], 1);
    }

    #[tokio::test]
    async fn test_bulk_insert_with_repeated_ids() {
        let index = MemoryIndex::new();
        let docs = (0..2_000)
            .map(|i| doc(&(i % 500).to_string(), "u1", "xss", "1.1.1.1", hour(1)))
            .collect();
        assert_eq!(index.insert_logs(docs).await.unwrap(), 2_000);
        assert_eq!(index.len().await, 500);
    }
}
