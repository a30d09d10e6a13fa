//! The three attack report shapes.
//!
//! All of them group `tenant -> sub-domain -> dimension -> top-domain -> hour`
//! and differ only in the dimension and the leaf metrics.

use crate::models::ReportKind;
use crate::query::spec::{
    BucketSelector, Bucketing, GroupingLevel, LevelChild, MetricNode, RangeFilter, ReportQuery,
};
use crate::time::StatisticsWindow;

/// Distinct-value cap applied to every terms level
pub const DEFAULT_TERM_SIZE: usize = 10_000;

pub const USER_ID: &str = "userId";
pub const SUB_DOMAIN_ID: &str = "subDomainId";
pub const DOMAIN_ID: &str = "domainId";
pub const ATTACK_TYPE: &str = "attackType";
pub const ATTACK_IP: &str = "attackIp";
pub const TARGET_URL: &str = "targetUrl";
pub const ATTACK_TIME: &str = "attackTime";
pub const ATTACK_COUNT: &str = "attackCount";
pub const IP_COUNT: &str = "ipCount";

const NULL_ATTACK_TIME_SELECTOR: &str = "null_attack_time_selector";
const STATISTICS_DATE_FIELD: &str = "statis_date";
const LOG_TIME_FIELD: &str = "log_time";
const ATTACK_IP_FIELD: &str = "atk_ip.keyword";

#[derive(Debug, Clone, Copy)]
pub struct ReportQueryBuilder {
    term_size: usize,
}

impl Default for ReportQueryBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TERM_SIZE)
    }
}

impl ReportQueryBuilder {
    pub fn new(term_size: usize) -> Self {
        Self { term_size }
    }

    pub fn term_size(&self) -> usize {
        self.term_size
    }

    pub fn build(&self, kind: ReportKind, window: StatisticsWindow) -> ReportQuery {
        let (dimension, dimension_field) = dimension_of(kind);

        let mut metrics = vec![MetricNode::count(ATTACK_COUNT, dimension_field)];
        if matches!(kind, ReportKind::AttackIp | ReportKind::TargetUrl) {
            metrics.push(MetricNode::cardinality(IP_COUNT, ATTACK_IP_FIELD));
        }

        let hourly = GroupingLevel {
            name: ATTACK_TIME.to_string(),
            field: LOG_TIME_FIELD.to_string(),
            bucketing: Bucketing::Hourly {
                selector: Some(BucketSelector {
                    name: NULL_ATTACK_TIME_SELECTOR.to_string(),
                    metric: ATTACK_COUNT.to_string(),
                }),
            },
            child: LevelChild::Metrics(metrics),
        };

        let root = [
            (USER_ID, "user_id.keyword"),
            (SUB_DOMAIN_ID, "sub_domain_id.keyword"),
            (dimension, dimension_field),
            (DOMAIN_ID, "top_domain_id.keyword"),
        ]
        .into_iter()
        .rev()
        .fold(hourly, |child, (name, field)| self.terms(name, field, child));

        ReportQuery {
            kind,
            filter: RangeFilter {
                field: STATISTICS_DATE_FIELD.to_string(),
                window,
            },
            root,
        }
    }

    fn terms(&self, name: &str, field: &str, child: GroupingLevel) -> GroupingLevel {
        GroupingLevel {
            name: name.to_string(),
            field: field.to_string(),
            bucketing: Bucketing::Terms {
                size: self.term_size,
            },
            child: LevelChild::Group(Box::new(child)),
        }
    }
}

fn dimension_of(kind: ReportKind) -> (&'static str, &'static str) {
    match kind {
        ReportKind::AttackType => (ATTACK_TYPE, "atk_type.keyword"),
        ReportKind::AttackIp => (ATTACK_IP, "atk_ip.keyword"),
        ReportKind::TargetUrl => (TARGET_URL, "target_url.keyword"),
    }
}
