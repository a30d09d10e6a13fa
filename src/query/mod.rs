//! Aggregation request specifications for the attack reports

pub mod builder;
pub mod spec;

pub use builder::{ReportQueryBuilder, DEFAULT_TERM_SIZE};
pub use spec::{
    BucketSelector, Bucketing, GroupingLevel, LevelChild, MetricKind, MetricNode, RangeFilter,
    ReportQuery,
};
