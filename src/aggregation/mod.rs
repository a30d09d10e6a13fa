//! Aggregation result processing
//!
//! Turns the nested bucket tree returned by the search engine into flat rows
//! and then into typed report records.

pub mod alias;
pub mod flatten;
pub mod hydrate;
pub mod tree;
pub mod value;

pub use alias::{resolve_aliases, AliasCache, AliasMap, FieldSpec};
pub use flatten::{cross_merge, flatten, flatten_response, FlatRow};
pub use hydrate::{assign_field, HydrateError, Hydrator, ReportRecord};
pub use tree::{Aggregation, AggregationResult, Bucket, EngineScalar};
pub use value::{normalize, ConversionError, FieldValue, FromFieldValue};
