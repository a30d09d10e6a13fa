//! Conversion of flattened rows into typed report records

use chrono::{DateTime, FixedOffset};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::aggregation::alias::{resolve_aliases, AliasCache, FieldSpec};
use crate::aggregation::flatten::FlatRow;
use crate::aggregation::value::{ConversionError, FieldValue, FromFieldValue};
use crate::models::{ReportBatch, ReportKind};

#[derive(Debug, Error)]
#[error("field `{field}`: {source}")]
pub struct HydrateError {
    pub field: String,
    #[source]
    pub source: ConversionError,
}

/// Assign `value` into `slot`, tagging failures with the field name
pub fn assign_field<T: FromFieldValue>(
    slot: &mut T,
    field: &str,
    value: &FieldValue,
) -> Result<(), HydrateError> {
    *slot = T::from_field(value).map_err(|source| HydrateError {
        field: field.to_string(),
        source,
    })?;
    Ok(())
}

/// A report row type that can be built from a flattened aggregation row
pub trait ReportRecord: Default + Send + Sync + 'static {
    /// Report shape this record belongs to
    const KIND: ReportKind;

    /// Declared fields, with the row alias each one is read from
    fn fields() -> &'static [FieldSpec];

    /// Assign one row entry. Keys the record does not declare are ignored.
    fn assign(&mut self, field: &str, value: &FieldValue) -> Result<(), HydrateError>;

    /// Stamp the run's statistics time and a fresh identifier
    fn stamp(&mut self, statis_time: DateTime<FixedOffset>, id: String);

    fn into_batch(records: Vec<Self>) -> ReportBatch;
}

/// Builds records from rows, dropping any row that does not convert cleanly
#[derive(Debug, Clone, Default)]
pub struct Hydrator {
    aliases: Arc<AliasCache>,
}

impl Hydrator {
    pub fn new(aliases: Arc<AliasCache>) -> Self {
        Self { aliases }
    }

    pub fn hydrate<R: ReportRecord>(&self, rows: Vec<FlatRow>) -> Vec<R> {
        let aliases = self.aliases.aliases_for::<R>();
        let total = rows.len();

        let records: Vec<R> = rows
            .into_iter()
            .map(|row| resolve_aliases(row, &aliases))
            .filter_map(|row| match hydrate_row::<R>(&row) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(kind = %R::KIND, error = %e, "dropping unconvertible row");
                    None
                }
            })
            .collect();

        if records.len() < total {
            debug!(
                kind = %R::KIND,
                dropped = total - records.len(),
                kept = records.len(),
                "hydration dropped rows"
            );
        }
        records
    }
}

fn hydrate_row<R: ReportRecord>(row: &FlatRow) -> Result<R, HydrateError> {
    let mut record = R::default();
    for (field, value) in row.iter() {
        record.assign(field, value)?;
    }
    Ok(record)
}
