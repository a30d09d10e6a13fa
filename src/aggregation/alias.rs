//! Alias resolution from aggregation names onto record field names

use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;

use crate::aggregation::flatten::FlatRow;
use crate::aggregation::hydrate::ReportRecord;

/// Static declaration of one record field and the row key it is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub alias: Option<&'static str>,
}

impl FieldSpec {
    pub const fn plain(name: &'static str) -> Self {
        Self { name, alias: None }
    }

    pub const fn aliased(name: &'static str, alias: &'static str) -> Self {
        Self {
            name,
            alias: Some(alias),
        }
    }
}

/// (field name, alias) pairs for one record type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    pairs: Vec<(&'static str, &'static str)>,
}

impl AliasMap {
    pub fn from_fields(fields: &[FieldSpec]) -> Self {
        Self {
            pairs: fields
                .iter()
                .filter_map(|f| f.alias.map(|alias| (f.name, alias)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.pairs.iter().copied()
    }
}

/// Copy every aliased value onto its field name.
///
/// Additive: the alias key stays in the row, so resolving twice is the same as
/// resolving once.
pub fn resolve_aliases(mut row: FlatRow, aliases: &AliasMap) -> FlatRow {
    for (field, alias) in aliases.iter() {
        if let Some(value) = row.get(alias).cloned() {
            row.insert(field, value);
        }
    }
    row
}

/// Per-record-type alias maps, derived on first use
#[derive(Debug, Default)]
pub struct AliasCache {
    maps: DashMap<TypeId, Arc<AliasMap>>,
}

impl AliasCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aliases_for<R: ReportRecord>(&self) -> Arc<AliasMap> {
        if let Some(map) = self.maps.get(&TypeId::of::<R>()) {
            return Arc::clone(map.value());
        }

        // Racing first uses derive identical maps; whichever lands first is kept
        let map = self
            .maps
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Arc::new(AliasMap::from_fields(R::fields())));
        Arc::clone(map.value())
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
