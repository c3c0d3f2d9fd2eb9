//! Catalog types: table selectors and the nested database → column mapping

use crate::types::DimensionType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Columns of one table, keyed by column name
pub type TableColumns = BTreeMap<String, DimensionType>;

/// Identifies a table whose columns should be catalogued
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableSelector {
    /// Database/project/catalog name
    pub database: String,

    /// Schema/dataset name
    pub schema: String,

    /// Table name
    pub table: String,
}

impl TableSelector {
    pub fn new(database: impl Into<String>, schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Get fully qualified name
    pub fn fqn(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.table)
    }

    /// Parse `database.schema.table`
    pub fn parse(fqn: &str) -> Option<Self> {
        let mut parts = fqn.split('.');
        let (database, schema, table) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || [database, schema, table].iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(Self::new(database, schema, table))
    }

    /// Case-insensitive match on database, schema and table
    pub fn matches(&self, database: &str, schema: &str, table: &str) -> bool {
        self.database.eq_ignore_ascii_case(database)
            && self.schema.eq_ignore_ascii_case(schema)
            && self.table.eq_ignore_ascii_case(table)
    }
}

impl fmt::Display for TableSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

/// Nested catalog: database → schema → table → column → type
///
/// Only tables that were requested and found are present.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarehouseCatalog(BTreeMap<String, BTreeMap<String, BTreeMap<String, TableColumns>>>);

impl WarehouseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a column, creating intermediate levels on first use
    pub fn insert(&mut self, selector: &TableSelector, column: impl Into<String>, dimension_type: DimensionType) {
        self.0
            .entry(selector.database.clone())
            .or_default()
            .entry(selector.schema.clone())
            .or_default()
            .entry(selector.table.clone())
            .or_default()
            .insert(column.into(), dimension_type);
    }

    /// Columns of a table, using the exact spelling of the selector
    pub fn table(&self, selector: &TableSelector) -> Option<&TableColumns> {
        self.0
            .get(&selector.database)?
            .get(&selector.schema)?
            .get(&selector.table)
    }

    pub fn column_type(&self, selector: &TableSelector, column: &str) -> Option<DimensionType> {
        self.table(selector)?.get(column).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of catalogued tables
    pub fn table_count(&self) -> usize {
        self.0
            .values()
            .flat_map(|schemas| schemas.values())
            .map(|tables| tables.len())
            .sum()
    }

    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_inner(self) -> BTreeMap<String, BTreeMap<String, BTreeMap<String, TableColumns>>> {
        self.0
    }
}
