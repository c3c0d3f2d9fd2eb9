//! Folding instance-wide column listings into a requested catalog
//!
//! Metadata queries list every visible column; only rows matching one of the
//! requested tables (case-insensitively on database, schema and table) are
//! kept. Column names are taken as reported. Catalog keys use the spelling of
//! the matching selector, so callers can look tables up the way they asked.

use quarry_core::{DimensionType, QueryResult, Row, TableSelector, WarehouseCatalog, WarehouseError};

/// Names of the columns a metadata query reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataColumns {
    pub database: &'static str,
    pub schema: &'static str,
    pub table: &'static str,
    pub column: &'static str,
    pub data_type: &'static str,

    /// Optional `(column, required value)` filter, e.g. Snowflake's `kind = COLUMN`
    pub kind: Option<(&'static str, &'static str)>,
}

impl MetadataColumns {
    /// `information_schema.columns` naming
    pub const INFORMATION_SCHEMA: MetadataColumns = MetadataColumns {
        database: "table_catalog",
        schema: "table_schema",
        table: "table_name",
        column: "column_name",
        data_type: "data_type",
        kind: None,
    };
}

fn cell<'a>(row: &'a Row, name: &str) -> Option<&'a str> {
    QueryResult::get_str(row, name)
}

/// Fold metadata rows into a catalog restricted to `selectors`
///
/// `decode` turns the reported data type into a dimension type and is only
/// called for rows that match a selector. Rows with missing identifiers are
/// skipped.
pub fn fold_catalog<F>(
    selectors: &[TableSelector],
    metadata: &QueryResult,
    layout: &MetadataColumns,
    decode: F,
) -> Result<WarehouseCatalog, WarehouseError>
where
    F: Fn(&str) -> Result<DimensionType, WarehouseError>,
{
    let mut catalog = WarehouseCatalog::new();
    if selectors.is_empty() {
        return Ok(catalog);
    }

    for row in &metadata.rows {
        if let Some((kind_column, expected)) = layout.kind {
            if cell(row, kind_column).map_or(true, |kind| !kind.eq_ignore_ascii_case(expected)) {
                continue;
            }
        }

        let (Some(database), Some(schema), Some(table), Some(column)) = (
            cell(row, layout.database),
            cell(row, layout.schema),
            cell(row, layout.table),
            cell(row, layout.column),
        ) else {
            tracing::trace!(?row, "skipping metadata row without identifiers");
            continue;
        };

        let Some(selector) = selectors.iter().find(|s| s.matches(database, schema, table)) else {
            continue;
        };

        let data_type = cell(row, layout.data_type).unwrap_or_default();
        catalog.insert(selector, column, decode(data_type)?);
    }

    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::FieldValue;

    fn listing(rows: &[(&str, &str, &str, &str, &str)]) -> QueryResult {
        let columns = ["table_catalog", "table_schema", "table_name", "column_name", "data_type"]
            .iter()
            .map(|name| (name.to_string(), DimensionType::String))
            .collect();
        let rows = rows
            .iter()
            .map(|(d, s, t, c, ty)| vec![(*d).into(), (*s).into(), (*t).into(), (*c).into(), (*ty).into()])
            .collect();
        QueryResult::from_columns(columns, rows)
    }

    fn decode(raw: &str) -> Result<DimensionType, WarehouseError> {
        match raw {
            "int" => Ok(DimensionType::Number),
            "text" => Ok(DimensionType::String),
            other => Err(WarehouseError::parse(format!("bad type {}", other))),
        }
    }

    #[test]
    fn keeps_only_requested_tables() {
        let metadata = listing(&[
            ("DB", "PUBLIC", "USERS", "ID", "int"),
            ("DB", "PUBLIC", "USERS", "EMAIL", "text"),
            ("DB", "PUBLIC", "ORDERS", "ID", "int"),
        ]);
        let selectors = vec![TableSelector::new("db", "public", "users")];

        let catalog =
            fold_catalog(&selectors, &metadata, &MetadataColumns::INFORMATION_SCHEMA, decode).unwrap();

        assert_eq!(catalog.table_count(), 1);
        let users = catalog.table(&selectors[0]).unwrap();
        assert_eq!(users.get("ID"), Some(&DimensionType::Number));
        assert_eq!(users.get("EMAIL"), Some(&DimensionType::String));
        // Column names are not case-folded
        assert_eq!(users.get("id"), None);
    }

    #[test]
    fn unmatched_selectors_are_absent() {
        let metadata = listing(&[("db", "public", "users", "id", "int")]);
        let selectors = vec![TableSelector::new("a", "b", "c")];

        let catalog =
            fold_catalog(&selectors, &metadata, &MetadataColumns::INFORMATION_SCHEMA, decode).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn decode_errors_only_for_matching_rows() {
        let metadata = listing(&[
            ("db", "public", "users", "id", "int"),
            ("db", "public", "other", "weird", "???"),
        ]);
        let selectors = vec![TableSelector::new("db", "public", "users")];
        assert!(fold_catalog(&selectors, &metadata, &MetadataColumns::INFORMATION_SCHEMA, decode).is_ok());

        let selectors = vec![TableSelector::new("db", "public", "other")];
        let err = fold_catalog(&selectors, &metadata, &MetadataColumns::INFORMATION_SCHEMA, decode).unwrap_err();
        assert!(matches!(err, WarehouseError::Parse(_)));
    }

    #[test]
    fn kind_filter_drops_other_rows() {
        let mut metadata = listing(&[
            ("db", "s", "t", "c1", "int"),
            ("db", "s", "t", "c2", "int"),
        ]);
        metadata.fields.insert("kind".to_string(), quarry_core::FieldMetadata::new(DimensionType::String));
        metadata.rows[0].insert("kind".to_string(), FieldValue::from("COLUMN"));
        metadata.rows[1].insert("kind".to_string(), FieldValue::from("VIRTUAL_COLUMN"));

        let layout = MetadataColumns {
            kind: Some(("kind", "COLUMN")),
            ..MetadataColumns::INFORMATION_SCHEMA
        };
        let selectors = vec![TableSelector::new("db", "s", "t")];
        let catalog = fold_catalog(&selectors, &metadata, &layout, decode).unwrap();

        let table = catalog.table(&selectors[0]).unwrap();
        assert!(table.contains_key("c1"));
        assert!(!table.contains_key("c2"));
    }

    #[test]
    fn null_identifiers_are_skipped() {
        let mut metadata = listing(&[("db", "s", "t", "c1", "int")]);
        metadata.rows[0].insert("column_name".to_string(), FieldValue::Null);
        let selectors = vec![TableSelector::new("db", "s", "t")];

        let catalog =
            fold_catalog(&selectors, &metadata, &MetadataColumns::INFORMATION_SCHEMA, decode).unwrap();
        assert!(catalog.is_empty());
    }
}
