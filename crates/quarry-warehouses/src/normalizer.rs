//! Shared native-type normalization
//!
//! Every backend owns a fixed lookup table keyed by canonical token. The
//! algorithm is the same for all of them: trim, uppercase, take the leading
//! alphabetic token (dropping parameters like `(10,2)` or `<STRING>`), look
//! the token up, and fall back to STRING for anything unknown.

use quarry_core::{DimensionType, WarehouseError};
use regex::Regex;
use std::sync::OnceLock;

/// Canonical token → dimension type
pub type TypeTable = &'static [(&'static str, DimensionType)];

fn leading_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z]+").expect("token pattern is valid"))
}

/// Extract the canonical token of a native type string
///
/// `DECIMAL(10,2)` → `DECIMAL`, `timestamp_ntz` → `TIMESTAMP`,
/// `double precision` → `DOUBLE`. Fails when there is no leading letter.
pub fn canonical_token(backend: &str, native_type: &str) -> Result<String, WarehouseError> {
    let upper = native_type.trim().to_uppercase();
    leading_token_pattern()
        .find(&upper)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| WarehouseError::parse(format!(
            "Cannot understand type from {}: {}",
            backend, native_type
        )))
}

/// Map a native type string through a backend table
pub fn normalize(backend: &str, table: TypeTable, native_type: &str) -> Result<DimensionType, WarehouseError> {
    let token = canonical_token(backend, native_type)?;
    let mapped = table
        .iter()
        .find(|(name, _)| *name == token)
        .map(|(_, dimension_type)| *dimension_type)
        .unwrap_or(DimensionType::String);
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: TypeTable = &[
        ("DECIMAL", DimensionType::Number),
        ("DATE", DimensionType::Date),
        ("TIMESTAMP", DimensionType::Timestamp),
        ("BOOLEAN", DimensionType::Boolean),
    ];

    #[test]
    fn strips_parameters() {
        assert_eq!(canonical_token("Test", "DECIMAL(10,2)").unwrap(), "DECIMAL");
        assert_eq!(canonical_token("Test", "array<string>").unwrap(), "ARRAY");
        assert_eq!(canonical_token("Test", "  timestamp_ntz ").unwrap(), "TIMESTAMP");
        assert_eq!(canonical_token("Test", "double precision").unwrap(), "DOUBLE");
    }

    #[test]
    fn maps_known_tokens_case_insensitively() {
        assert_eq!(normalize("Test", TABLE, "decimal(38,0)").unwrap(), DimensionType::Number);
        assert_eq!(normalize("Test", TABLE, "Date").unwrap(), DimensionType::Date);
        assert_eq!(normalize("Test", TABLE, "boolean").unwrap(), DimensionType::Boolean);
    }

    #[test]
    fn unknown_tokens_fall_back_to_string() {
        assert_eq!(normalize("Test", TABLE, "GEOGRAPHY").unwrap(), DimensionType::String);
        assert_eq!(normalize("Test", TABLE, "SOME_VENDOR_TYPE(4)").unwrap(), DimensionType::String);
    }

    #[test]
    fn malformed_types_are_parse_errors() {
        for raw in ["", "   ", "(10,2)", "_int4", "123", "<STRING>"] {
            let err = normalize("Test", TABLE, raw).unwrap_err();
            assert!(matches!(err, WarehouseError::Parse(_)), "{:?} should not parse", raw);
            assert!(err.message().contains("Cannot understand type from Test"));
        }
    }
}
