//! Canonical types shared above the warehouse layer

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Canonical dimension type
///
/// Every backend-native column type maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    String,
    Number,
    Date,
    Timestamp,
    Boolean,
}

impl std::fmt::Display for DimensionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "STRING"),
            Self::Number => write!(f, "NUMBER"),
            Self::Date => write!(f, "DATE"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

/// Day a week starts on (Monday = 0 … Sunday = 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WeekDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl WeekDay {
    pub const ALL: [WeekDay; 7] = [
        WeekDay::Monday,
        WeekDay::Tuesday,
        WeekDay::Wednesday,
        WeekDay::Thursday,
        WeekDay::Friday,
        WeekDay::Saturday,
        WeekDay::Sunday,
    ];

    /// Zero-based index, Monday = 0
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|day| day.name() == name)
    }
}

impl std::fmt::Display for WeekDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for WeekDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.index())
    }
}

impl<'de> Deserialize<'de> for WeekDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(u8),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Index(index) => WeekDay::from_index(index).ok_or_else(|| {
                serde::de::Error::custom(format!("week day index out of range (0-6): {}", index))
            }),
            Raw::Name(name) => WeekDay::from_name(&name)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown week day: {}", name))),
        }
    }
}

/// A normalized cell value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact decimal text, for values an f64 cannot hold without loss
    Decimal(String),
    String(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    /// Variant, struct, array and other nested values
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the value as text if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Decimal(s) | Self::String(s) => serializer.serialize_str(s),
            Self::Date(d) => d.serialize(serializer),
            Self::Timestamp(ts) => ts.serialize(serializer),
            Self::Json(v) => v.serialize(serializer),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Type information for one result column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMetadata {
    #[serde(rename = "type")]
    pub dimension_type: DimensionType,
}

impl FieldMetadata {
    pub fn new(dimension_type: DimensionType) -> Self {
        Self { dimension_type }
    }
}

/// One result row, keyed by column name
pub type Row = BTreeMap<String, FieldValue>;

/// Result of running a SQL statement
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueryResult {
    pub fields: BTreeMap<String, FieldMetadata>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Build a result whose rows carry exactly the keys in `fields`
    ///
    /// Cells missing from a row become `Null`; cells without a field are dropped.
    pub fn new(fields: BTreeMap<String, FieldMetadata>, rows: Vec<Row>) -> Self {
        let rows = rows
            .into_iter()
            .map(|mut row| {
                fields
                    .keys()
                    .map(|name| {
                        let value = row.remove(name).unwrap_or(FieldValue::Null);
                        (name.clone(), value)
                    })
                    .collect()
            })
            .collect();

        Self { fields, rows }
    }

    /// Build a result from positional columns and rows
    ///
    /// Shorter rows are padded with `Null`; extra cells are ignored.
    pub fn from_columns(columns: Vec<(String, DimensionType)>, rows: Vec<Vec<FieldValue>>) -> Self {
        let names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();
        let fields = columns
            .into_iter()
            .map(|(name, dimension_type)| (name, FieldMetadata::new(dimension_type)))
            .collect();

        let rows = rows
            .into_iter()
            .map(|cells| {
                let mut cells = cells.into_iter();
                names
                    .iter()
                    .map(|name| (name.clone(), cells.next().unwrap_or(FieldValue::Null)))
                    .collect()
            })
            .collect();

        Self::new(fields, rows)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Text of a cell, if present and textual
    pub fn get_str<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
        row.get(column).and_then(FieldValue::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn week_day_indices() {
        assert_eq!(WeekDay::Monday.index(), 0);
        assert_eq!(WeekDay::Sunday.index(), 6);
        assert_eq!(WeekDay::from_index(2), Some(WeekDay::Wednesday));
        assert_eq!(WeekDay::from_index(7), None);
        assert_eq!(WeekDay::from_name(" Friday "), Some(WeekDay::Friday));
    }

    #[test]
    fn week_day_deserializes_from_index_or_name() {
        let from_index: WeekDay = serde_json::from_str("0").unwrap();
        let from_name: WeekDay = serde_json::from_str("\"sunday\"").unwrap();
        assert_eq!(from_index, WeekDay::Monday);
        assert_eq!(from_name, WeekDay::Sunday);
        assert!(serde_json::from_str::<WeekDay>("9").is_err());
        assert!(serde_json::from_str::<WeekDay>("\"someday\"").is_err());
    }

    #[test]
    fn dimension_type_display() {
        assert_eq!(DimensionType::Number.to_string(), "NUMBER");
        assert_eq!(serde_json::to_string(&DimensionType::Timestamp).unwrap(), "\"timestamp\"");
    }

    #[test]
    fn rows_share_field_keys() {
        let result = QueryResult::from_columns(
            vec![
                ("id".to_string(), DimensionType::Number),
                ("name".to_string(), DimensionType::String),
            ],
            vec![vec![FieldValue::Int(1)], vec![FieldValue::Int(2), "b".into(), "extra".into()]],
        );

        for row in &result.rows {
            let keys: Vec<&str> = row.keys().map(String::as_str).collect();
            assert_eq!(keys, result.column_names());
        }
        assert_eq!(result.rows[0]["name"], FieldValue::Null);
        assert_eq!(result.rows[1]["name"], FieldValue::String("b".to_string()));
    }

    #[test]
    fn new_drops_cells_without_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), FieldMetadata::new(DimensionType::Number));
        let mut row = Row::new();
        row.insert("a".to_string(), FieldValue::Int(1));
        row.insert("stray".to_string(), FieldValue::Int(2));

        let result = QueryResult::new(fields, vec![row]);
        assert_eq!(result.rows[0].len(), 1);
    }

    #[test]
    fn query_result_serializes_like_the_wire_contract() {
        let result = QueryResult::from_columns(
            vec![("?column?".to_string(), DimensionType::Number)],
            vec![vec![FieldValue::Int(1)]],
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "fields": {"?column?": {"type": "number"}},
                "rows": [{"?column?": 1}]
            })
        );
    }

    #[test]
    fn timestamps_serialize_as_iso8601() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let json = serde_json::to_value(FieldValue::Timestamp(ts)).unwrap();
        assert_eq!(json, serde_json::json!("2024-03-01T12:00:00Z"));
    }
}
