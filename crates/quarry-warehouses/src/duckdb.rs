//! DuckDB embedded database client
//!
//! The engine is synchronous, so every statement runs on the blocking pool
//! with the connection moved in and handed back. A database file is opened per
//! call; without a path each call gets a fresh in-memory database.

use crate::catalog::{fold_catalog, MetadataColumns};
use crate::client::WarehouseClient;
use crate::normalizer::{self, TypeTable};
use crate::session::{query_in_session, Connector, WarehouseConnection};
use quarry_core::{
    DimensionType, DuckdbCredentials, QueryResult, TableSelector, WarehouseCatalog, WarehouseError, WeekDay,
};
use std::path::PathBuf;

/// DuckDB native types by canonical token
pub const DUCKDB_TYPES: TypeTable = &[
    ("NUMBER", DimensionType::Number),
    ("DECIMAL", DimensionType::Number),
    ("NUMERIC", DimensionType::Number),
    ("INTEGER", DimensionType::Number),
    ("INT", DimensionType::Number),
    ("BIGINT", DimensionType::Number),
    ("SMALLINT", DimensionType::Number),
    ("TINYINT", DimensionType::Number),
    ("HUGEINT", DimensionType::Number),
    ("UBIGINT", DimensionType::Number),
    ("UINTEGER", DimensionType::Number),
    ("USMALLINT", DimensionType::Number),
    ("UTINYINT", DimensionType::Number),
    ("FLOAT", DimensionType::Number),
    ("DOUBLE", DimensionType::Number),
    ("REAL", DimensionType::Number),
    ("DATE", DimensionType::Date),
    ("DATETIME", DimensionType::Timestamp),
    ("TIME", DimensionType::Timestamp),
    ("TIMESTAMP", DimensionType::Timestamp),
    ("TIMESTAMPTZ", DimensionType::Timestamp),
    ("BOOLEAN", DimensionType::Boolean),
    ("BOOL", DimensionType::Boolean),
];

pub const DUCKDB_CATALOG_SQL: &str = "SELECT table_catalog, table_schema, table_name, column_name, data_type \
     FROM information_schema.columns";

/// Counts the `TimeZone` setting, which only exists when ICU is loaded
pub const TIMEZONE_SETTING_SQL: &str = "SELECT count(*) AS n FROM duckdb_settings() WHERE name = 'TimeZone'";

const SET_TIMEZONE: &str = "SET TimeZone = 'UTC'";

pub fn map_field_type(native_type: &str) -> Result<DimensionType, WarehouseError> {
    normalizer::normalize("DuckDB", DUCKDB_TYPES, native_type)
}

#[derive(Debug, Clone)]
pub struct DuckdbConnector {
    path: Option<PathBuf>,
    schema: Option<String>,
    read_only: bool,
}

impl DuckdbConnector {
    pub fn new(credentials: &DuckdbCredentials) -> Self {
        Self {
            path: credentials.path.clone(),
            schema: credentials.schema.clone(),
            read_only: credentials.read_only,
        }
    }

    fn target(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }
}

#[cfg(feature = "duckdb")]
mod engine {
    use super::map_field_type;
    use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
    use ::duckdb::arrow::datatypes::DataType;
    use ::duckdb::types::{TimeUnit, Value};
    use quarry_core::{FieldValue, QueryResult, WarehouseError};

    /// SQL spelling of the Arrow type DuckDB reports for a result column
    pub fn sql_type_name(data_type: &DataType) -> &'static str {
        match data_type {
            DataType::Boolean => "BOOLEAN",
            DataType::Int8 => "TINYINT",
            DataType::Int16 => "SMALLINT",
            DataType::Int32 => "INTEGER",
            DataType::Int64 => "BIGINT",
            DataType::UInt8 => "UTINYINT",
            DataType::UInt16 => "USMALLINT",
            DataType::UInt32 => "UINTEGER",
            DataType::UInt64 => "UBIGINT",
            DataType::Float16 | DataType::Float32 => "FLOAT",
            DataType::Float64 => "DOUBLE",
            DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => "DECIMAL",
            DataType::Date32 | DataType::Date64 => "DATE",
            DataType::Timestamp(_, Some(_)) => "TIMESTAMPTZ",
            DataType::Timestamp(_, None) => "TIMESTAMP",
            DataType::Time32(_) | DataType::Time64(_) => "TIME",
            DataType::Utf8 | DataType::LargeUtf8 => "VARCHAR",
            DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _) => "LIST",
            DataType::Struct(_) => "STRUCT",
            DataType::Map(_, _) => "MAP",
            DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => "BLOB",
            DataType::Interval(_) => "INTERVAL",
            _ => "OTHER",
        }
    }

    fn micros(unit: TimeUnit, value: i64) -> i64 {
        match unit {
            TimeUnit::Second => value.saturating_mul(1_000_000),
            TimeUnit::Millisecond => value.saturating_mul(1_000),
            TimeUnit::Microsecond => value,
            TimeUnit::Nanosecond => value / 1_000,
        }
    }

    fn nested(value: Value) -> Result<serde_json::Value, String> {
        serde_json::to_value(value_cell(value)?).map_err(|e| e.to_string())
    }

    /// Object key for a MAP entry; text keys are used as they are
    fn map_key(key: Value) -> Result<String, String> {
        match key {
            Value::Text(s) | Value::Enum(s) => Ok(s),
            other => match nested(other)? {
                serde_json::Value::String(s) => Ok(s),
                json => Ok(json.to_string()),
            },
        }
    }

    /// DuckDB's BLOB text form: printable ASCII as is, other bytes as `\xHH`
    pub fn blob_text(bytes: &[u8]) -> String {
        let mut text = String::with_capacity(bytes.len());
        for &byte in bytes {
            if (0x20..0x7f).contains(&byte) && byte != b'\\' {
                text.push(char::from(byte));
            } else {
                text.push_str(&format!("\\x{:02X}", byte));
            }
        }
        text
    }

    /// DuckDB's INTERVAL text form, e.g. `1 year 2 months 3 days 04:05:06`
    pub fn interval_text(months: i32, days: i32, nanos: i64) -> String {
        let unit = |n: i32, name: &str| format!("{} {}{}", n, name, if n.abs() == 1 { "" } else { "s" });
        let mut parts = Vec::new();
        if months / 12 != 0 {
            parts.push(unit(months / 12, "year"));
        }
        if months % 12 != 0 {
            parts.push(unit(months % 12, "month"));
        }
        if days != 0 {
            parts.push(unit(days, "day"));
        }
        if nanos != 0 || parts.is_empty() {
            let sign = if nanos < 0 { "-" } else { "" };
            let micros = (nanos / 1_000).unsigned_abs();
            let (seconds, fraction) = (micros / 1_000_000, micros % 1_000_000);
            let mut clock = format!("{}{:02}:{:02}:{:02}", sign, seconds / 3600, seconds / 60 % 60, seconds % 60);
            if fraction > 0 {
                clock.push_str(&format!(".{:06}", fraction));
            }
            parts.push(clock);
        }
        parts.join(" ")
    }

    pub fn value_cell(value: Value) -> Result<FieldValue, String> {
        let cell = match value {
            Value::Null => FieldValue::Null,
            Value::Boolean(b) => FieldValue::Bool(b),
            Value::TinyInt(i) => FieldValue::Int(i.into()),
            Value::SmallInt(i) => FieldValue::Int(i.into()),
            Value::Int(i) => FieldValue::Int(i.into()),
            Value::BigInt(i) => FieldValue::Int(i),
            Value::UTinyInt(i) => FieldValue::Int(i.into()),
            Value::USmallInt(i) => FieldValue::Int(i.into()),
            Value::UInt(i) => FieldValue::Int(i.into()),
            Value::UBigInt(i) => i64::try_from(i)
                .map(FieldValue::Int)
                .unwrap_or_else(|_| FieldValue::Decimal(i.to_string())),
            Value::HugeInt(i) => i64::try_from(i)
                .map(FieldValue::Int)
                .unwrap_or_else(|_| FieldValue::Decimal(i.to_string())),
            Value::UHugeInt(i) => i64::try_from(i)
                .map(FieldValue::Int)
                .unwrap_or_else(|_| FieldValue::Decimal(i.to_string())),
            Value::Float(f) => FieldValue::Float(f.into()),
            Value::Double(f) => FieldValue::Float(f),
            Value::Decimal(d) => FieldValue::Decimal(d.to_string()),
            Value::Text(s) | Value::Enum(s) => FieldValue::String(s),
            Value::Blob(bytes) | Value::Geometry(bytes) => FieldValue::String(blob_text(&bytes)),
            Value::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(TimeDelta::try_days(days.into())?))
                .map(FieldValue::Date)
                .ok_or_else(|| format!("date out of range: {} days", days))?,
            Value::Timestamp(unit, value) => DateTime::<Utc>::from_timestamp_micros(micros(unit, value))
                .map(FieldValue::Timestamp)
                .ok_or_else(|| format!("timestamp out of range: {}", value))?,
            Value::Time64(unit, value) => {
                let micros = micros(unit, value);
                let secs = u32::try_from(micros.div_euclid(1_000_000)).unwrap_or_default();
                let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).unwrap_or_default();
                NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                    .map(|t| FieldValue::String(t.format("%H:%M:%S%.f").to_string()))
                    .ok_or_else(|| format!("time out of range: {}", value))?
            }
            Value::Interval { months, days, nanos } => FieldValue::String(interval_text(months, days, nanos)),
            Value::List(items) | Value::Array(items) => FieldValue::Json(serde_json::Value::Array(
                items.into_iter().map(nested).collect::<Result<_, _>>()?,
            )),
            Value::Struct(fields) => FieldValue::Json(serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), nested(value.clone())?)))
                    .collect::<Result<_, String>>()?,
            )),
            Value::Map(entries) => FieldValue::Json(serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| Ok((map_key(key.clone())?, nested(value.clone())?)))
                    .collect::<Result<_, String>>()?,
            )),
            Value::Union(inner) => value_cell(*inner)?,
            _ => return Err("value type has no conversion".to_string()),
        };
        Ok(cell)
    }

    /// Run one statement and collect every row
    pub fn run(conn: &::duckdb::Connection, sql: &str) -> Result<QueryResult, WarehouseError> {
        let query_error = |e: ::duckdb::Error| WarehouseError::query(e.to_string());

        let mut stmt = conn.prepare(sql).map_err(query_error)?;
        let mut rows = stmt.query([]).map_err(query_error)?;

        let columns = match rows.as_ref() {
            Some(executed) => executed
                .column_names()
                .into_iter()
                .enumerate()
                .map(|(idx, name)| (name, sql_type_name(&executed.column_type(idx))))
                .collect::<Vec<_>>(),
            None => Vec::new(),
        };

        let mut values = Vec::new();
        while let Some(row) = rows.next().map_err(query_error)? {
            let cells = columns
                .iter()
                .enumerate()
                .map(|(idx, (name, _))| {
                    let value = row.get::<_, Value>(idx).map_err(query_error)?;
                    value_cell(value).map_err(|e| {
                        WarehouseError::query(format!("Cannot decode DuckDB column '{}': {}", name, e))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            values.push(cells);
        }

        let columns = columns
            .into_iter()
            .map(|(name, type_name)| map_field_type(type_name).map(|t| (name, t)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueryResult::from_columns(columns, values))
    }
}

pub struct DuckdbConnection {
    #[cfg(feature = "duckdb")]
    conn: Option<::duckdb::Connection>,

    #[cfg(not(feature = "duckdb"))]
    _unavailable: (),
}

#[async_trait::async_trait]
impl WarehouseConnection for DuckdbConnection {
    #[cfg(feature = "duckdb")]
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, WarehouseError> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| WarehouseError::connection("DuckDB connection was lost"))?;
        let sql = sql.to_string();

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = engine::run(&conn, &sql);
            (conn, result)
        })
        .await
        .map_err(|e| WarehouseError::query(format!("DuckDB worker failed: {}", e)))?;

        self.conn = Some(conn);
        result
    }

    #[cfg(not(feature = "duckdb"))]
    async fn execute(&mut self, _sql: &str) -> Result<QueryResult, WarehouseError> {
        Err(crate::not_compiled("DuckDB", "duckdb"))
    }

    #[cfg(feature = "duckdb")]
    async fn close(self) -> Result<(), WarehouseError> {
        match self.conn {
            Some(conn) => conn
                .close()
                .map_err(|(_, e)| WarehouseError::connection(format!("Failed to close DuckDB: {}", e))),
            None => Ok(()),
        }
    }

    #[cfg(not(feature = "duckdb"))]
    async fn close(self) -> Result<(), WarehouseError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connector for DuckdbConnector {
    type Connection = DuckdbConnection;

    fn backend(&self) -> &'static str {
        "DuckDB"
    }

    #[cfg(feature = "duckdb")]
    async fn connect(&self) -> Result<DuckdbConnection, WarehouseError> {
        use ::duckdb::{AccessMode, Config, Connection};

        let path = self.path.clone();
        let read_only = self.read_only;
        let target = self.target();

        let opened = tokio::task::spawn_blocking(move || {
            let mut config = Config::default();
            if read_only {
                config = config.access_mode(AccessMode::ReadOnly)?;
            }
            match path {
                Some(path) => Connection::open_with_flags(path, config),
                None => Connection::open_in_memory_with_flags(config),
            }
        })
        .await
        .map_err(|e| WarehouseError::connection(format!("DuckDB worker failed: {}", e)))?;

        let conn = opened
            .map_err(|e| WarehouseError::connection(format!("Failed to open DuckDB database at '{}': {}", target, e)))?;
        Ok(DuckdbConnection { conn: Some(conn) })
    }

    #[cfg(not(feature = "duckdb"))]
    async fn connect(&self) -> Result<DuckdbConnection, WarehouseError> {
        Err(crate::not_compiled("DuckDB", "duckdb"))
    }

    fn session_statements(&self) -> Vec<String> {
        let mut statements = vec![SET_TIMEZONE.to_string()];
        if let Some(schema) = &self.schema {
            statements.push(format!("SET schema = '{}'", schema.replace('\'', "''")));
        }
        statements
    }

    // The timezone statement is skipped when the engine has no such setting
    async fn configure_session(&self, connection: &mut DuckdbConnection) -> Result<(), WarehouseError> {
        let timezone_check = connection
            .execute(TIMEZONE_SETTING_SQL)
            .await
            .map_err(WarehouseError::into_connection)?;
        let has_timezone = timezone_check
            .rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(|n| n.as_i64())
            .is_some_and(|n| n > 0);

        for statement in self.session_statements() {
            if statement == SET_TIMEZONE && !has_timezone {
                tracing::debug!(backend = self.backend(), "TimeZone setting unavailable, leaving session timezone");
                continue;
            }
            tracing::debug!(backend = self.backend(), statement = %statement, "configuring session");
            connection
                .execute(&statement)
                .await
                .map_err(WarehouseError::into_connection)?;
        }
        Ok(())
    }
}

/// DuckDB client
pub struct DuckdbClient {
    connector: DuckdbConnector,
    start_of_week: Option<WeekDay>,
}

impl DuckdbClient {
    pub fn new(credentials: DuckdbCredentials) -> Self {
        Self {
            connector: DuckdbConnector::new(&credentials),
            start_of_week: credentials.start_of_week,
        }
    }

    pub fn connector(&self) -> &DuckdbConnector {
        &self.connector
    }
}

#[async_trait::async_trait]
impl WarehouseClient for DuckdbClient {
    fn name(&self) -> &'static str {
        "DuckDB"
    }

    fn start_of_week(&self) -> Option<WeekDay> {
        self.start_of_week
    }

    async fn run_query(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        query_in_session(&self.connector, sql).await
    }

    async fn get_catalog(&self, selectors: &[TableSelector]) -> Result<WarehouseCatalog, WarehouseError> {
        if selectors.is_empty() {
            return Ok(WarehouseCatalog::new());
        }
        let listing = query_in_session(&self.connector, DUCKDB_CATALOG_SQL).await?;
        fold_catalog(selectors, &listing, &MetadataColumns::INFORMATION_SCHEMA, map_field_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_type_mapping() {
        assert_eq!(map_field_type("INTEGER").unwrap(), DimensionType::Number);
        assert_eq!(map_field_type("HUGEINT").unwrap(), DimensionType::Number);
        assert_eq!(map_field_type("DECIMAL(18,3)").unwrap(), DimensionType::Number);
        assert_eq!(map_field_type("TIMESTAMP WITH TIME ZONE").unwrap(), DimensionType::Timestamp);
        assert_eq!(map_field_type("TIMESTAMP_NS").unwrap(), DimensionType::Timestamp);
        assert_eq!(map_field_type("DATE").unwrap(), DimensionType::Date);
        assert_eq!(map_field_type("BOOLEAN").unwrap(), DimensionType::Boolean);
        assert_eq!(map_field_type("VARCHAR").unwrap(), DimensionType::String);
        assert!(map_field_type("[]").is_err());
    }

    #[test]
    fn test_session_statements() {
        let connector = DuckdbConnector::new(&DuckdbCredentials::default());
        assert_eq!(connector.session_statements(), vec!["SET TimeZone = 'UTC'".to_string()]);
        assert_eq!(connector.target(), ":memory:");

        let connector = DuckdbConnector::new(&DuckdbCredentials {
            schema: Some("analytics".to_string()),
            ..Default::default()
        });
        assert_eq!(connector.session_statements()[1], "SET schema = 'analytics'");
    }

    #[test]
    fn test_week_start_is_reported_only() {
        let client = DuckdbClient::new(DuckdbCredentials {
            start_of_week: Some(WeekDay::Sunday),
            ..Default::default()
        });
        assert_eq!(client.start_of_week(), Some(WeekDay::Sunday));
        assert_eq!(client.connector().session_statements().len(), 1);
    }

    #[tokio::test]
    #[cfg(not(feature = "duckdb"))]
    async fn test_connect_without_feature() {
        let client = DuckdbClient::new(DuckdbCredentials::default());
        let err = client.test().await.unwrap_err();
        assert!(matches!(err, WarehouseError::Connection(ref m) if m.contains("--features duckdb")));
    }

    #[cfg(feature = "duckdb")]
    mod engine_tests {
        use super::*;
        use crate::session::run_in_session;
        use pretty_assertions::assert_eq;
        use quarry_core::FieldValue;
        use serde_json::json;

        #[tokio::test]
        async fn test_select_one_in_memory() {
            let client = DuckdbClient::new(DuckdbCredentials::default());
            client.test().await.unwrap();

            let result = client.run_query("SELECT 1 AS n, 'a' AS s, DATE '2024-01-02' AS d").await.unwrap();
            assert_eq!(result.fields["n"].dimension_type, DimensionType::Number);
            assert_eq!(result.fields["s"].dimension_type, DimensionType::String);
            assert_eq!(result.fields["d"].dimension_type, DimensionType::Date);
            assert_eq!(result.rows[0]["n"], FieldValue::Int(1));
            assert_eq!(result.rows[0]["s"], FieldValue::String("a".to_string()));
        }

        #[tokio::test]
        async fn test_nested_values_become_json() {
            let client = DuckdbClient::new(DuckdbCredentials::default());
            let result = client
                .run_query(
                    "SELECT {'a': 1, 'b': 'x'} AS s, MAP {'k': 2} AS m, [{'id': 1}, {'id': 2}] AS l, \
                     MAP {1: 'one'} AS n",
                )
                .await
                .unwrap();

            assert_eq!(result.rows[0]["s"], FieldValue::Json(json!({"a": 1, "b": "x"})));
            assert_eq!(result.rows[0]["m"], FieldValue::Json(json!({"k": 2})));
            assert_eq!(result.rows[0]["l"], FieldValue::Json(json!([{"id": 1}, {"id": 2}])));
            assert_eq!(result.rows[0]["n"], FieldValue::Json(json!({"1": "one"})));
        }

        #[tokio::test]
        async fn test_interval_and_blob_render_as_text() {
            let client = DuckdbClient::new(DuckdbCredentials::default());
            let result = client
                .run_query("SELECT INTERVAL 14 MONTH + INTERVAL 3 DAY + INTERVAL 90 MINUTE AS i, '\\xAA01'::BLOB AS b")
                .await
                .unwrap();

            assert_eq!(result.rows[0]["i"], FieldValue::String("1 year 2 months 3 days 01:30:00".to_string()));
            assert_eq!(result.rows[0]["b"], FieldValue::String("\\xAA01".to_string()));
        }

        #[test]
        fn test_union_blob_and_interval_values() {
            use ::duckdb::types::Value;
            assert_eq!(
                engine::value_cell(Value::Union(Box::new(Value::Int(7)))).unwrap(),
                FieldValue::Int(7)
            );
            assert_eq!(engine::blob_text(b"ab\\\x00"), "ab\\x5C\\x00");
            assert_eq!(engine::interval_text(0, 1, 0), "1 day");
            assert_eq!(engine::interval_text(0, 0, 0), "00:00:00");
        }

        #[tokio::test]
        async fn test_query_error() {
            let client = DuckdbClient::new(DuckdbCredentials::default());
            let err = client.run_query("SELECT * FROM missing_table").await.unwrap_err();
            assert!(matches!(err, WarehouseError::Query(_)));
        }

        #[tokio::test]
        async fn test_catalog_within_one_session() {
            let connector = DuckdbConnector::new(&DuckdbCredentials::default());
            let selectors = vec![TableSelector::new("memory", "main", "users")];

            let catalog = run_in_session(&connector, |mut conn| async move {
                let created = conn.execute("CREATE TABLE users (id INTEGER, name VARCHAR, seen TIMESTAMP)").await;
                let result = match created {
                    Ok(_) => conn.execute(DUCKDB_CATALOG_SQL).await,
                    Err(e) => Err(e),
                };
                (conn, result)
            })
            .await
            .unwrap();

            let catalog =
                fold_catalog(&selectors, &catalog, &MetadataColumns::INFORMATION_SCHEMA, map_field_type).unwrap();
            let users = catalog.table(&selectors[0]).unwrap();
            assert_eq!(users["id"], DimensionType::Number);
            assert_eq!(users["name"], DimensionType::String);
            assert_eq!(users["seen"], DimensionType::Timestamp);
        }
    }
}
