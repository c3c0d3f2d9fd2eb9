//! Snowflake client over the Snowflake REST session API
//!
//! Each call creates a fresh session (password or key-pair authentication),
//! sets the session timezone to UTC and, when configured, the week start,
//! runs the statement and closes the session.
//!
//! ## Week start
//!
//! Snowflake numbers `WEEK_START` from 1 (Monday) to 7 (Sunday), one more
//! than [`WeekDay::index`].
//!
//! ## Results
//!
//! Query results arrive as Arrow record batches; metadata commands such as
//! `SHOW COLUMNS` arrive as JSON rows. Both are decoded using the Snowflake
//! logical type of each column.
//!
//! ## Endpoints and keys
//!
//! `access_url` replaces the default `https://{account}.snowflakecomputing.com`
//! endpoint and must itself be a `snowflakecomputing.com` host (regional or
//! PrivateLink URLs). Encrypted PKCS#8 keys are decrypted with
//! `private_key_pass` before login.
//!
//! Reference: https://docs.snowflake.com/en/sql-reference/sql/show-columns

use crate::catalog::{fold_catalog, MetadataColumns};
use crate::client::WarehouseClient;
use crate::normalizer::{self, TypeTable};
use crate::session::{one_based_week_start, query_in_session, Connector, WarehouseConnection};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use quarry_core::{
    DimensionType, FieldValue, QueryResult, SnowflakeCredentials, TableSelector, WarehouseCatalog,
    WarehouseError, WeekDay,
};
use secrecy::SecretString;

#[cfg(feature = "snowflake")]
use arrow_array::cast::AsArray;
#[cfg(feature = "snowflake")]
use arrow_array::types::{Date32Type, Decimal128Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type};
#[cfg(feature = "snowflake")]
use arrow_array::{Array, ArrayRef, RecordBatch};

/// Snowflake native types by canonical token
pub const SNOWFLAKE_TYPES: TypeTable = &[
    ("NUMBER", DimensionType::Number),
    ("DECIMAL", DimensionType::Number),
    ("NUMERIC", DimensionType::Number),
    ("INTEGER", DimensionType::Number),
    ("INT", DimensionType::Number),
    ("BIGINT", DimensionType::Number),
    ("SMALLINT", DimensionType::Number),
    ("TINYINT", DimensionType::Number),
    ("BYTEINT", DimensionType::Number),
    ("FLOAT", DimensionType::Number),
    ("DOUBLE", DimensionType::Number),
    ("REAL", DimensionType::Number),
    ("FIXED", DimensionType::Number),
    ("DATE", DimensionType::Date),
    ("DATETIME", DimensionType::Timestamp),
    ("TIME", DimensionType::Timestamp),
    ("TIMESTAMP", DimensionType::Timestamp),
    ("BOOLEAN", DimensionType::Boolean),
];

pub const SNOWFLAKE_CATALOG_SQL: &str = "SHOW COLUMNS IN ACCOUNT";

/// `SHOW COLUMNS` naming; only rows of kind `COLUMN` describe table columns
pub const SNOWFLAKE_METADATA: MetadataColumns = MetadataColumns {
    database: "database_name",
    schema: "schema_name",
    table: "table_name",
    column: "column_name",
    data_type: "data_type",
    kind: Some(("kind", "COLUMN")),
};

pub fn map_field_type(native_type: &str) -> Result<DimensionType, WarehouseError> {
    normalizer::normalize("Snowflake", SNOWFLAKE_TYPES, native_type)
}

/// Decode the JSON type descriptor reported by `SHOW COLUMNS`
///
/// e.g. `{"type":"FIXED","precision":38,"scale":0,"nullable":true}`
pub fn map_catalog_type(descriptor: &str) -> Result<DimensionType, WarehouseError> {
    let parsed: serde_json::Value = serde_json::from_str(descriptor)
        .map_err(|e| WarehouseError::parse(format!("Invalid Snowflake data_type '{}': {}", descriptor, e)))?;
    let native = parsed
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| WarehouseError::parse(format!("Snowflake data_type has no type: {}", descriptor)))?;
    map_field_type(native)
}

/// Format a scaled integer (`value / 10^scale`) as exact decimal text
pub fn format_scaled(value: i128, scale: u32) -> String {
    if scale == 0 {
        return value.to_string();
    }
    let digits = value.unsigned_abs().to_string();
    let width = scale as usize + 1;
    let padded = format!("{:0>width$}", digits, width = width);
    let (whole, fraction) = padded.split_at(padded.len() - scale as usize);
    let sign = if value < 0 { "-" } else { "" };
    format!("{}{}.{}", sign, whole, fraction)
}

/// Timestamp from an epoch value scaled by `10^scale`
fn scaled_timestamp(value: i128, scale: u32) -> Option<DateTime<Utc>> {
    let per_second = 10_i128.checked_pow(scale)?;
    let seconds = value.div_euclid(per_second);
    let nanos = value.rem_euclid(per_second) * 10_i128.checked_pow(9_u32.checked_sub(scale)?)?;
    DateTime::from_timestamp(i64::try_from(seconds).ok()?, u32::try_from(nanos).ok()?)
}

/// Parse Snowflake's `seconds.fraction` text into a scaled integer
fn parse_decimal_seconds(text: &str) -> Option<(i128, u32)> {
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let scale = u32::try_from(fraction.len()).ok()?;
    let magnitude: i128 = format!("{}{}", whole, fraction).parse().ok()?;
    Some((if negative { -magnitude } else { magnitude }, scale))
}

fn epoch_date(days: i64) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(chrono::TimeDelta::try_days(days)?)
}

fn time_of_day(value: i128, scale: u32) -> Option<String> {
    let timestamp = scaled_timestamp(value, scale)?;
    let time: NaiveTime = timestamp.time();
    Some(time.to_string())
}

fn parse_variant(text: &str) -> FieldValue {
    serde_json::from_str(text)
        .map(FieldValue::Json)
        .unwrap_or_else(|_| FieldValue::String(text.to_string()))
}

/// `TimestampNtz` → `TIMESTAMP_NTZ`
pub fn upper_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(ch.to_ascii_uppercase());
    }
    out
}

/// Decode one cell of a JSON-format result
///
/// Snowflake encodes every JSON cell as text: dates as days since the epoch,
/// timestamps as `seconds.fraction` (followed by an offset for `TIMESTAMP_TZ`).
pub fn json_cell(logical_type: &str, scale: u32, raw: Option<&str>) -> FieldValue {
    let Some(text) = raw else {
        return FieldValue::Null;
    };

    let decoded = match logical_type {
        "FIXED" if scale == 0 => text.parse::<i64>().ok().map(FieldValue::Int),
        "FIXED" => Some(FieldValue::Decimal(text.to_string())),
        "REAL" => text.parse::<f64>().ok().map(FieldValue::Float),
        "BOOLEAN" => match text {
            "1" | "true" | "TRUE" => Some(FieldValue::Bool(true)),
            "0" | "false" | "FALSE" => Some(FieldValue::Bool(false)),
            _ => None,
        },
        "DATE" => text.parse::<i64>().ok().and_then(epoch_date).map(FieldValue::Date),
        "TIMESTAMP_NTZ" | "TIMESTAMP_LTZ" | "TIMESTAMP_TZ" => text
            .split_whitespace()
            .next()
            .and_then(parse_decimal_seconds)
            .and_then(|(value, scale)| scaled_timestamp(value, scale))
            .map(FieldValue::Timestamp),
        "TIME" => parse_decimal_seconds(text)
            .and_then(|(value, scale)| time_of_day(value, scale))
            .map(FieldValue::String),
        "VARIANT" | "OBJECT" | "ARRAY" => Some(parse_variant(text)),
        _ => None,
    };

    decoded.unwrap_or_else(|| FieldValue::String(text.to_string()))
}

#[cfg(feature = "snowflake")]
fn integer_at(column: &ArrayRef, row: usize) -> Option<i128> {
    if let Some(a) = column.as_primitive_opt::<Int64Type>() {
        return Some(a.value(row).into());
    }
    if let Some(a) = column.as_primitive_opt::<Int32Type>() {
        return Some(a.value(row).into());
    }
    if let Some(a) = column.as_primitive_opt::<Int16Type>() {
        return Some(a.value(row).into());
    }
    if let Some(a) = column.as_primitive_opt::<Int8Type>() {
        return Some(a.value(row).into());
    }
    column.as_primitive_opt::<Decimal128Type>().map(|a| a.value(row))
}

/// Decode one cell of an Arrow-format result
///
/// A cell whose Arrow layout does not match its Snowflake type is a `Query`
/// error naming the column.
#[cfg(feature = "snowflake")]
fn arrow_cell(
    column: &ArrayRef,
    name: &str,
    logical_type: &str,
    scale: u32,
    row: usize,
) -> Result<FieldValue, WarehouseError> {
    if column.is_null(row) {
        return Ok(FieldValue::Null);
    }

    let decoded = match logical_type {
        "FIXED" => integer_at(column, row).map(|value| match (scale, i64::try_from(value)) {
            (0, Ok(int)) => FieldValue::Int(int),
            _ => FieldValue::Decimal(format_scaled(value, scale)),
        }),
        "REAL" => column.as_primitive_opt::<Float64Type>().map(|a| FieldValue::Float(a.value(row))),
        "BOOLEAN" => column.as_boolean_opt().map(|a| FieldValue::Bool(a.value(row))),
        "DATE" => column
            .as_primitive_opt::<Date32Type>()
            .and_then(|a| epoch_date(a.value(row).into()))
            .map(FieldValue::Date),
        "TIMESTAMP_NTZ" | "TIMESTAMP_LTZ" | "TIMESTAMP_TZ" => {
            if let Some(s) = column.as_struct_opt() {
                let epoch = s.column_by_name("epoch").and_then(|c| c.as_primitive_opt::<Int64Type>());
                let fraction = s.column_by_name("fraction").and_then(|c| c.as_primitive_opt::<Int32Type>());
                match (epoch, fraction) {
                    (Some(epoch), Some(fraction)) => u32::try_from(fraction.value(row))
                        .ok()
                        .and_then(|nanos| DateTime::from_timestamp(epoch.value(row), nanos))
                        .map(FieldValue::Timestamp),
                    _ => None,
                }
            } else {
                integer_at(column, row)
                    .and_then(|value| scaled_timestamp(value, scale))
                    .map(FieldValue::Timestamp)
            }
        }
        "TIME" => integer_at(column, row)
            .and_then(|value| time_of_day(value, scale))
            .map(FieldValue::String),
        "VARIANT" | "OBJECT" | "ARRAY" => column
            .as_string_opt::<i32>()
            .map(|a| parse_variant(a.value(row))),
        "BINARY" => column.as_binary_opt::<i32>().map(|a| {
            FieldValue::String(a.value(row).iter().map(|b| format!("{:02x}", b)).collect())
        }),
        _ => None,
    };

    decoded
        .or_else(|| column.as_string_opt::<i32>().map(|a| FieldValue::String(a.value(row).to_string())))
        .ok_or_else(|| {
            WarehouseError::query(format!(
                "Cannot decode Snowflake column '{}' of type {} from Arrow {:?}",
                name,
                logical_type,
                column.data_type()
            ))
        })
}

#[cfg(feature = "snowflake")]
fn decode_arrow(batches: Vec<RecordBatch>) -> Result<QueryResult, WarehouseError> {
    let Some(first) = batches.first() else {
        return Ok(QueryResult::empty());
    };

    let layout = first
        .schema()
        .fields()
        .iter()
        .map(|field| {
            let metadata = field.metadata();
            let logical_type = metadata.get("logicalType").cloned().unwrap_or_else(|| "TEXT".to_string());
            let scale = metadata.get("scale").and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
            map_field_type(&logical_type).map(|dimension_type| (field.name().clone(), logical_type, scale, dimension_type))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::new();
    for batch in &batches {
        for row in 0..batch.num_rows() {
            let cells = layout
                .iter()
                .zip(batch.columns())
                .map(|((name, logical_type, scale, _), column)| arrow_cell(column, name, logical_type, *scale, row))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(cells);
        }
    }

    let columns = layout
        .into_iter()
        .map(|(name, _, _, dimension_type)| (name, dimension_type))
        .collect();
    Ok(QueryResult::from_columns(columns, rows))
}

#[cfg(feature = "snowflake")]
fn decode_json(result: snowflake_api::JsonResult) -> Result<QueryResult, WarehouseError> {
    let layout = result
        .schema
        .iter()
        .map(|field| {
            let logical_type = upper_snake(&format!("{:?}", field.type_));
            let scale = field.scale.and_then(|s| u32::try_from(s).ok()).unwrap_or(0);
            map_field_type(&logical_type).map(|dimension_type| (field.name.clone(), logical_type, scale, dimension_type))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let rows = result
        .value
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    layout
                        .iter()
                        .enumerate()
                        .map(|(idx, (_, logical_type, scale, _))| {
                            let raw = row.get(idx).and_then(serde_json::Value::as_str);
                            json_cell(logical_type, *scale, raw)
                        })
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default();

    let columns = layout
        .into_iter()
        .map(|(name, _, _, dimension_type)| (name, dimension_type))
        .collect();
    Ok(QueryResult::from_columns(columns, rows))
}

/// Session settings for a Snowflake account
#[derive(Debug, Clone)]
pub struct SnowflakeConnector {
    account: String,
    user: String,
    password: Option<SecretString>,
    private_key: Option<SecretString>,
    private_key_pass: Option<SecretString>,
    access_url: Option<String>,
    role: Option<String>,
    database: String,
    warehouse: String,
    schema: String,
    start_of_week: Option<WeekDay>,
}

impl SnowflakeConnector {
    pub fn new(credentials: SnowflakeCredentials) -> Self {
        Self {
            account: credentials.account,
            user: credentials.user,
            password: credentials.password,
            private_key: credentials.private_key,
            private_key_pass: credentials.private_key_pass,
            access_url: credentials.access_url,
            role: credentials.role,
            database: credentials.database,
            warehouse: credentials.warehouse,
            schema: credentials.schema,
            start_of_week: credentials.start_of_week,
        }
    }

    #[cfg_attr(not(feature = "snowflake"), allow(dead_code))]
    fn connection_error(message: impl std::fmt::Display) -> WarehouseError {
        WarehouseError::connection(format!("Snowflake error: {}", message))
    }

    /// Account identifier that routes requests to the configured endpoint
    ///
    /// The REST client addresses `https://{identifier}.snowflakecomputing.com`,
    /// so an `access_url` contributes the host prefix in front of that domain.
    #[cfg_attr(not(feature = "snowflake"), allow(dead_code))]
    fn endpoint_account(&self) -> Result<String, WarehouseError> {
        let Some(access_url) = self.access_url.as_deref().map(str::trim).filter(|url| !url.is_empty()) else {
            return Ok(self.account.clone());
        };

        let host = access_url
            .strip_prefix("https://")
            .unwrap_or(access_url)
            .split(['/', ':'])
            .next()
            .unwrap_or_default()
            .to_lowercase();

        host.strip_suffix(".snowflakecomputing.com")
            .filter(|prefix| !prefix.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                Self::connection_error(format!(
                    "access_url '{}' must be an https://<host>.snowflakecomputing.com endpoint",
                    access_url
                ))
            })
    }

    /// Unencrypted PKCS#8 PEM for key-pair login
    #[cfg(feature = "snowflake")]
    fn login_key(&self, private_key: &SecretString) -> Result<SecretString, WarehouseError> {
        match &self.private_key_pass {
            Some(pass) => decrypt_private_key(private_key, pass),
            None => Ok(private_key.clone()),
        }
    }
}

/// Decrypt an `ENCRYPTED PRIVATE KEY` PEM into a plain PKCS#8 PEM
#[cfg(feature = "snowflake")]
pub fn decrypt_private_key(pem: &SecretString, pass: &SecretString) -> Result<SecretString, WarehouseError> {
    use pkcs8::der::Document;
    use pkcs8::der::pem::LineEnding;
    use pkcs8::EncryptedPrivateKeyInfo;
    use secrecy::ExposeSecret;

    let key_error = |e: &dyn std::fmt::Display| {
        SnowflakeConnector::connection_error(format!("cannot decrypt private key: {}", e))
    };

    let (label, document) = Document::from_pem(pem.expose_secret().trim()).map_err(|e| key_error(&e))?;
    if label != "ENCRYPTED PRIVATE KEY" {
        return Err(key_error(&format!(
            "expected an ENCRYPTED PRIVATE KEY PEM with private_key_pass, found {}",
            label
        )));
    }

    let info = EncryptedPrivateKeyInfo::try_from(document.as_bytes()).map_err(|e| key_error(&e))?;
    let decrypted = info
        .decrypt(pass.expose_secret().as_bytes())
        .map_err(|e| key_error(&e))?;
    let pem = decrypted
        .to_pem("PRIVATE KEY", LineEnding::LF)
        .map_err(|e| key_error(&e))?;
    Ok(SecretString::from(pem.as_str()))
}

/// An open Snowflake session
pub struct SnowflakeConnection {
    #[cfg(feature = "snowflake")]
    api: snowflake_api::SnowflakeApi,

    #[cfg(not(feature = "snowflake"))]
    _phantom: std::marker::PhantomData<()>,
}

#[async_trait::async_trait]
impl WarehouseConnection for SnowflakeConnection {
    #[cfg(feature = "snowflake")]
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, WarehouseError> {
        use snowflake_api::QueryResult as RawResult;

        let result = self
            .api
            .exec(sql)
            .await
            .map_err(|e| WarehouseError::query(e.to_string()))?;

        match result {
            RawResult::Arrow(batches) => decode_arrow(batches),
            RawResult::Json(json) => decode_json(json),
            RawResult::Empty => Ok(QueryResult::empty()),
        }
    }

    #[cfg(not(feature = "snowflake"))]
    async fn execute(&mut self, _sql: &str) -> Result<QueryResult, WarehouseError> {
        Err(crate::not_compiled("Snowflake", "snowflake"))
    }

    #[cfg(feature = "snowflake")]
    async fn close(self) -> Result<(), WarehouseError> {
        let mut api = self.api;
        api.close_session()
            .await
            .map_err(|e| WarehouseError::connection(format!("Failed to close Snowflake session: {}", e)))
    }

    #[cfg(not(feature = "snowflake"))]
    async fn close(self) -> Result<(), WarehouseError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connector for SnowflakeConnector {
    type Connection = SnowflakeConnection;

    fn backend(&self) -> &'static str {
        "Snowflake"
    }

    /// Build the session; authentication happens on the first statement
    #[cfg(feature = "snowflake")]
    async fn connect(&self) -> Result<SnowflakeConnection, WarehouseError> {
        use secrecy::ExposeSecret;
        use snowflake_api::SnowflakeApi;

        let account = self.endpoint_account()?;
        let api = match (&self.private_key, &self.password) {
            (Some(private_key), _) => SnowflakeApi::with_certificate_auth(
                &account,
                Some(&self.warehouse),
                Some(&self.database),
                Some(&self.schema),
                &self.user,
                self.role.as_deref(),
                self.login_key(private_key)?.expose_secret(),
            ),
            (None, Some(password)) => SnowflakeApi::with_password_auth(
                &account,
                Some(&self.warehouse),
                Some(&self.database),
                Some(&self.schema),
                &self.user,
                self.role.as_deref(),
                password.expose_secret(),
            ),
            (None, None) => return Err(Self::connection_error("either password or private_key is required")),
        }
        .map_err(Self::connection_error)?;

        Ok(SnowflakeConnection { api })
    }

    #[cfg(not(feature = "snowflake"))]
    async fn connect(&self) -> Result<SnowflakeConnection, WarehouseError> {
        Err(crate::not_compiled("Snowflake", "snowflake"))
    }

    fn session_statements(&self) -> Vec<String> {
        let mut statements = vec!["ALTER SESSION SET TIMEZONE = 'UTC'".to_string()];
        if let Some(day) = self.start_of_week {
            statements.push(format!("ALTER SESSION SET WEEK_START = {}", one_based_week_start(day)));
        }
        statements
    }
}

/// Snowflake warehouse client
pub struct SnowflakeClient {
    connector: SnowflakeConnector,
}

impl SnowflakeClient {
    pub fn new(credentials: SnowflakeCredentials) -> Self {
        Self {
            connector: SnowflakeConnector::new(credentials),
        }
    }

    pub fn connector(&self) -> &SnowflakeConnector {
        &self.connector
    }
}

#[async_trait::async_trait]
impl WarehouseClient for SnowflakeClient {
    fn name(&self) -> &'static str {
        "Snowflake"
    }

    fn start_of_week(&self) -> Option<WeekDay> {
        self.connector.start_of_week
    }

    async fn run_query(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        query_in_session(&self.connector, sql).await
    }

    async fn get_catalog(&self, selectors: &[TableSelector]) -> Result<WarehouseCatalog, WarehouseError> {
        if selectors.is_empty() {
            return Ok(WarehouseCatalog::new());
        }
        let listing = query_in_session(&self.connector, SNOWFLAKE_CATALOG_SQL).await?;
        fold_catalog(selectors, &listing, &SNOWFLAKE_METADATA, map_catalog_type)
    }
}
