//! PostgreSQL client over the native wire protocol
//!
//! Each call opens a fresh `tokio-postgres` connection, drives it on a
//! background task, pins the session timezone to UTC and closes the
//! connection by dropping the client and awaiting the driver task.
//!
//! ## TLS
//!
//! `sslmode = disable` connects in plain text. `prefer` and `require` use
//! `native-tls`; `prefer` falls back to plain text when the server refuses TLS.
//!
//! ## Values
//!
//! Cells are decoded from the binary wire format per type. Types without a
//! decoder (geometric types, ranges, composite rows) fail the query with a
//! `Query` error asking for a `::text` cast.
//!
//! ## Catalog
//!
//! Column types come from `information_schema.columns`, excluding the system
//! schemas.
//!
//! Reference: https://www.postgresql.org/docs/current/information-schema-columns.html

use crate::catalog::{fold_catalog, MetadataColumns};
use crate::client::WarehouseClient;
use crate::normalizer::{self, TypeTable};
use crate::session::{query_in_session, Connector, WarehouseConnection};
use quarry_core::{
    DimensionType, PostgresCredentials, QueryResult, SslMode, TableSelector, WarehouseCatalog,
    WarehouseError, WeekDay,
};
use secrecy::SecretString;

#[cfg(feature = "postgres")]
use quarry_core::FieldValue;
#[cfg(feature = "postgres")]
use secrecy::ExposeSecret;

#[cfg(feature = "postgres")]
use tokio_postgres::types::{FromSql, Kind, Type};

/// PostgreSQL native types by canonical token
pub const POSTGRES_TYPES: TypeTable = &[
    ("SMALLINT", DimensionType::Number),
    ("INTEGER", DimensionType::Number),
    ("INT", DimensionType::Number),
    ("BIGINT", DimensionType::Number),
    ("DECIMAL", DimensionType::Number),
    ("NUMERIC", DimensionType::Number),
    ("REAL", DimensionType::Number),
    ("DOUBLE", DimensionType::Number),
    ("FLOAT", DimensionType::Number),
    ("MONEY", DimensionType::Number),
    ("SMALLSERIAL", DimensionType::Number),
    ("SERIAL", DimensionType::Number),
    ("BIGSERIAL", DimensionType::Number),
    ("OID", DimensionType::Number),
    ("DATE", DimensionType::Date),
    ("TIMESTAMP", DimensionType::Timestamp),
    ("TIMESTAMPTZ", DimensionType::Timestamp),
    ("TIME", DimensionType::Timestamp),
    ("TIMETZ", DimensionType::Timestamp),
    ("BOOLEAN", DimensionType::Boolean),
    ("BOOL", DimensionType::Boolean),
];

pub const POSTGRES_CATALOG_SQL: &str = "SELECT table_catalog, table_schema, table_name, column_name, data_type \
     FROM information_schema.columns \
     WHERE table_schema NOT IN ('pg_catalog', 'information_schema')";

/// Map a PostgreSQL type name to a dimension type
pub fn map_field_type(native_type: &str) -> Result<DimensionType, WarehouseError> {
    normalizer::normalize("PostgreSQL", POSTGRES_TYPES, native_type)
}

/// Connection settings shared by PostgreSQL-protocol backends
#[derive(Debug, Clone)]
pub struct PgConnector {
    backend: &'static str,
    type_table: TypeTable,
    host: String,
    port: u16,
    dbname: String,
    user: String,
    password: SecretString,
    sslmode: SslMode,
    search_path: Option<String>,
}

impl PgConnector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: &'static str,
        type_table: TypeTable,
        host: impl Into<String>,
        port: u16,
        dbname: impl Into<String>,
        user: impl Into<String>,
        password: SecretString,
        sslmode: SslMode,
    ) -> Self {
        Self {
            backend,
            type_table,
            host: host.into(),
            port,
            dbname: dbname.into(),
            user: user.into(),
            password,
            sslmode,
            search_path: None,
        }
    }

    pub fn with_search_path(mut self, search_path: Option<String>) -> Self {
        self.search_path = search_path;
        self
    }

    #[cfg(feature = "postgres")]
    fn config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .password(self.password.expose_secret())
            .ssl_mode(match self.sslmode {
                SslMode::Disable => tokio_postgres::config::SslMode::Disable,
                SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
                SslMode::Require => tokio_postgres::config::SslMode::Require,
            });
        config
    }

    fn connection_error(&self, message: impl std::fmt::Display) -> WarehouseError {
        WarehouseError::connection(format!(
            "Failed to connect to {} at {}:{}: {}",
            self.backend, self.host, self.port, message
        ))
    }
}

/// An open PostgreSQL-protocol connection
pub struct PgConnection {
    #[cfg(feature = "postgres")]
    client: tokio_postgres::Client,

    /// Background task driving the socket; ends once the client is dropped
    #[cfg(feature = "postgres")]
    driver: tokio::task::JoinHandle<()>,

    backend: &'static str,
    type_table: TypeTable,
}

#[cfg(feature = "postgres")]
fn spawn_driver<S, T>(backend: &'static str, connection: tokio_postgres::Connection<S, T>) -> tokio::task::JoinHandle<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(backend, error = %e, "connection driver stopped");
        }
    })
}

#[cfg(feature = "postgres")]
fn error_message(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => db.message().to_string(),
        None => e.to_string(),
    }
}

#[cfg(feature = "postgres")]
impl PgConnection {
    fn native_type_name(ty: &Type) -> &str {
        match ty.kind() {
            Kind::Array(_) => "ARRAY",
            _ => ty.name(),
        }
    }

    fn decode_cell(&self, row: &tokio_postgres::Row, idx: usize) -> Result<FieldValue, WarehouseError> {
        let column = &row.columns()[idx];
        let ty = column.type_();
        let failed = |e: tokio_postgres::Error| {
            WarehouseError::query(format!(
                "Failed to decode {} column '{}': {}",
                self.backend,
                column.name(),
                e
            ))
        };

        let value = match *ty {
            Type::BOOL => row.try_get::<_, Option<bool>>(idx).map_err(failed)?.map(FieldValue::Bool),
            Type::INT2 => row.try_get::<_, Option<i16>>(idx).map_err(failed)?.map(|v| FieldValue::Int(v.into())),
            Type::INT4 => row.try_get::<_, Option<i32>>(idx).map_err(failed)?.map(|v| FieldValue::Int(v.into())),
            Type::INT8 => row.try_get::<_, Option<i64>>(idx).map_err(failed)?.map(FieldValue::Int),
            Type::OID => row.try_get::<_, Option<u32>>(idx).map_err(failed)?.map(|v| FieldValue::Int(v.into())),
            Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx).map_err(failed)?.map(|v| FieldValue::Float(v.into())),
            Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map_err(failed)?.map(FieldValue::Float),
            Type::NUMERIC => row
                .try_get::<_, Option<PgNumeric>>(idx)
                .map_err(failed)?
                .map(|n| FieldValue::Decimal(n.0)),
            Type::MONEY => row
                .try_get::<_, Option<PgWire>>(idx)
                .map_err(failed)?
                .map(|w| FieldValue::Decimal(w.0)),
            Type::DATE => row.try_get::<_, Option<chrono::NaiveDate>>(idx).map_err(failed)?.map(FieldValue::Date),
            Type::TIMESTAMP => row
                .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                .map_err(failed)?
                .map(|ts| FieldValue::Timestamp(ts.and_utc())),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .map_err(failed)?
                .map(FieldValue::Timestamp),
            Type::TIME => row
                .try_get::<_, Option<chrono::NaiveTime>>(idx)
                .map_err(failed)?
                .map(|t| FieldValue::String(t.to_string())),
            Type::JSON | Type::JSONB => row
                .try_get::<_, Option<serde_json::Value>>(idx)
                .map_err(failed)?
                .map(FieldValue::Json),
            Type::UUID => row
                .try_get::<_, Option<uuid::Uuid>>(idx)
                .map_err(failed)?
                .map(|id| FieldValue::String(id.to_string())),
            Type::BYTEA => row
                .try_get::<_, Option<Vec<u8>>>(idx)
                .map_err(failed)?
                .map(|bytes| FieldValue::String(format_bytea(&bytes))),
            Type::INTERVAL | Type::INET | Type::CIDR | Type::TIMETZ => row
                .try_get::<_, Option<PgWire>>(idx)
                .map_err(failed)?
                .map(|w| FieldValue::String(w.0)),
            _ => match ty.kind() {
                Kind::Array(element) => self.decode_array(row, idx, element, column.name())?,
                _ if PgText::accepts(ty) => row.try_get::<_, Option<PgText>>(idx).map_err(failed)?.map(|t| FieldValue::String(t.0)),
                _ => return Err(self.unsupported(column.name(), ty)),
            },
        };

        Ok(value.unwrap_or(FieldValue::Null))
    }

    /// One-dimensional arrays of scalar elements become JSON arrays
    fn decode_array(
        &self,
        row: &tokio_postgres::Row,
        idx: usize,
        element: &Type,
        name: &str,
    ) -> Result<Option<FieldValue>, WarehouseError> {
        fn json<T: Into<serde_json::Value>>(items: Option<Vec<Option<T>>>) -> Option<FieldValue> {
            items.map(|items| {
                FieldValue::Json(serde_json::Value::Array(
                    items.into_iter().map(|item| item.map_or(serde_json::Value::Null, Into::into)).collect(),
                ))
            })
        }

        let failed = |e: tokio_postgres::Error| {
            WarehouseError::query(format!("Failed to decode {} column '{}': {}", self.backend, name, e))
        };

        match *element {
            Type::BOOL => row.try_get::<_, Option<Vec<Option<bool>>>>(idx).map(json).map_err(failed),
            Type::INT2 => row.try_get::<_, Option<Vec<Option<i16>>>>(idx).map(json).map_err(failed),
            Type::INT4 => row.try_get::<_, Option<Vec<Option<i32>>>>(idx).map(json).map_err(failed),
            Type::INT8 => row.try_get::<_, Option<Vec<Option<i64>>>>(idx).map(json).map_err(failed),
            Type::FLOAT4 => row.try_get::<_, Option<Vec<Option<f32>>>>(idx).map(json).map_err(failed),
            Type::FLOAT8 => row.try_get::<_, Option<Vec<Option<f64>>>>(idx).map(json).map_err(failed),
            _ if PgText::accepts(element) => row
                .try_get::<_, Option<Vec<Option<PgText>>>>(idx)
                .map(|items| json(items.map(|items| items.into_iter().map(|t| t.map(|t| t.0)).collect())))
                .map_err(failed),
            _ => Err(self.unsupported(name, row.columns()[idx].type_())),
        }
    }

    fn unsupported(&self, column: &str, ty: &Type) -> WarehouseError {
        WarehouseError::query(format!(
            "Unsupported {} type '{}' in column '{}'; cast it with ::text",
            self.backend,
            ty.name(),
            column
        ))
    }
}

#[async_trait::async_trait]
impl WarehouseConnection for PgConnection {
    #[cfg(feature = "postgres")]
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, WarehouseError> {
        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| WarehouseError::query(error_message(&e)))?;

        let columns = statement
            .columns()
            .iter()
            .map(|column| {
                let native = Self::native_type_name(column.type_());
                normalizer::normalize(self.backend, self.type_table, native)
                    .map(|dimension_type| (column.name().to_string(), dimension_type))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let rows = self
            .client
            .query(&statement, &[])
            .await
            .map_err(|e| WarehouseError::query(error_message(&e)))?;

        let values = rows
            .iter()
            .map(|row| (0..row.len()).map(|idx| self.decode_cell(row, idx)).collect::<Result<Vec<_>, _>>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QueryResult::from_columns(columns, values))
    }

    #[cfg(not(feature = "postgres"))]
    async fn execute(&mut self, _sql: &str) -> Result<QueryResult, WarehouseError> {
        let _ = self.type_table;
        Err(crate::not_compiled(self.backend, "postgres"))
    }

    #[cfg(feature = "postgres")]
    async fn close(self) -> Result<(), WarehouseError> {
        drop(self.client);
        self.driver
            .await
            .map_err(|e| WarehouseError::connection(format!("{} connection task failed: {}", self.backend, e)))
    }

    #[cfg(not(feature = "postgres"))]
    async fn close(self) -> Result<(), WarehouseError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;

    fn backend(&self) -> &'static str {
        self.backend
    }

    #[cfg(feature = "postgres")]
    async fn connect(&self) -> Result<PgConnection, WarehouseError> {
        let config = self.config();

        let (client, driver) = match self.sslmode {
            SslMode::Disable => {
                let (client, connection) = config
                    .connect(tokio_postgres::NoTls)
                    .await
                    .map_err(|e| self.connection_error(error_message(&e)))?;
                (client, spawn_driver(self.backend, connection))
            }
            SslMode::Prefer | SslMode::Require => {
                let connector = native_tls::TlsConnector::builder()
                    .build()
                    .map_err(|e| self.connection_error(format!("Failed to create TLS connector: {}", e)))?;
                let tls = postgres_native_tls::MakeTlsConnector::new(connector);
                let (client, connection) = config
                    .connect(tls)
                    .await
                    .map_err(|e| self.connection_error(error_message(&e)))?;
                (client, spawn_driver(self.backend, connection))
            }
        };

        Ok(PgConnection {
            client,
            driver,
            backend: self.backend,
            type_table: self.type_table,
        })
    }

    #[cfg(not(feature = "postgres"))]
    async fn connect(&self) -> Result<PgConnection, WarehouseError> {
        let _ = self.connection_error("");
        Err(crate::not_compiled(self.backend, "postgres"))
    }

    fn session_statements(&self) -> Vec<String> {
        let mut statements = vec!["SET timezone TO 'UTC'".to_string()];
        if let Some(search_path) = &self.search_path {
            statements.push(format!("SET search_path TO {}", search_path));
        }
        statements
    }

    // SET statements cannot be prepared, so they go through the simple protocol
    #[cfg(feature = "postgres")]
    async fn configure_session(&self, connection: &mut PgConnection) -> Result<(), WarehouseError> {
        for statement in self.session_statements() {
            tracing::debug!(backend = self.backend, statement = %statement, "configuring session");
            connection
                .client
                .batch_execute(&statement)
                .await
                .map_err(|e| WarehouseError::connection(error_message(&e)))?;
        }
        Ok(())
    }
}

/// Exact text of a binary-encoded NUMERIC
#[cfg(feature = "postgres")]
struct PgNumeric(String);

#[cfg(feature = "postgres")]
impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        decode_numeric(raw).map(PgNumeric).map_err(Into::into)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Types whose binary form is their UTF-8 text: strings, enums, XML
#[cfg(feature = "postgres")]
struct PgText(String);

#[cfg(feature = "postgres")]
impl<'a> FromSql<'a> for PgText {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(PgText(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN | Type::XML)
            || matches!(ty.kind(), Kind::Enum(_))
            || ty.name() == "citext"
    }
}

/// Binary forms rendered as text by hand
#[cfg(feature = "postgres")]
struct PgWire(String);

#[cfg(feature = "postgres")]
impl<'a> FromSql<'a> for PgWire {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        let text = match *ty {
            Type::INTERVAL => decode_interval(raw),
            Type::INET | Type::CIDR => decode_inet(raw),
            Type::TIMETZ => decode_timetz(raw),
            Type::MONEY => decode_money(raw),
            _ => Err(format!("no text form for type {}", ty.name())),
        };
        text.map(PgWire).map_err(Into::into)
    }

    fn accepts(ty: &Type) -> bool {
        matches!(*ty, Type::INTERVAL | Type::INET | Type::CIDR | Type::TIMETZ | Type::MONEY)
    }
}

fn fixed<const N: usize>(raw: &[u8], offset: usize, what: &str) -> Result<[u8; N], String> {
    raw.get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| format!("{} value truncated at byte {}", what, offset))
}

/// `HH:MM:SS` with a fractional part only when present
fn clock(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let micros = micros.unsigned_abs();
    let (seconds, fraction) = (micros / 1_000_000, micros % 1_000_000);
    let mut text = format!("{}{:02}:{:02}:{:02}", sign, seconds / 3600, seconds / 60 % 60, seconds % 60);
    if fraction > 0 {
        let digits = format!("{:06}", fraction);
        text.push('.');
        text.push_str(digits.trim_end_matches('0'));
    }
    text
}

/// Render a binary INTERVAL (microseconds, days, months) in PostgreSQL's
/// default output style, e.g. `1 year 2 mons 3 days 04:05:06`
pub fn decode_interval(raw: &[u8]) -> Result<String, String> {
    let micros = i64::from_be_bytes(fixed(raw, 0, "interval")?);
    let days = i32::from_be_bytes(fixed(raw, 8, "interval")?);
    let months = i32::from_be_bytes(fixed(raw, 12, "interval")?);

    let unit = |n: i32, one: &str, many: &str| format!("{} {}", n, if n.abs() == 1 { one } else { many });
    let mut parts = Vec::new();
    if months / 12 != 0 {
        parts.push(unit(months / 12, "year", "years"));
    }
    if months % 12 != 0 {
        parts.push(unit(months % 12, "mon", "mons"));
    }
    if days != 0 {
        parts.push(unit(days, "day", "days"));
    }
    if micros != 0 || parts.is_empty() {
        parts.push(clock(micros));
    }
    Ok(parts.join(" "))
}

/// Render a binary INET or CIDR (family, bits, is_cidr, length, address)
pub fn decode_inet(raw: &[u8]) -> Result<String, String> {
    let [family, bits, is_cidr, length] = fixed(raw, 0, "inet")?;
    let (address, max_bits) = match (family, length) {
        (2, 4) => (std::net::IpAddr::from(fixed::<4>(raw, 4, "inet")?), 32),
        (3, 16) => (std::net::IpAddr::from(fixed::<16>(raw, 4, "inet")?), 128),
        _ => return Err(format!("unknown inet family {} with {} address bytes", family, length)),
    };
    if is_cidr == 1 || bits != max_bits {
        Ok(format!("{}/{}", address, bits))
    } else {
        Ok(address.to_string())
    }
}

/// Render a binary TIMETZ (microseconds, zone seconds west of UTC)
pub fn decode_timetz(raw: &[u8]) -> Result<String, String> {
    let micros = i64::from_be_bytes(fixed(raw, 0, "timetz")?);
    let west = i32::from_be_bytes(fixed(raw, 8, "timetz")?);
    let east = -west;
    let sign = if east < 0 { '-' } else { '+' };
    let offset = east.unsigned_abs();
    let mut zone = format!("{}{:02}", sign, offset / 3600);
    if offset % 3600 != 0 {
        zone.push_str(&format!(":{:02}", offset / 60 % 60));
    }
    Ok(format!("{}{}", clock(micros), zone))
}

/// Render a binary MONEY (integer cents) as decimal text
pub fn decode_money(raw: &[u8]) -> Result<String, String> {
    let cents = i64::from_be_bytes(fixed(raw, 0, "money")?);
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    Ok(format!("{}{}.{:02}", sign, cents / 100, cents % 100))
}

/// PostgreSQL hex output for BYTEA, e.g. `\xdeadbeef`
pub fn format_bytea(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(2 + bytes.len() * 2);
    text.push_str("\\x");
    for byte in bytes {
        text.push_str(&format!("{:02x}", byte));
    }
    text
}

/// Render PostgreSQL's binary NUMERIC format as decimal text
///
/// Layout: ndigits, weight, sign, dscale (all 16-bit), then ndigits base-10000
/// digits. `weight` is the power of 10000 of the first digit.
pub fn decode_numeric(raw: &[u8]) -> Result<String, String> {
    let read = |offset: usize| -> Result<u16, String> {
        raw.get(offset..offset + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| format!("numeric value truncated at byte {}", offset))
    };

    let ndigits = read(0)? as usize;
    let weight = read(2)? as i16 as i32;
    let sign = read(4)?;
    let dscale = read(6)? as usize;

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits).map(|i| read(8 + i * 2)).collect::<Result<Vec<_>, _>>()?;
    let digit_at = |position: i32| -> u16 {
        usize::try_from(position)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == 0x4000 {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit_at(0).to_string());
        for position in 1..=weight {
            text.push_str(&format!("{:04}", digit_at(position)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut position = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(position)));
            position += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Ok(text)
}

/// PostgreSQL warehouse client
pub struct PostgresClient {
    connector: PgConnector,
    start_of_week: Option<WeekDay>,
}

impl PostgresClient {
    pub fn new(credentials: PostgresCredentials) -> Self {
        let connector = PgConnector::new(
            "PostgreSQL",
            POSTGRES_TYPES,
            credentials.host,
            credentials.port,
            credentials.dbname,
            credentials.user,
            credentials.password,
            credentials.sslmode,
        )
        .with_search_path(credentials.search_path);

        Self {
            connector,
            start_of_week: credentials.start_of_week,
        }
    }

    pub fn connector(&self) -> &PgConnector {
        &self.connector
    }
}

#[async_trait::async_trait]
impl WarehouseClient for PostgresClient {
    fn name(&self) -> &'static str {
        "PostgreSQL"
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
        let listing = query_in_session(&self.connector, POSTGRES_CATALOG_SQL).await?;
        fold_catalog(selectors, &listing, &MetadataColumns::INFORMATION_SCHEMA, map_field_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> PostgresCredentials {
        PostgresCredentials {
            host: "localhost".to_string(),
            user: "analyst".to_string(),
            password: SecretString::from("hunter2"),
            port: 5432,
            dbname: "warehouse".to_string(),
            schema: "public".to_string(),
            search_path: None,
            sslmode: SslMode::Disable,
            start_of_week: Some(WeekDay::Monday),
        }
    }

    fn numeric(ndigits: u16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        for part in [ndigits, weight as u16, sign, dscale] {
            raw.extend_from_slice(&part.to_be_bytes());
        }
        for digit in digits {
            raw.extend_from_slice(&digit.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(map_field_type("int4").unwrap(), DimensionType::Number);
        assert_eq!(map_field_type("float8").unwrap(), DimensionType::Number);
        assert_eq!(map_field_type("numeric(10,2)").unwrap(), DimensionType::Number);
        assert_eq!(map_field_type("double precision").unwrap(), DimensionType::Number);
        assert_eq!(map_field_type("timestamp without time zone").unwrap(), DimensionType::Timestamp);
        assert_eq!(map_field_type("timestamptz").unwrap(), DimensionType::Timestamp);
        assert_eq!(map_field_type("date").unwrap(), DimensionType::Date);
        assert_eq!(map_field_type("bool").unwrap(), DimensionType::Boolean);
        assert_eq!(map_field_type("character varying").unwrap(), DimensionType::String);
        assert_eq!(map_field_type("ARRAY").unwrap(), DimensionType::String);
        assert_eq!(map_field_type("USER-DEFINED").unwrap(), DimensionType::String);
    }

    #[test]
    fn test_array_element_names_are_malformed() {
        assert!(matches!(map_field_type("_int4"), Err(WarehouseError::Parse(_))));
    }

    #[test]
    fn test_session_statements_ignore_week_start() {
        let client = PostgresClient::new(credentials());
        assert_eq!(client.start_of_week(), Some(WeekDay::Monday));
        assert_eq!(client.connector().session_statements(), vec!["SET timezone TO 'UTC'".to_string()]);
    }

    #[test]
    fn test_search_path_follows_timezone() {
        let mut creds = credentials();
        creds.search_path = Some("analytics, public".to_string());
        let client = PostgresClient::new(creds);

        assert_eq!(
            client.connector().session_statements(),
            vec![
                "SET timezone TO 'UTC'".to_string(),
                "SET search_path TO analytics, public".to_string(),
            ]
        );
    }

    #[test]
    fn test_decode_numeric() {
        assert_eq!(decode_numeric(&numeric(2, 0, 0, 1, &[12, 5000])).unwrap(), "12.5");
        assert_eq!(decode_numeric(&numeric(1, -1, 0, 2, &[500])).unwrap(), "0.05");
        assert_eq!(decode_numeric(&numeric(1, -2, 0, 5, &[1000])).unwrap(), "0.00001");
        assert_eq!(decode_numeric(&numeric(1, 1, 0, 0, &[1])).unwrap(), "10000");
        assert_eq!(decode_numeric(&numeric(0, 0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(decode_numeric(&numeric(2, 0, 0x4000, 2, &[3, 1400])).unwrap(), "-3.14");
        assert_eq!(decode_numeric(&numeric(0, 0, 0xC000, 0, &[])).unwrap(), "NaN");
    }

    #[test]
    fn test_decode_numeric_rejects_truncated_input() {
        assert!(decode_numeric(&[0, 1]).is_err());
        assert!(decode_numeric(&numeric(2, 0, 0, 0, &[1])).is_err());
    }

    #[test]
    fn test_decode_interval() {
        let interval = |micros: i64, days: i32, months: i32| {
            let mut raw = micros.to_be_bytes().to_vec();
            raw.extend_from_slice(&days.to_be_bytes());
            raw.extend_from_slice(&months.to_be_bytes());
            decode_interval(&raw).unwrap()
        };
        assert_eq!(interval(14_706_000_000, 3, 14), "1 year 2 mons 3 days 04:05:06");
        assert_eq!(interval(0, 1, 0), "1 day");
        assert_eq!(interval(1_500_000, 0, 0), "00:00:01.5");
        assert_eq!(interval(-3_600_000_000, 0, 0), "-01:00:00");
        assert_eq!(interval(0, 0, 0), "00:00:00");
        assert!(decode_interval(&[0; 8]).is_err());
    }

    #[test]
    fn test_decode_inet() {
        assert_eq!(decode_inet(&[2, 32, 0, 4, 192, 168, 0, 1]).unwrap(), "192.168.0.1");
        assert_eq!(decode_inet(&[2, 24, 0, 4, 10, 0, 0, 0]).unwrap(), "10.0.0.0/24");
        assert_eq!(decode_inet(&[2, 32, 1, 4, 10, 0, 0, 1]).unwrap(), "10.0.0.1/32");

        let mut v6 = vec![3, 128, 0, 16];
        v6.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(decode_inet(&v6).unwrap(), "2001:db8::1");
        assert!(decode_inet(&[9, 32, 0, 4, 1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_decode_timetz_and_money() {
        let mut raw = 45_296_000_000_i64.to_be_bytes().to_vec();
        raw.extend_from_slice(&(-19_800_i32).to_be_bytes());
        assert_eq!(decode_timetz(&raw).unwrap(), "12:34:56+05:30");

        let mut raw = 0_i64.to_be_bytes().to_vec();
        raw.extend_from_slice(&18_000_i32.to_be_bytes());
        assert_eq!(decode_timetz(&raw).unwrap(), "00:00:00-05");

        assert_eq!(decode_money(&123_456_i64.to_be_bytes()).unwrap(), "1234.56");
        assert_eq!(decode_money(&(-5_i64).to_be_bytes()).unwrap(), "-0.05");
    }

    #[test]
    fn test_format_bytea() {
        assert_eq!(format_bytea(&[0xde, 0xad, 0xbe, 0xef]), "\\xdeadbeef");
        assert_eq!(format_bytea(&[]), "\\x");
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_binary_types_are_not_read_as_text() {
        assert!(!PgText::accepts(&Type::UUID));
        assert!(!PgText::accepts(&Type::INTERVAL));
        assert!(PgText::accepts(&Type::VARCHAR));
        assert!(PgText::accepts(&Type::TEXT));

        let id = uuid::Uuid::from_sql(
            &Type::UUID,
            &[0xde, 0xad, 0xbe, 0xef, 0, 0, 0x40, 0, 0x80, 0, 0, 0, 0, 0, 0, 1],
        )
        .unwrap();
        assert_eq!(id.to_string(), "deadbeef-0000-4000-8000-000000000001");

        assert!(PgText::from_sql(&Type::TEXT, &[0xff, 0xfe]).is_err());
    }

    #[tokio::test]
    async fn test_empty_selectors_skip_the_metadata_query() {
        let client = PostgresClient::new(credentials());
        let catalog = client.get_catalog(&[]).await.unwrap();
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    #[cfg(not(feature = "postgres"))]
    async fn test_connect_without_feature() {
        let client = PostgresClient::new(credentials());
        let err = client.test().await.unwrap_err();
        assert!(matches!(err, WarehouseError::Connection(ref m) if m.contains("--features postgres")));
    }
}
