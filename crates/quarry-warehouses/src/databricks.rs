//! Databricks SQL warehouse client using the Statement Execution API
//!
//! Connecting fetches the warehouse description, which validates the host,
//! token and warehouse id before any statement runs. Statements are submitted
//! with a 50s wait and polled until they finish. The API is stateless, so
//! there is no session to configure: timestamp offsets are converted to UTC
//! while decoding instead.
//!
//! Reference: https://docs.databricks.com/api/workspace/statementexecution

use crate::catalog::{fold_catalog, MetadataColumns};
use crate::client::WarehouseClient;
use crate::normalizer::{self, TypeTable};
use crate::session::{query_in_session, Connector, WarehouseConnection};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quarry_core::{
    DatabricksCredentials, DimensionType, FieldValue, QueryResult, TableSelector, WarehouseCatalog,
    WarehouseError, WeekDay,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[cfg(feature = "databricks")]
use secrecy::ExposeSecret;

/// Databricks native types by canonical token
pub const DATABRICKS_TYPES: TypeTable = &[
    ("TINYINT", DimensionType::Number),
    ("BYTE", DimensionType::Number),
    ("SMALLINT", DimensionType::Number),
    ("SHORT", DimensionType::Number),
    ("INT", DimensionType::Number),
    ("INTEGER", DimensionType::Number),
    ("BIGINT", DimensionType::Number),
    ("LONG", DimensionType::Number),
    ("FLOAT", DimensionType::Number),
    ("REAL", DimensionType::Number),
    ("DOUBLE", DimensionType::Number),
    ("DECIMAL", DimensionType::Number),
    ("DEC", DimensionType::Number),
    ("NUMERIC", DimensionType::Number),
    ("DATE", DimensionType::Date),
    ("TIMESTAMP", DimensionType::Timestamp),
    ("BOOLEAN", DimensionType::Boolean),
];

pub const DATABRICKS_CATALOG_SQL: &str = "SELECT table_catalog, table_schema, table_name, column_name, full_data_type \
     FROM system.information_schema.columns \
     WHERE table_schema <> 'information_schema'";

pub const DATABRICKS_METADATA: MetadataColumns = MetadataColumns {
    data_type: "full_data_type",
    ..MetadataColumns::INFORMATION_SCHEMA
};

pub fn map_field_type(native_type: &str) -> Result<DimensionType, WarehouseError> {
    normalizer::normalize("Databricks", DATABRICKS_TYPES, native_type)
}

/// Decode one cell of an inline JSON_ARRAY result
///
/// Every cell arrives as text. Timestamps carrying an offset are converted to
/// UTC; `TIMESTAMP_NTZ` values are taken as UTC.
pub fn text_cell(type_name: &str, raw: Option<&str>) -> FieldValue {
    let Some(text) = raw else {
        return FieldValue::Null;
    };

    let decoded = match type_name.to_uppercase().as_str() {
        "BYTE" | "SHORT" | "INT" | "LONG" | "TINYINT" | "SMALLINT" | "BIGINT" | "INTEGER" => {
            text.parse::<i64>().ok().map(FieldValue::Int)
        }
        "FLOAT" | "DOUBLE" | "REAL" => text.parse::<f64>().ok().map(FieldValue::Float),
        "DECIMAL" => Some(FieldValue::Decimal(text.to_string())),
        "BOOLEAN" => text.parse::<bool>().ok().map(FieldValue::Bool),
        "DATE" => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(FieldValue::Date),
        "TIMESTAMP" | "TIMESTAMP_NTZ" => parse_timestamp(text).map(FieldValue::Timestamp),
        "ARRAY" | "MAP" | "STRUCT" => serde_json::from_str(text).ok().map(FieldValue::Json),
        _ => None,
    };

    decoded.unwrap_or_else(|| FieldValue::String(text.to_string()))
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(text) {
        return Some(with_offset.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

#[derive(Serialize)]
struct StatementRequest<'a> {
    warehouse_id: &'a str,
    statement: &'a str,
    wait_timeout: &'static str,
    on_wait_timeout: &'static str,
    format: &'static str,
    disposition: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    catalog: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: Option<String>,
    status: StatementStatus,
    manifest: Option<Manifest>,
    result: Option<ResultData>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    fn describe(&self) -> String {
        match (&self.error_code, &self.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (None, Some(message)) => message.clone(),
            (Some(code), None) => code.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    schema: Option<SchemaInfo>,
}

#[derive(Debug, Deserialize)]
struct SchemaInfo {
    columns: Option<Vec<ColumnInfo>>,
}

#[derive(Debug, Deserialize)]
struct ColumnInfo {
    name: String,
    type_name: Option<String>,
    type_text: Option<String>,
}

/// Inline result rows: the first chunk in a statement response, or one
/// fetched from `/statements/{id}/result/chunks/{index}`
#[derive(Debug, Default, Deserialize)]
struct ResultData {
    #[serde(default)]
    data_array: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    next_chunk_index: Option<u64>,
    #[serde(default)]
    next_chunk_internal_link: Option<String>,
}

impl ResultData {
    /// API path of the chunk after this one
    fn next_chunk(&self, statement_id: Option<&str>) -> Result<Option<String>, WarehouseError> {
        if let Some(link) = &self.next_chunk_internal_link {
            return Ok(Some(link.clone()));
        }
        match (self.next_chunk_index, statement_id) {
            (None, _) => Ok(None),
            (Some(index), Some(id)) => Ok(Some(format!("/api/2.0/sql/statements/{}/result/chunks/{}", id, index))),
            (Some(_), None) => Err(WarehouseError::query("Result has more chunks but no statement_id")),
        }
    }
}

/// Fetches result chunks by API path
#[cfg_attr(not(feature = "databricks"), allow(dead_code))]
#[async_trait::async_trait]
trait ChunkFetcher: Send {
    async fn fetch(&mut self, path: &str) -> Result<ResultData, WarehouseError>;
}

/// Decode a finished statement, following every result chunk
#[cfg_attr(not(feature = "databricks"), allow(dead_code))]
async fn collect_statement<F: ChunkFetcher>(
    response: StatementResponse,
    fetcher: &mut F,
) -> Result<QueryResult, WarehouseError> {
    let StatementResponse {
        statement_id,
        manifest,
        result,
        ..
    } = response;

    let layout = manifest
        .and_then(|m| m.schema)
        .and_then(|s| s.columns)
        .unwrap_or_default()
        .into_iter()
        .map(|column| {
            let type_name = column.type_name.unwrap_or_else(|| "STRING".to_string());
            let native = column.type_text.unwrap_or_else(|| type_name.clone());
            map_field_type(&native).map(|dimension_type| (column.name, type_name, dimension_type))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::new();
    let mut chunk = result;
    while let Some(data) = chunk.take() {
        let next = data.next_chunk(statement_id.as_deref())?;
        rows.extend(data.data_array.unwrap_or_default().into_iter().map(|row| {
            layout
                .iter()
                .enumerate()
                .map(|(idx, (_, type_name, _))| text_cell(type_name, row.get(idx).and_then(|c| c.as_deref())))
                .collect::<Vec<_>>()
        }));
        if let Some(path) = next {
            tracing::trace!(path = %path, rows = rows.len(), "fetching next Databricks result chunk");
            chunk = Some(fetcher.fetch(&path).await?);
        }
    }

    let columns = layout
        .into_iter()
        .map(|(name, _, dimension_type)| (name, dimension_type))
        .collect();
    Ok(QueryResult::from_columns(columns, rows))
}

/// Connection settings for a Databricks SQL warehouse
#[derive(Debug, Clone)]
pub struct DatabricksConnector {
    host: String,
    token: SecretString,
    warehouse_id: Option<String>,
    catalog: Option<String>,
    schema: Option<String>,
}

impl DatabricksConnector {
    pub fn new(credentials: &DatabricksCredentials) -> Self {
        Self {
            host: credentials.server_host_name.trim_end_matches('/').to_string(),
            token: credentials.personal_access_token.clone(),
            warehouse_id: credentials.warehouse_id().map(str::to_string),
            catalog: credentials.catalog.clone(),
            schema: credentials.database.clone(),
        }
    }

    fn origin(&self) -> String {
        format!("https://{}", self.host.trim_start_matches("https://"))
    }

    fn base_url(&self) -> String {
        format!("{}/api/2.0/sql", self.origin())
    }
}

/// An authenticated HTTP client bound to one warehouse
pub struct DatabricksConnection {
    #[cfg(feature = "databricks")]
    http: reqwest::Client,

    settings: DatabricksConnector,
    warehouse_id: String,
}

#[cfg(feature = "databricks")]
impl DatabricksConnection {
    fn auth_header(&self) -> String {
        format!("Bearer {}", self.settings.token.expose_secret())
    }

    async fn error_body(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiError>(&body) {
            Ok(error) if error.message.is_some() => format!("HTTP {}: {}", status, error.describe()),
            _ => format!("HTTP {}: {}", status, body.trim()),
        }
    }

    async fn poll(&self, statement_id: &str) -> Result<StatementResponse, WarehouseError> {
        let url = format!("{}/statements/{}", self.settings.base_url(), statement_id);
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            let response = self
                .http
                .get(&url)
                .header("Authorization", self.auth_header())
                .send()
                .await
                .map_err(|e| WarehouseError::query(format!("Failed to poll statement: {}", e)))?;
            if !response.status().is_success() {
                return Err(WarehouseError::query(Self::error_body(response).await));
            }

            let statement: StatementResponse = response
                .json()
                .await
                .map_err(|e| WarehouseError::query(format!("Failed to parse statement status: {}", e)))?;
            if !matches!(statement.status.state.as_str(), "PENDING" | "RUNNING") {
                return Ok(statement);
            }
        }
    }
}

#[cfg(feature = "databricks")]
#[async_trait::async_trait]
impl<'a> ChunkFetcher for &'a DatabricksConnection {
    async fn fetch(&mut self, path: &str) -> Result<ResultData, WarehouseError> {
        let response = self
            .http
            .get(format!("{}{}", self.settings.origin(), path))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| WarehouseError::query(format!("Failed to fetch result chunk: {}", e)))?;
        if !response.status().is_success() {
            return Err(WarehouseError::query(DatabricksConnection::error_body(response).await));
        }

        response
            .json()
            .await
            .map_err(|e| WarehouseError::query(format!("Failed to parse result chunk: {}", e)))
    }
}

#[async_trait::async_trait]
impl WarehouseConnection for DatabricksConnection {
    #[cfg(feature = "databricks")]
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, WarehouseError> {
        let request = StatementRequest {
            warehouse_id: &self.warehouse_id,
            statement: sql,
            wait_timeout: "50s",
            on_wait_timeout: "CONTINUE",
            format: "JSON_ARRAY",
            disposition: "INLINE",
            catalog: self.settings.catalog.as_deref(),
            schema: self.settings.schema.as_deref(),
        };

        let response = self
            .http
            .post(format!("{}/statements/", self.settings.base_url()))
            .header("Authorization", self.auth_header())
            .json(&request)
            .send()
            .await
            .map_err(|e| WarehouseError::query(format!("Failed to execute statement: {}", e)))?;
        if !response.status().is_success() {
            return Err(WarehouseError::query(Self::error_body(response).await));
        }

        let mut statement: StatementResponse = response
            .json()
            .await
            .map_err(|e| WarehouseError::query(format!("Failed to parse statement response: {}", e)))?;

        if matches!(statement.status.state.as_str(), "PENDING" | "RUNNING") {
            let statement_id = statement
                .statement_id
                .clone()
                .ok_or_else(|| WarehouseError::query("No statement_id in pending response"))?;
            statement = self.poll(&statement_id).await?;
        }

        let state = statement.status.state.clone();
        match state.as_str() {
            "SUCCEEDED" => collect_statement(statement, &mut &*self).await,
            "FAILED" => Err(WarehouseError::query(
                statement
                    .status
                    .error
                    .map(|e| e.describe())
                    .unwrap_or_else(|| "unknown error".to_string()),
            )),
            "CANCELED" | "CLOSED" => Err(WarehouseError::query("Statement was canceled")),
            other => Err(WarehouseError::query(format!("Unexpected statement state: {}", other))),
        }
    }

    #[cfg(not(feature = "databricks"))]
    async fn execute(&mut self, _sql: &str) -> Result<QueryResult, WarehouseError> {
        let _ = (&self.settings, &self.warehouse_id);
        Err(crate::not_compiled("Databricks", "databricks"))
    }

    // Stateless HTTP API: nothing to release
    async fn close(self) -> Result<(), WarehouseError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connector for DatabricksConnector {
    type Connection = DatabricksConnection;

    fn backend(&self) -> &'static str {
        "Databricks"
    }

    #[cfg(feature = "databricks")]
    async fn connect(&self) -> Result<DatabricksConnection, WarehouseError> {
        let warehouse_id = self
            .warehouse_id
            .clone()
            .ok_or_else(|| WarehouseError::connection("Databricks http_path does not name a warehouse"))?;

        let connection = DatabricksConnection {
            http: reqwest::Client::new(),
            settings: self.clone(),
            warehouse_id,
        };

        let response = connection
            .http
            .get(format!("{}/warehouses/{}", self.base_url(), connection.warehouse_id))
            .header("Authorization", connection.auth_header())
            .send()
            .await
            .map_err(|e| WarehouseError::connection(format!("Databricks error: {}", e)))?;
        if !response.status().is_success() {
            let message = DatabricksConnection::error_body(response).await;
            return Err(WarehouseError::connection(format!("Databricks error: {}", message)));
        }

        Ok(connection)
    }

    #[cfg(not(feature = "databricks"))]
    async fn connect(&self) -> Result<DatabricksConnection, WarehouseError> {
        Err(crate::not_compiled("Databricks", "databricks"))
    }

    fn session_statements(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Databricks warehouse client
pub struct DatabricksClient {
    connector: DatabricksConnector,
    start_of_week: Option<WeekDay>,
}

impl DatabricksClient {
    pub fn new(credentials: DatabricksCredentials) -> Self {
        Self {
            connector: DatabricksConnector::new(&credentials),
            start_of_week: credentials.start_of_week,
        }
    }

    pub fn connector(&self) -> &DatabricksConnector {
        &self.connector
    }
}

#[async_trait::async_trait]
impl WarehouseClient for DatabricksClient {
    fn name(&self) -> &'static str {
        "Databricks"
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
        let listing = query_in_session(&self.connector, DATABRICKS_CATALOG_SQL).await?;
        fold_catalog(selectors, &listing, &DATABRICKS_METADATA, map_field_type)
    }
}
