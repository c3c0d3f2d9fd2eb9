//! BigQuery client using the jobs.query REST API
//!
//! Authenticates with the service account key from the credentials. BigQuery
//! has no session state: timestamps are always UTC on the wire and there is
//! no per-session week start, so no session statements are issued.
//!
//! ## Paging
//!
//! `jobs.query` waits up to the configured timeout. A job still running after
//! that is polled through `jobs.getQueryResults`, and every `pageToken` is
//! followed until the last page, so results are never truncated.
//!
//! ## Catalog
//!
//! `INFORMATION_SCHEMA.COLUMNS` is scoped to a dataset, so one metadata
//! query runs per distinct `(project, dataset)` among the requested tables.
//! Datasets BigQuery reports as not found contribute nothing.
//!
//! Reference: https://cloud.google.com/bigquery/docs/information-schema-columns

use crate::catalog::{fold_catalog, MetadataColumns};
use crate::client::WarehouseClient;
use crate::normalizer::{self, TypeTable};
use crate::session::{query_in_session, run_in_session, Connector, WarehouseConnection};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quarry_core::{
    BigQueryCredentials, DimensionType, FieldValue, QueryResult, TableSelector, WarehouseCatalog, WarehouseError,
    WeekDay,
};
use serde::Deserialize;
use std::collections::BTreeSet;

#[cfg(feature = "bigquery")]
use gcp_bigquery_client::{
    model::get_query_results_parameters::GetQueryResultsParameters, model::query_request::QueryRequest,
    Client as BigQueryApi,
};

/// BigQuery native types by canonical token
pub const BIGQUERY_TYPES: TypeTable = &[
    ("INTEGER", DimensionType::Number),
    ("INT", DimensionType::Number),
    ("FLOAT", DimensionType::Number),
    ("NUMERIC", DimensionType::Number),
    ("BIGNUMERIC", DimensionType::Number),
    ("DATE", DimensionType::Date),
    ("TIMESTAMP", DimensionType::Timestamp),
    ("DATETIME", DimensionType::Timestamp),
    ("TIME", DimensionType::Timestamp),
    ("BOOLEAN", DimensionType::Boolean),
    ("BOOL", DimensionType::Boolean),
];

pub fn map_field_type(native_type: &str) -> Result<DimensionType, WarehouseError> {
    normalizer::normalize("BigQuery", BIGQUERY_TYPES, native_type)
}

/// Metadata query for one dataset
pub fn catalog_sql(project: &str, dataset: &str) -> String {
    format!(
        "SELECT table_catalog, table_schema, table_name, column_name, data_type \
         FROM `{}.{}.INFORMATION_SCHEMA.COLUMNS`",
        project, dataset
    )
}

/// Distinct `(project, dataset)` pairs among the selectors
pub fn datasets(selectors: &[TableSelector]) -> BTreeSet<(String, String)> {
    selectors
        .iter()
        .map(|s| (s.database.clone(), s.schema.clone()))
        .collect()
}

/// Decode one JSON cell of a query response
///
/// BigQuery returns scalars as strings. TIMESTAMP values are floating-point
/// seconds since the epoch; DATETIME values are ISO text without an offset.
pub fn json_cell(field_type: &str, repeated: bool, value: Option<&serde_json::Value>) -> FieldValue {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return FieldValue::Null;
    };
    if repeated || matches!(field_type, "RECORD" | "STRUCT" | "JSON") {
        return FieldValue::Json(value.clone());
    }
    let Some(text) = value.as_str() else {
        return FieldValue::Json(value.clone());
    };

    let decoded = match field_type {
        "INTEGER" | "INT64" => text.parse::<i64>().ok().map(FieldValue::Int),
        "FLOAT" | "FLOAT64" => text.parse::<f64>().ok().map(FieldValue::Float),
        "NUMERIC" | "BIGNUMERIC" => Some(FieldValue::Decimal(text.to_string())),
        "BOOLEAN" | "BOOL" => text.parse::<bool>().ok().map(FieldValue::Bool),
        "TIMESTAMP" => text
            .parse::<f64>()
            .ok()
            .and_then(|seconds| DateTime::<Utc>::from_timestamp_micros((seconds * 1_000_000.0).round() as i64))
            .map(FieldValue::Timestamp),
        "DATE" => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(FieldValue::Date),
        "DATETIME" => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|dt| FieldValue::Timestamp(dt.and_utc())),
        _ => None,
    };

    decoded.unwrap_or_else(|| FieldValue::String(text.to_string()))
}

/// Query settings for a BigQuery project
#[derive(Clone)]
pub struct BigQueryConnector {
    project: String,
    keyfile_contents: serde_json::Value,
    location: Option<String>,
    timeout_seconds: Option<u32>,
    maximum_bytes_billed: Option<u64>,
}

impl BigQueryConnector {
    pub fn new(credentials: &BigQueryCredentials) -> Self {
        Self {
            project: credentials.project.clone(),
            keyfile_contents: credentials.keyfile_contents.clone(),
            location: credentials.location.clone(),
            timeout_seconds: credentials.timeout_seconds,
            maximum_bytes_billed: credentials.maximum_bytes_billed,
        }
    }
}

/// An authenticated BigQuery API client
pub struct BigQueryConnection {
    #[cfg(feature = "bigquery")]
    api: BigQueryApi,

    #[cfg(feature = "bigquery")]
    settings: BigQueryConnector,

    #[cfg(not(feature = "bigquery"))]
    _phantom: std::marker::PhantomData<()>,
}

/// One `jobs.query` or `jobs.getQueryResults` response body
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    pub job_complete: Option<bool>,
    #[serde(default)]
    pub job_reference: Option<JobReference>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub schema: Option<PageSchema>,
    #[serde(default)]
    pub rows: Option<Vec<PageRow>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageSchema {
    #[serde(default)]
    pub fields: Vec<PageField>,
}

#[derive(Debug, Deserialize)]
pub struct PageField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageRow {
    #[serde(rename = "f", default)]
    pub cells: Vec<PageCell>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageCell {
    #[serde(rename = "v", default)]
    pub value: Option<serde_json::Value>,
}

/// Fetches follow-up pages of a query job
#[async_trait::async_trait]
pub trait PageFetcher: Send {
    /// The page after `page_token`, or the job status when there is none
    async fn fetch(&mut self, job: &JobReference, page_token: Option<&str>) -> Result<QueryPage, WarehouseError>;
}

fn page_layout(schema: Option<PageSchema>) -> Result<Vec<(String, String, bool, DimensionType)>, WarehouseError> {
    schema
        .map(|schema| schema.fields)
        .unwrap_or_default()
        .into_iter()
        .map(|field| {
            let repeated = field.mode.as_deref() == Some("REPEATED");
            let dimension_type = if repeated {
                DimensionType::String
            } else {
                map_field_type(&field.field_type)?
            };
            Ok((field.name, field.field_type, repeated, dimension_type))
        })
        .collect()
}

fn page_rows(rows: Option<Vec<PageRow>>, layout: &[(String, String, bool, DimensionType)]) -> Vec<Vec<FieldValue>> {
    rows.unwrap_or_default()
        .into_iter()
        .map(|row| {
            layout
                .iter()
                .enumerate()
                .map(|(idx, (_, native, repeated, _))| {
                    json_cell(native, *repeated, row.cells.get(idx).and_then(|cell| cell.value.as_ref()))
                })
                .collect()
        })
        .collect()
}

/// Wait for the job to finish, then gather the rows of every page
pub async fn collect_pages<F: PageFetcher>(first: QueryPage, fetcher: &mut F) -> Result<QueryResult, WarehouseError> {
    let mut page = first;
    let mut job = page.job_reference.clone();

    while page.job_complete == Some(false) {
        let reference = job
            .as_ref()
            .ok_or_else(|| WarehouseError::query("BigQuery job is still running but has no job reference"))?;
        tracing::debug!(job_id = ?reference.job_id, "BigQuery job still running, polling");
        page = fetcher.fetch(reference, None).await?;
        if page.job_reference.is_some() {
            job = page.job_reference.clone();
        }
    }

    let layout = page_layout(page.schema.take())?;
    let mut rows = page_rows(page.rows.take(), &layout);

    while let Some(token) = page.page_token.take() {
        let reference = job
            .as_ref()
            .ok_or_else(|| WarehouseError::query("BigQuery result has more pages but no job reference"))?;
        tracing::trace!(page_token = %token, rows = rows.len(), "fetching next BigQuery page");
        page = fetcher.fetch(reference, Some(&token)).await?;
        rows.extend(page_rows(page.rows.take(), &layout));
    }

    let columns = layout
        .into_iter()
        .map(|(name, _, _, dimension_type)| (name, dimension_type))
        .collect();
    Ok(QueryResult::from_columns(columns, rows))
}

/// Re-read an SDK response through its REST field names
#[cfg(feature = "bigquery")]
fn to_page<T: serde::Serialize>(response: &T) -> Result<QueryPage, WarehouseError> {
    serde_json::to_value(response)
        .and_then(serde_json::from_value)
        .map_err(|e| WarehouseError::parse(format!("Unexpected BigQuery response: {}", e)))
}

/// `jobs.getQueryResults` for one project
#[cfg(feature = "bigquery")]
struct JobPages<'a> {
    api: &'a BigQueryApi,
    project: &'a str,
    timeout_ms: Option<i32>,
}

#[cfg(feature = "bigquery")]
#[async_trait::async_trait]
impl PageFetcher for JobPages<'_> {
    async fn fetch(&mut self, job: &JobReference, page_token: Option<&str>) -> Result<QueryPage, WarehouseError> {
        let job_id = job
            .job_id
            .as_deref()
            .ok_or_else(|| WarehouseError::query("BigQuery job reference has no job id"))?;

        let parameters = GetQueryResultsParameters {
            location: job.location.clone(),
            page_token: page_token.map(str::to_string),
            timeout_ms: self.timeout_ms,
            ..Default::default()
        };

        let response = self
            .api
            .job()
            .get_query_results(self.project, job_id, parameters)
            .await
            .map_err(|e| WarehouseError::query(e.to_string()))?;
        to_page(&response)
    }
}

#[async_trait::async_trait]
impl WarehouseConnection for BigQueryConnection {
    #[cfg(feature = "bigquery")]
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, WarehouseError> {
        let mut request = QueryRequest::new(sql.to_string());
        request.location = self.settings.location.clone();
        let timeout_ms = self
            .settings
            .timeout_seconds
            .and_then(|s| i32::try_from(u64::from(s) * 1000).ok());
        request.timeout_ms = timeout_ms;
        request.maximum_bytes_billed = self.settings.maximum_bytes_billed.map(|b| b.to_string());

        let response = self
            .api
            .job()
            .query(&self.settings.project, request)
            .await
            .map_err(|e| WarehouseError::query(e.to_string()))?;

        let mut pages = JobPages {
            api: &self.api,
            project: &self.settings.project,
            timeout_ms,
        };
        collect_pages(to_page(&response)?, &mut pages).await
    }

    #[cfg(not(feature = "bigquery"))]
    async fn execute(&mut self, _sql: &str) -> Result<QueryResult, WarehouseError> {
        Err(crate::not_compiled("BigQuery", "bigquery"))
    }

    // REST client: nothing to release
    async fn close(self) -> Result<(), WarehouseError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connector for BigQueryConnector {
    type Connection = BigQueryConnection;

    fn backend(&self) -> &'static str {
        "BigQuery"
    }

    #[cfg(feature = "bigquery")]
    async fn connect(&self) -> Result<BigQueryConnection, WarehouseError> {
        let key: gcp_bigquery_client::yup_oauth2::ServiceAccountKey =
            serde_json::from_value(self.keyfile_contents.clone())
                .map_err(|e| WarehouseError::connection(format!("Failed to parse service account JSON: {}", e)))?;

        let api = BigQueryApi::from_service_account_key(key, false)
            .await
            .map_err(|e| WarehouseError::connection(format!("Failed to authenticate with BigQuery: {}", e)))?;

        Ok(BigQueryConnection {
            api,
            settings: self.clone(),
        })
    }

    #[cfg(not(feature = "bigquery"))]
    async fn connect(&self) -> Result<BigQueryConnection, WarehouseError> {
        Err(crate::not_compiled("BigQuery", "bigquery"))
    }

    fn session_statements(&self) -> Vec<String> {
        Vec::new()
    }
}

/// BigQuery warehouse client
pub struct BigQueryClient {
    connector: BigQueryConnector,
    start_of_week: Option<WeekDay>,
}

impl BigQueryClient {
    pub fn new(credentials: BigQueryCredentials) -> Self {
        Self {
            connector: BigQueryConnector::new(&credentials),
            start_of_week: credentials.start_of_week,
        }
    }

    pub fn connector(&self) -> &BigQueryConnector {
        &self.connector
    }
}

#[async_trait::async_trait]
impl WarehouseClient for BigQueryClient {
    fn name(&self) -> &'static str {
        "BigQuery"
    }

    fn start_of_week(&self) -> Option<WeekDay> {
        self.start_of_week
    }

    async fn run_query(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        query_in_session(&self.connector, sql).await
    }

    async fn get_catalog(&self, selectors: &[TableSelector]) -> Result<WarehouseCatalog, WarehouseError> {
        let datasets = datasets(selectors);
        if datasets.is_empty() {
            return Ok(WarehouseCatalog::new());
        }

        let listing = run_in_session(&self.connector, |mut connection| async move {
            let mut listing = QueryResult::empty();
            for (project, dataset) in &datasets {
                match connection.execute(&catalog_sql(project, dataset)).await {
                    Ok(result) => {
                        listing.fields.extend(result.fields);
                        listing.rows.extend(result.rows);
                    }
                    Err(WarehouseError::Query(message)) if message.contains("Not found") => {
                        tracing::debug!(project = %project, dataset = %dataset, "dataset not found, skipping");
                    }
                    Err(e) => return (connection, Err(e)),
                }
            }
            (connection, Ok(listing))
        })
        .await?;

        fold_catalog(selectors, &listing, &MetadataColumns::INFORMATION_SCHEMA, map_field_type)
    }
}
