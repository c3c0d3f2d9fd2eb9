//! Mock warehouse backend for testing
//!
//! Returns scripted results without connecting to any warehouse, while going
//! through the same session lifecycle as the real backends. It's useful for:
//! - Unit testing code built on `WarehouseClient`
//! - Verifying connection teardown and session configuration
//! - Simulating connection, query and teardown failures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quarry_warehouses::mock::{MockScript, MockWarehouseClient};
//!
//! let client = MockWarehouseClient::new(
//!     MockScript::new()
//!         .with_result("SELECT 1", result)
//!         .with_latency(50),
//! );
//! client.test().await?;
//! ```

use crate::catalog::{fold_catalog, MetadataColumns};
use crate::client::WarehouseClient;
use crate::normalizer::{self, TypeTable};
use crate::session::{one_based_week_start, query_in_session, Connector, WarehouseConnection};
use quarry_core::{
    DimensionType, FieldValue, QueryResult, TableSelector, WarehouseCatalog, WarehouseError, WeekDay,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Metadata query the mock client runs for `get_catalog`
pub const MOCK_CATALOG_SQL: &str =
    "SELECT table_catalog, table_schema, table_name, column_name, data_type FROM information_schema.columns";

const MOCK_TYPES: TypeTable = &[
    ("INT", DimensionType::Number),
    ("INTEGER", DimensionType::Number),
    ("BIGINT", DimensionType::Number),
    ("NUMBER", DimensionType::Number),
    ("DECIMAL", DimensionType::Number),
    ("NUMERIC", DimensionType::Number),
    ("FLOAT", DimensionType::Number),
    ("DOUBLE", DimensionType::Number),
    ("DATE", DimensionType::Date),
    ("TIMESTAMP", DimensionType::Timestamp),
    ("BOOLEAN", DimensionType::Boolean),
];

/// Build an `information_schema.columns`-shaped listing
///
/// Each tuple is `(database, schema, table, column, data_type)`.
pub fn catalog_listing(rows: &[(&str, &str, &str, &str, &str)]) -> QueryResult {
    let columns = ["table_catalog", "table_schema", "table_name", "column_name", "data_type"]
        .iter()
        .map(|name| (name.to_string(), DimensionType::String))
        .collect();
    let rows = rows
        .iter()
        .map(|(database, schema, table, column, data_type)| {
            [database, schema, table, column, data_type]
                .iter()
                .map(|v| FieldValue::from(**v))
                .collect()
        })
        .collect();
    QueryResult::from_columns(columns, rows)
}

/// Connection and teardown counters shared by a connector and its connections
#[derive(Debug, Default)]
pub struct MockStats {
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl MockStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Builder describing how the mock backend behaves
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    results: HashMap<String, Result<QueryResult, WarehouseError>>,
    connect_failure: Option<String>,
    close_failure: Option<String>,
    latency_ms: u64,
    week_start_support: bool,
}

impl MockScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `result` whenever `sql` is executed
    pub fn with_result(mut self, sql: impl Into<String>, result: QueryResult) -> Self {
        self.results.insert(sql.into(), Ok(result));
        self
    }

    /// Fail with a query error whenever `sql` is executed
    pub fn with_query_error(mut self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.results.insert(sql.into(), Err(WarehouseError::query(message)));
        self
    }

    /// Serve `rows` as the metadata listing used by `get_catalog`
    pub fn with_catalog(self, rows: &[(&str, &str, &str, &str, &str)]) -> Self {
        self.with_result(MOCK_CATALOG_SQL, catalog_listing(rows))
    }

    /// Reject every connection attempt
    pub fn with_connect_failure(mut self, message: impl Into<String>) -> Self {
        self.connect_failure = Some(message.into());
        self
    }

    /// Fail every teardown
    pub fn with_close_failure(mut self, message: impl Into<String>) -> Self {
        self.close_failure = Some(message.into());
        self
    }

    /// Delay every statement by `latency_ms` milliseconds
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Whether the simulated backend accepts a per-session week start
    pub fn with_week_start_support(mut self, supported: bool) -> Self {
        self.week_start_support = supported;
        self
    }
}

/// Connector handing out scripted connections
#[derive(Clone)]
pub struct MockConnector {
    results: Arc<RwLock<HashMap<String, Result<QueryResult, WarehouseError>>>>,
    connect_failure: Option<String>,
    close_failure: Option<String>,
    latency_ms: u64,
    week_start_support: bool,
    start_of_week: Option<WeekDay>,
    stats: Arc<MockStats>,
    executed: Arc<RwLock<Vec<String>>>,
}

impl MockConnector {
    pub fn new(script: MockScript) -> Self {
        Self {
            results: Arc::new(RwLock::new(script.results)),
            connect_failure: script.connect_failure,
            close_failure: script.close_failure,
            latency_ms: script.latency_ms,
            week_start_support: script.week_start_support,
            start_of_week: None,
            stats: Arc::new(MockStats::default()),
            executed: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_start_of_week(mut self, start_of_week: Option<WeekDay>) -> Self {
        self.start_of_week = start_of_week;
        self
    }

    pub fn stats(&self) -> &MockStats {
        &self.stats
    }

    /// Every statement executed so far, session statements included
    pub async fn executed(&self) -> Vec<String> {
        self.executed.read().await.clone()
    }

    /// Replace or add a scripted result
    pub async fn set_result(&self, sql: impl Into<String>, result: QueryResult) {
        self.results.write().await.insert(sql.into(), Ok(result));
    }
}

/// A scripted connection
pub struct MockConnection {
    results: Arc<RwLock<HashMap<String, Result<QueryResult, WarehouseError>>>>,
    close_failure: Option<String>,
    latency_ms: u64,
    stats: Arc<MockStats>,
    executed: Arc<RwLock<Vec<String>>>,
}

impl MockConnection {
    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl WarehouseConnection for MockConnection {
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, WarehouseError> {
        self.simulate_latency().await;
        self.executed.write().await.push(sql.to_string());

        match self.results.read().await.get(sql) {
            Some(scripted) => scripted.clone(),
            None if sql.starts_with("SET ") => Ok(QueryResult::empty()),
            None => Err(WarehouseError::query(format!("Mock has no result scripted for: {}", sql))),
        }
    }

    async fn close(self) -> Result<(), WarehouseError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        match self.close_failure {
            Some(message) => Err(WarehouseError::connection(message)),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    fn backend(&self) -> &'static str {
        "Mock"
    }

    async fn connect(&self) -> Result<MockConnection, WarehouseError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.connect_failure {
            return Err(WarehouseError::connection(format!("Mock error: {}", message)));
        }

        Ok(MockConnection {
            results: Arc::clone(&self.results),
            close_failure: self.close_failure.clone(),
            latency_ms: self.latency_ms,
            stats: Arc::clone(&self.stats),
            executed: Arc::clone(&self.executed),
        })
    }

    fn session_statements(&self) -> Vec<String> {
        let mut statements = vec!["SET TIMEZONE = 'UTC'".to_string()];
        if let (true, Some(day)) = (self.week_start_support, self.start_of_week) {
            statements.push(format!("SET WEEK_START = {}", one_based_week_start(day)));
        }
        statements
    }
}

/// A `WarehouseClient` backed by a `MockConnector`
#[derive(Clone)]
pub struct MockWarehouseClient {
    connector: MockConnector,
    name: &'static str,
}

impl MockWarehouseClient {
    pub fn new(script: MockScript) -> Self {
        Self::from_connector(MockConnector::new(script))
    }

    pub fn from_connector(connector: MockConnector) -> Self {
        Self { connector, name: "Mock" }
    }

    pub fn with_start_of_week(mut self, start_of_week: Option<WeekDay>) -> Self {
        self.connector = self.connector.with_start_of_week(start_of_week);
        self
    }

    /// Set a custom client name, useful when mocking a specific warehouse
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn connector(&self) -> &MockConnector {
        &self.connector
    }
}

#[async_trait::async_trait]
impl WarehouseClient for MockWarehouseClient {
    fn name(&self) -> &'static str {
        self.name
    }

    fn start_of_week(&self) -> Option<WeekDay> {
        self.connector.start_of_week
    }

    async fn run_query(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        query_in_session(&self.connector, sql).await
    }

    async fn get_catalog(&self, selectors: &[TableSelector]) -> Result<WarehouseCatalog, WarehouseError> {
        let listing = query_in_session(&self.connector, MOCK_CATALOG_SQL).await?;
        fold_catalog(selectors, &listing, &MetadataColumns::INFORMATION_SCHEMA, |raw| {
            normalizer::normalize("Mock", MOCK_TYPES, raw)
        })
    }
}
