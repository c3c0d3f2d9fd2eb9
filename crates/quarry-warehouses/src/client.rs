//! The contract every warehouse client exposes

use quarry_core::{QueryResult, TableSelector, WarehouseCatalog, WarehouseError, WeekDay};

/// Uniform client over one configured warehouse
///
/// Clients hold configuration only. Each call opens its own connection and
/// releases it before returning, so one client can serve concurrent calls.
#[async_trait::async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Get the backend name (e.g., "BigQuery", "Snowflake")
    fn name(&self) -> &'static str;

    /// Configured first day of the week, if any
    fn start_of_week(&self) -> Option<WeekDay>;

    /// Validate connectivity and credentials
    async fn test(&self) -> Result<(), WarehouseError> {
        self.run_query("SELECT 1").await.map(|_| ())
    }

    /// Run finished SQL text and return normalized rows
    async fn run_query(&self, sql: &str) -> Result<QueryResult, WarehouseError>;

    /// Column types for the requested tables
    ///
    /// Tables that cannot be found are simply absent from the result.
    async fn get_catalog(&self, selectors: &[TableSelector]) -> Result<WarehouseCatalog, WarehouseError>;
}
