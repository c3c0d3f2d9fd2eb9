//! Warehouse clients behind one contract
//!
//! Every backend exposes the same operations through [`WarehouseClient`]:
//! `test`, `run_query`, `get_catalog` and `start_of_week`. Clients hold
//! configuration only; each call opens its own connection, configures the
//! session (UTC timezone, then week start where supported), runs, and closes.
//!
//! ## Features
//!
//! Enable warehouse wire support via Cargo features:
//! - `bigquery` - Google BigQuery (jobs.query REST API)
//! - `databricks` - Databricks SQL warehouses (Statement Execution API)
//! - `duckdb` - DuckDB embedded databases
//! - `postgres` - PostgreSQL
//! - `redshift` - Amazon Redshift (PostgreSQL wire protocol)
//! - `snowflake` - Snowflake
//! - `all-warehouses` - All of the above
//!
//! Type normalization, session statements and catalog queries are always
//! compiled. Without its feature a backend fails at connect time.
//!
//! ## Example
//!
//! ```rust,ignore
//! use quarry_core::{Credentials, TableSelector};
//! use quarry_warehouses::create_client;
//!
//! let client = create_client(credentials);
//! client.test().await?;
//! let result = client.run_query("SELECT 1").await?;
//! let catalog = client.get_catalog(&[TableSelector::new("db", "public", "users")]).await?;
//! ```

pub mod bigquery;
pub mod catalog;
pub mod client;
pub mod databricks;
pub mod duckdb;
pub mod factory;
pub mod mock;
pub mod normalizer;
pub mod postgres;
pub mod redshift;
pub mod session;
pub mod snowflake;

pub use bigquery::BigQueryClient;
pub use catalog::{fold_catalog, MetadataColumns};
pub use client::WarehouseClient;
pub use databricks::DatabricksClient;
pub use crate::duckdb::DuckdbClient;
pub use factory::{create_client, create_client_from_value};
pub use mock::{MockConnector, MockScript, MockWarehouseClient};
pub use postgres::PostgresClient;
pub use redshift::RedshiftClient;
pub use session::{run_in_session, Connector, WarehouseConnection};
pub use snowflake::SnowflakeClient;

/// Error for a backend whose wire support was not compiled in
pub(crate) fn not_compiled(backend: &str, feature: &str) -> quarry_core::WarehouseError {
    quarry_core::WarehouseError::connection(format!(
        "{} support not compiled. Rebuild with: cargo build --features {}",
        backend, feature
    ))
}
