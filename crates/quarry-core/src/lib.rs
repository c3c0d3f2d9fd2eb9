//! Quarry Core
//!
//! Backend-neutral domain model shared by every warehouse client: the
//! canonical dimension types, query results, catalogs, credentials and the
//! error kinds that cross the warehouse boundary.

pub mod catalog;
pub mod config;
pub mod credentials;
pub mod error;
pub mod types;

pub use catalog::{TableSelector, WarehouseCatalog};
pub use config::{Config, ConfigError};
pub use credentials::{
    BigQueryCredentials, Credentials, DatabricksCredentials, DuckdbCredentials,
    PostgresCredentials, RedshiftCredentials, SnowflakeCredentials, SslMode,
    WarehouseType,
};
pub use error::WarehouseError;
pub use types::{DimensionType, FieldMetadata, FieldValue, QueryResult, Row, WeekDay};
