//! Amazon Redshift client
//!
//! Redshift speaks the PostgreSQL wire protocol, so connections reuse
//! [`PgConnector`]. The catalog comes from `svv_columns`, which also lists
//! late-binding views and external (Spectrum) tables.

use crate::catalog::{fold_catalog, MetadataColumns};
use crate::client::WarehouseClient;
use crate::normalizer::{self, TypeTable};
use crate::postgres::{PgConnector, POSTGRES_TYPES};
use crate::session::query_in_session;
use quarry_core::{
    DimensionType, QueryResult, RedshiftCredentials, TableSelector, WarehouseCatalog, WarehouseError, WeekDay,
};

/// Redshift shares PostgreSQL's type vocabulary
pub const REDSHIFT_TYPES: TypeTable = POSTGRES_TYPES;

pub const REDSHIFT_CATALOG_SQL: &str = "SELECT table_catalog, table_schema, table_name, column_name, data_type \
     FROM svv_columns \
     WHERE table_schema NOT IN ('pg_catalog', 'information_schema', 'pg_internal')";

pub fn map_field_type(native_type: &str) -> Result<DimensionType, WarehouseError> {
    normalizer::normalize("Redshift", REDSHIFT_TYPES, native_type)
}

/// Redshift warehouse client
pub struct RedshiftClient {
    connector: PgConnector,
    start_of_week: Option<WeekDay>,
}

impl RedshiftClient {
    pub fn new(credentials: RedshiftCredentials) -> Self {
        let connector = PgConnector::new(
            "Redshift",
            REDSHIFT_TYPES,
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
impl WarehouseClient for RedshiftClient {
    fn name(&self) -> &'static str {
        "Redshift"
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
        let listing = query_in_session(&self.connector, REDSHIFT_CATALOG_SQL).await?;
        fold_catalog(selectors, &listing, &MetadataColumns::INFORMATION_SCHEMA, map_field_type)
    }
}
