//! Building a client from credentials

use crate::bigquery::BigQueryClient;
use crate::client::WarehouseClient;
use crate::databricks::DatabricksClient;
use crate::duckdb::DuckdbClient;
use crate::postgres::PostgresClient;
use crate::redshift::RedshiftClient;
use crate::snowflake::SnowflakeClient;
use quarry_core::{Credentials, WarehouseError};

/// Create the client for a set of typed credentials
///
/// Construction never connects; the first facade call does.
pub fn create_client(credentials: Credentials) -> Box<dyn WarehouseClient> {
    tracing::debug!(warehouse = %credentials.warehouse_type(), "creating warehouse client");

    match credentials {
        Credentials::BigQuery(c) => Box::new(BigQueryClient::new(c)),
        Credentials::Databricks(c) => Box::new(DatabricksClient::new(c)),
        Credentials::Duckdb(c) => Box::new(DuckdbClient::new(c)),
        Credentials::Postgres(c) => Box::new(PostgresClient::new(c)),
        Credentials::Redshift(c) => Box::new(RedshiftClient::new(c)),
        Credentials::Snowflake(c) => Box::new(SnowflakeClient::new(c)),
    }
}

/// Create a client from untyped credentials carrying a `type` tag
pub fn create_client_from_value(value: serde_json::Value) -> Result<Box<dyn WarehouseClient>, WarehouseError> {
    Credentials::from_value(value).map(create_client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::WeekDay;
    use serde_json::json;

    #[test]
    fn test_each_tag_builds_its_client() {
        let cases = [
            (
                json!({
                    "type": "bigquery",
                    "project": "p",
                    "dataset": "d",
                    "keyfile_contents": {"type": "service_account"}
                }),
                "BigQuery",
            ),
            (
                json!({
                    "type": "databricks",
                    "server_host_name": "dbc.cloud.databricks.com",
                    "http_path": "/sql/1.0/warehouses/abc",
                    "personal_access_token": "dapi"
                }),
                "Databricks",
            ),
            (json!({"type": "duckdb"}), "DuckDB"),
            (
                json!({
                    "type": "postgres",
                    "host": "localhost",
                    "user": "u",
                    "password": "p",
                    "dbname": "db",
                    "schema": "public"
                }),
                "PostgreSQL",
            ),
            (
                json!({
                    "type": "redshift",
                    "host": "cluster",
                    "user": "u",
                    "password": "p",
                    "dbname": "dev",
                    "schema": "public"
                }),
                "Redshift",
            ),
            (
                json!({
                    "type": "snowflake",
                    "account": "xy12345",
                    "user": "u",
                    "password": "p",
                    "database": "DB",
                    "warehouse": "WH",
                    "schema": "PUBLIC"
                }),
                "Snowflake",
            ),
        ];

        for (value, expected) in cases {
            let client = create_client_from_value(value).unwrap();
            assert_eq!(client.name(), expected);
        }
    }

    #[test]
    fn test_start_of_week_passes_through() {
        let client = create_client_from_value(json!({"type": "duckdb", "start_of_week": "tuesday"})).unwrap();
        assert_eq!(client.start_of_week(), Some(WeekDay::Tuesday));

        let client = create_client_from_value(json!({"type": "duckdb", "start_of_week": 6})).unwrap();
        assert_eq!(client.start_of_week(), Some(WeekDay::Sunday));

        let client = create_client_from_value(json!({"type": "duckdb"})).unwrap();
        assert_eq!(client.start_of_week(), None);
    }

    #[test]
    fn test_unknown_tag_is_unsupported() {
        let err = create_client_from_value(json!({"type": "oracle"})).err().unwrap();
        assert!(matches!(err, WarehouseError::UnsupportedWarehouse(_)));
    }

    #[test]
    fn test_malformed_body_is_parse_error() {
        let err = create_client_from_value(json!({"type": "postgres", "host": "localhost"})).err().unwrap();
        assert!(matches!(err, WarehouseError::Parse(_)));
    }
}
