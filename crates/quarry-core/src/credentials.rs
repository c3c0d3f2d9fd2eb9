//! Validated connection credentials, one variant per warehouse kind
//!
//! Credentials are immutable once built. Clients borrow configuration from
//! them at construction and never mutate it.

use crate::error::WarehouseError;
use crate::types::WeekDay;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Secrets are written back out redacted
mod secret {
    use secrecy::SecretString;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(_: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
        String::deserialize(deserializer).map(SecretString::from)
    }

    pub mod option {
        use secrecy::SecretString;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(secret: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error> {
            match secret {
                Some(_) => serializer.serialize_str("[REDACTED]"),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<SecretString>, D::Error> {
            let value: Option<String> = Option::deserialize(deserializer)?;
            Ok(value.map(SecretString::from))
        }
    }
}

/// Supported warehouse kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseType {
    BigQuery,
    Databricks,
    Duckdb,
    Postgres,
    Redshift,
    Snowflake,
}

impl WarehouseType {
    pub const ALL: [WarehouseType; 6] = [
        WarehouseType::BigQuery,
        WarehouseType::Databricks,
        WarehouseType::Duckdb,
        WarehouseType::Postgres,
        WarehouseType::Redshift,
        WarehouseType::Snowflake,
    ];

    /// Tag used in configuration files
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BigQuery => "bigquery",
            Self::Databricks => "databricks",
            Self::Duckdb => "duckdb",
            Self::Postgres => "postgres",
            Self::Redshift => "redshift",
            Self::Snowflake => "snowflake",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for WarehouseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// BigQuery credentials (service account)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BigQueryCredentials {
    /// GCP project id used for billing and as the default database
    pub project: String,

    /// Default dataset
    pub dataset: String,

    /// Service account key JSON
    pub keyfile_contents: serde_json::Value,

    /// Dataset location (e.g. "US", "europe-west2")
    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub timeout_seconds: Option<u32>,

    #[serde(default)]
    pub maximum_bytes_billed: Option<u64>,

    #[serde(default)]
    pub start_of_week: Option<WeekDay>,
}

/// Databricks SQL warehouse credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabricksCredentials {
    /// Workspace host, e.g. `dbc-1234.cloud.databricks.com`
    pub server_host_name: String,

    /// HTTP path of the SQL warehouse, e.g. `/sql/1.0/warehouses/abc123`
    pub http_path: String,

    #[serde(with = "secret")]
    pub personal_access_token: SecretString,

    /// Unity catalog
    #[serde(default)]
    pub catalog: Option<String>,

    /// Default schema
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub start_of_week: Option<WeekDay>,
}

impl DatabricksCredentials {
    /// Warehouse id taken from the last segment of the HTTP path
    pub fn warehouse_id(&self) -> Option<&str> {
        self.http_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
    }
}

/// DuckDB credentials (embedded database file)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DuckdbCredentials {
    /// Database file; in-memory when absent
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub schema: Option<String>,

    #[serde(default)]
    pub read_only: bool,

    #[serde(default)]
    pub start_of_week: Option<WeekDay>,
}

/// TLS negotiation for PostgreSQL-protocol backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_redshift_port() -> u16 {
    5439
}

fn default_prefer() -> SslMode {
    SslMode::Prefer
}

fn default_require() -> SslMode {
    SslMode::Require
}

/// PostgreSQL credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresCredentials {
    pub host: String,
    pub user: String,
    #[serde(with = "secret")]
    pub password: SecretString,

    #[serde(default = "default_postgres_port")]
    pub port: u16,

    pub dbname: String,
    pub schema: String,

    #[serde(default)]
    pub search_path: Option<String>,

    #[serde(default = "default_prefer")]
    pub sslmode: SslMode,

    #[serde(default)]
    pub start_of_week: Option<WeekDay>,
}

/// Amazon Redshift credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedshiftCredentials {
    pub host: String,
    pub user: String,
    #[serde(with = "secret")]
    pub password: SecretString,

    #[serde(default = "default_redshift_port")]
    pub port: u16,

    pub dbname: String,
    pub schema: String,

    #[serde(default)]
    pub search_path: Option<String>,

    #[serde(default = "default_require")]
    pub sslmode: SslMode,

    #[serde(default)]
    pub start_of_week: Option<WeekDay>,
}

/// Snowflake credentials (password or key-pair)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnowflakeCredentials {
    /// Account identifier, e.g. `xy12345.us-east-1`
    pub account: String,
    pub user: String,

    #[serde(default, with = "secret::option")]
    pub password: Option<SecretString>,

    /// PKCS#8 PEM private key for key-pair authentication, plain or encrypted
    #[serde(default, with = "secret::option")]
    pub private_key: Option<SecretString>,

    /// Passphrase for an encrypted PKCS#8 private key
    #[serde(default, with = "secret::option")]
    pub private_key_pass: Option<SecretString>,

    /// Custom endpoint replacing `https://{account}.snowflakecomputing.com`
    #[serde(default)]
    pub access_url: Option<String>,

    #[serde(default)]
    pub role: Option<String>,

    pub database: String,
    pub warehouse: String,
    pub schema: String,

    #[serde(default)]
    pub start_of_week: Option<WeekDay>,
}

/// Credentials for any supported warehouse
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credentials {
    BigQuery(BigQueryCredentials),
    Databricks(DatabricksCredentials),
    Duckdb(DuckdbCredentials),
    Postgres(PostgresCredentials),
    Redshift(RedshiftCredentials),
    Snowflake(SnowflakeCredentials),
}

impl Credentials {
    pub fn warehouse_type(&self) -> WarehouseType {
        match self {
            Self::BigQuery(_) => WarehouseType::BigQuery,
            Self::Databricks(_) => WarehouseType::Databricks,
            Self::Duckdb(_) => WarehouseType::Duckdb,
            Self::Postgres(_) => WarehouseType::Postgres,
            Self::Redshift(_) => WarehouseType::Redshift,
            Self::Snowflake(_) => WarehouseType::Snowflake,
        }
    }

    pub fn start_of_week(&self) -> Option<WeekDay> {
        match self {
            Self::BigQuery(c) => c.start_of_week,
            Self::Databricks(c) => c.start_of_week,
            Self::Duckdb(c) => c.start_of_week,
            Self::Postgres(c) => c.start_of_week,
            Self::Redshift(c) => c.start_of_week,
            Self::Snowflake(c) => c.start_of_week,
        }
    }

    /// Parse credentials from an untyped, tagged value
    ///
    /// An unknown `type` tag is `UnsupportedWarehouse`; a known tag with a
    /// malformed body is a `Parse` error.
    pub fn from_value(value: serde_json::Value) -> Result<Self, WarehouseError> {
        let tag = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| WarehouseError::parse("Credentials are missing a string 'type' field"))?;

        let kind = WarehouseType::from_tag(tag)
            .ok_or_else(|| WarehouseError::UnsupportedWarehouse(format!(
                "Warehouse type '{}' is not supported. Supported: {}",
                tag,
                WarehouseType::ALL.map(WarehouseType::as_str).join(", ")
            )))?;

        let mut value = value;
        if let Some(object) = value.as_object_mut() {
            object.insert("type".to_string(), serde_json::Value::String(kind.as_str().to_string()));
        }

        serde_json::from_value(value).map_err(|e| {
            WarehouseError::parse(format!("Invalid {} credentials: {}", kind, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;

    #[test]
    fn secrets_are_redacted_in_debug_and_serialized_output() {
        let creds = Credentials::from_value(json!({
            "type": "snowflake",
            "account": "xy12345",
            "user": "u",
            "password": "hunter2",
            "private_key_pass": "opensesame",
            "database": "DB",
            "warehouse": "WH",
            "schema": "PUBLIC"
        }))
        .unwrap();

        assert!(!format!("{:?}", creds).contains("hunter2"));
        let value = serde_json::to_value(&creds).unwrap();
        assert_eq!(value["password"], "[REDACTED]");
        assert_eq!(value["private_key_pass"], "[REDACTED]");
        assert!(value["private_key"].is_null());

        match creds {
            Credentials::Snowflake(sf) => {
                assert_eq!(sf.password.as_ref().map(|p| p.expose_secret()), Some("hunter2"));
                assert_eq!(sf.private_key_pass.as_ref().map(|p| p.expose_secret()), Some("opensesame"));
                assert_eq!(sf.access_url, None);
            }
            _ => panic!("Expected snowflake credentials"),
        }
    }

    #[test]
    fn snowflake_access_url_is_optional_override() {
        let creds = Credentials::from_value(json!({
            "type": "snowflake",
            "account": "xy12345",
            "user": "u",
            "password": "p",
            "access_url": "https://snowflake.internal.example.com",
            "database": "DB",
            "warehouse": "WH",
            "schema": "PUBLIC"
        }))
        .unwrap();

        match creds {
            Credentials::Snowflake(sf) => {
                assert_eq!(sf.access_url.as_deref(), Some("https://snowflake.internal.example.com"));
            }
            _ => panic!("Expected snowflake credentials"),
        }
    }

    #[test]
    fn postgres_credentials_defaults() {
        let creds = Credentials::from_value(json!({
            "type": "postgres",
            "host": "localhost",
            "user": "analyst",
            "password": "secret",
            "dbname": "analytics",
            "schema": "public",
            "start_of_week": "monday"
        }))
        .unwrap();

        match creds {
            Credentials::Postgres(pg) => {
                assert_eq!(pg.port, 5432);
                assert_eq!(pg.sslmode, SslMode::Prefer);
                assert_eq!(pg.start_of_week, Some(WeekDay::Monday));
                assert!(!format!("{:?}", pg).contains("secret"));
            }
            other => panic!("Expected postgres credentials, got {:?}", other.warehouse_type()),
        }
    }

    #[test]
    fn redshift_defaults_differ_from_postgres() {
        let creds = Credentials::from_value(json!({
            "type": "Redshift",
            "host": "cluster.example.com",
            "user": "u",
            "password": "p",
            "dbname": "dev",
            "schema": "public"
        }))
        .unwrap();

        match creds {
            Credentials::Redshift(rs) => {
                assert_eq!(rs.port, 5439);
                assert_eq!(rs.sslmode, SslMode::Require);
            }
            _ => panic!("Expected redshift credentials"),
        }
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let err = Credentials::from_value(json!({"type": "oracle", "host": "x"})).unwrap_err();
        assert!(matches!(err, WarehouseError::UnsupportedWarehouse(_)));
        assert!(err.message().contains("oracle"));
    }

    #[test]
    fn malformed_body_is_parse_error() {
        let err = Credentials::from_value(json!({"type": "snowflake", "account": "x"})).unwrap_err();
        assert!(matches!(err, WarehouseError::Parse(_)));
    }

    #[test]
    fn missing_tag_is_parse_error() {
        let err = Credentials::from_value(json!({"host": "x"})).unwrap_err();
        assert!(matches!(err, WarehouseError::Parse(_)));
    }

    #[test]
    fn databricks_warehouse_id_from_http_path() {
        let creds = DatabricksCredentials {
            server_host_name: "dbc.cloud.databricks.com".to_string(),
            http_path: "/sql/1.0/warehouses/abc123/".to_string(),
            personal_access_token: SecretString::from("dapi"),
            catalog: None,
            database: None,
            start_of_week: None,
        };
        assert_eq!(creds.warehouse_id(), Some("abc123"));
    }

    #[test]
    fn credentials_roundtrip_through_tagged_json() {
        let duckdb = DuckdbCredentials {
            path: Some(PathBuf::from("warehouse.duckdb")),
            schema: Some("main".to_string()),
            read_only: true,
            start_of_week: Some(WeekDay::Sunday),
        };
        let creds = Credentials::Duckdb(duckdb.clone());
        let value = serde_json::to_value(&creds).unwrap();
        assert_eq!(value["type"], "duckdb");
        assert_eq!(value["start_of_week"], 6);
        match Credentials::from_value(value).unwrap() {
            Credentials::Duckdb(parsed) => assert_eq!(parsed, duckdb),
            _ => panic!("Expected duckdb credentials"),
        }
    }
}
