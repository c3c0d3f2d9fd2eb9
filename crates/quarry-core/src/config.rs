//! Configuration schema (quarry.toml)

use crate::credentials::Credentials;
use crate::error::WarehouseError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    /// Warehouse connection settings, tagged by `type`
    ///
    /// Kept untyped until `credentials()` so an unknown warehouse kind is
    /// reported as unsupported rather than as a TOML syntax problem.
    #[serde(default)]
    pub warehouse: Option<serde_json::Value>,

    /// Redact sensitive values (hosts, users) from human-facing output
    #[serde(default)]
    pub redact_sensitive_data: bool,
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        Self::from_toml(&contents)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Replace `${VAR}` references in every warehouse string value
    pub fn expand_env(&mut self) -> Result<(), ConfigError> {
        self.expand_with(|name| std::env::var(name).ok())
    }

    /// Replace `${VAR}` references using a custom lookup
    pub fn expand_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(warehouse) = self.warehouse.as_mut() {
            expand_value(warehouse, &lookup)?;
        }
        Ok(())
    }

    /// Typed credentials for the configured warehouse, if any
    pub fn credentials(&self) -> Result<Option<Credentials>, WarehouseError> {
        self.warehouse
            .clone()
            .map(Credentials::from_value)
            .transpose()
    }
}

fn env_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern is valid")
    })
}

fn expand_value<F>(value: &mut serde_json::Value, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        serde_json::Value::String(s) => {
            let mut missing = None;
            let expanded = env_reference().replace_all(s, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                lookup(name).unwrap_or_else(|| {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                })
            });
            if let Some(name) = missing {
                return Err(ConfigError::MissingEnvVar(name));
            }
            *s = expanded.into_owned();
        }
        serde_json::Value::Array(items) => {
            for item in items {
                expand_value(item, lookup)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                expand_value(item, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Environment variable not set: {0}")]
    MissingEnvVar(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::WarehouseType;

    const POSTGRES_TOML: &str = r#"
        [warehouse]
        type = "postgres"
        host = "localhost"
        user = "analyst"
        password = "${PG_PASSWORD}"
        dbname = "analytics"
        schema = "public"
        start_of_week = 0
    "#;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.warehouse.is_none());
        assert!(config.credentials().unwrap().is_none());
    }

    #[test]
    fn expands_env_references() {
        let mut config = Config::from_toml(POSTGRES_TOML).unwrap();
        config
            .expand_with(|name| (name == "PG_PASSWORD").then(|| "s3cret".to_string()))
            .unwrap();

        let warehouse = config.warehouse.as_ref().unwrap();
        assert_eq!(warehouse["password"], "s3cret");

        let credentials = config.credentials().unwrap().unwrap();
        assert_eq!(credentials.warehouse_type(), WarehouseType::Postgres);
    }

    #[test]
    fn missing_env_reference_is_an_error() {
        let mut config = Config::from_toml(POSTGRES_TOML).unwrap();
        let err = config.expand_with(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref name) if name == "PG_PASSWORD"));
    }

    #[test]
    fn unknown_warehouse_type_is_unsupported() {
        let config = Config::from_toml("[warehouse]\ntype = \"teradata\"\n").unwrap();
        let err = config.credentials().unwrap_err();
        assert!(matches!(err, WarehouseError::UnsupportedWarehouse(_)));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = Config::from_toml("[warehouse\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::from_toml("redact_sensitive_data = true\n").unwrap();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config, parsed);
    }
}
