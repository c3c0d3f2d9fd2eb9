//! Error kinds crossing the warehouse boundary

/// Errors reported by warehouse clients
///
/// Backend-specific failures are wrapped into one of these kinds where they
/// leave the backend internals. The original message text is preserved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WarehouseError {
    /// Authentication, network or session-configuration failure
    #[error("Warehouse connection error: {0}")]
    Connection(String),

    /// SQL-level failure reported by the backend
    #[error("Warehouse query error: {0}")]
    Query(String),

    /// Malformed input that cannot be interpreted (e.g. an untokenizable type)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Credentials tagged with a warehouse kind this layer does not know
    #[error("Unsupported warehouse: {0}")]
    UnsupportedWarehouse(String),
}

impl WarehouseError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// The message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Connection(m) | Self::Query(m) | Self::Parse(m) | Self::UnsupportedWarehouse(m) => m,
        }
    }

    /// Re-label any error as a connection error, keeping its message
    ///
    /// Session configuration runs ordinary statements, but a failure there
    /// means the session is unusable rather than that the query was wrong.
    pub fn into_connection(self) -> Self {
        match self {
            Self::Connection(_) => self,
            other => Self::Connection(other.message().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keeps_native_message() {
        let err = WarehouseError::connection("Snowflake error: Incorrect username or password");
        assert_eq!(
            err.to_string(),
            "Warehouse connection error: Snowflake error: Incorrect username or password"
        );
        assert_eq!(err.message(), "Snowflake error: Incorrect username or password");
    }

    #[test]
    fn into_connection_relabels() {
        let err = WarehouseError::query("unrecognized configuration parameter").into_connection();
        assert_eq!(
            err,
            WarehouseError::Connection("unrecognized configuration parameter".to_string())
        );
    }
}
