//! Connection lifecycle: connect, configure the session, run, tear down
//!
//! A connection lives for exactly one facade call. `run_in_session` is the
//! only place connections are opened, and it closes every connection it
//! opened exactly once, whichever way the work ends.

use async_trait::async_trait;
use quarry_core::{QueryResult, WarehouseError, WeekDay};
use std::future::Future;

/// A live, exclusively owned connection to a warehouse
#[async_trait]
pub trait WarehouseConnection: Send {
    /// Execute one SQL statement and normalize its result
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, WarehouseError>;

    /// Release the connection
    async fn close(self) -> Result<(), WarehouseError>;
}

/// Opens and configures connections for one backend
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: WarehouseConnection;

    /// Backend name used in logs and error messages
    fn backend(&self) -> &'static str;

    /// Open a new connection
    async fn connect(&self) -> Result<Self::Connection, WarehouseError>;

    /// Session statements, in application order: timezone first, then week start
    fn session_statements(&self) -> Vec<String>;

    /// Apply session configuration to a freshly opened connection
    ///
    /// Any failure is reported as a connection error.
    async fn configure_session(&self, connection: &mut Self::Connection) -> Result<(), WarehouseError> {
        for statement in self.session_statements() {
            tracing::debug!(backend = self.backend(), statement = %statement, "configuring session");
            connection
                .execute(&statement)
                .await
                .map_err(WarehouseError::into_connection)?;
        }
        Ok(())
    }
}

/// Native week-start value for backends numbering Monday = 1 … Sunday = 7
pub fn one_based_week_start(day: WeekDay) -> u8 {
    day.index() + 1
}

/// Run `work` on a configured connection and always tear it down
///
/// `work` takes ownership of the connection and must hand it back together
/// with its outcome. Error priority is connect, then session configuration,
/// then the work itself, then teardown: a teardown failure only surfaces when
/// nothing before it failed.
pub async fn run_in_session<C, T, F, Fut>(connector: &C, work: F) -> Result<T, WarehouseError>
where
    C: Connector + ?Sized,
    F: FnOnce(C::Connection) -> Fut,
    Fut: Future<Output = (C::Connection, Result<T, WarehouseError>)>,
{
    let backend = connector.backend();
    tracing::debug!(backend, "connecting");
    let mut connection = connector.connect().await?;

    let (connection, outcome) = match connector.configure_session(&mut connection).await {
        Ok(()) => work(connection).await,
        Err(e) => (connection, Err(e)),
    };

    tracing::debug!(backend, "closing connection");
    let closed = connection.close().await;

    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err.into_connection()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            tracing::warn!(backend, error = %close_err, "teardown failed after an earlier error");
            Err(e)
        }
    }
}

/// Run a single statement in its own session
pub async fn query_in_session<C>(connector: &C, sql: &str) -> Result<QueryResult, WarehouseError>
where
    C: Connector + ?Sized,
{
    tracing::trace!(backend = connector.backend(), sql, "running query");
    run_in_session(connector, |mut connection| async move {
        let result = connection.execute(sql).await;
        (connection, result)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnector, MockScript};
    use quarry_core::{DimensionType, FieldValue};

    fn one_row() -> QueryResult {
        QueryResult::from_columns(
            vec![("n".to_string(), DimensionType::Number)],
            vec![vec![FieldValue::Int(1)]],
        )
    }

    #[test]
    fn week_start_offsets() {
        assert_eq!(one_based_week_start(WeekDay::Monday), 1);
        assert_eq!(one_based_week_start(WeekDay::Sunday), 7);
    }

    #[tokio::test]
    async fn closes_once_on_success() {
        let connector = MockConnector::new(MockScript::new().with_result("SELECT 1", one_row()));
        let result = query_in_session(&connector, "SELECT 1").await.unwrap();

        assert_eq!(result.row_count(), 1);
        assert_eq!(connector.stats().connects(), 1);
        assert_eq!(connector.stats().closes(), 1);
    }

    #[tokio::test]
    async fn closes_once_on_query_failure() {
        let connector = MockConnector::new(MockScript::new().with_query_error("SELECT boom", "syntax error"));
        let err = query_in_session(&connector, "SELECT boom").await.unwrap_err();

        assert_eq!(err, WarehouseError::Query("syntax error".to_string()));
        assert_eq!(connector.stats().closes(), 1);
    }

    #[tokio::test]
    async fn query_error_wins_over_teardown_error() {
        let connector = MockConnector::new(
            MockScript::new()
                .with_query_error("SELECT boom", "permission denied")
                .with_close_failure("socket closed"),
        );
        let err = query_in_session(&connector, "SELECT boom").await.unwrap_err();

        assert_eq!(err, WarehouseError::Query("permission denied".to_string()));
        assert_eq!(connector.stats().closes(), 1);
    }

    #[tokio::test]
    async fn teardown_error_surfaces_after_success() {
        let connector = MockConnector::new(
            MockScript::new()
                .with_result("SELECT 1", one_row())
                .with_close_failure("socket closed"),
        );
        let err = query_in_session(&connector, "SELECT 1").await.unwrap_err();

        assert_eq!(err, WarehouseError::Connection("socket closed".to_string()));
    }

    #[tokio::test]
    async fn connect_failure_skips_teardown() {
        let connector = MockConnector::new(MockScript::new().with_connect_failure("host unreachable"));
        let err = query_in_session(&connector, "SELECT 1").await.unwrap_err();

        assert!(matches!(err, WarehouseError::Connection(ref m) if m.contains("host unreachable")));
        assert_eq!(connector.stats().connects(), 1);
        assert_eq!(connector.stats().closes(), 0);
    }

    #[tokio::test]
    async fn session_failure_is_a_connection_error_and_still_closes() {
        let connector = MockConnector::new(
            MockScript::new()
                .with_week_start_support(true)
                .with_query_error("SET WEEK_START = 1", "unsupported parameter"),
        )
        .with_start_of_week(Some(WeekDay::Monday));

        let err = query_in_session(&connector, "SELECT 1").await.unwrap_err();

        assert_eq!(err, WarehouseError::Connection("unsupported parameter".to_string()));
        assert_eq!(connector.stats().closes(), 1);
        assert!(!connector.executed().await.contains(&"SELECT 1".to_string()));
    }
}
