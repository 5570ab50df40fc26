use async_trait::async_trait;
use std::sync::Arc;

use super::connection::{ConnectionConfig, DatabaseType};
use super::error::{Error, Result};
use super::value::{Row, Value};

/// Information returned from a successful connection test
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub server_version: Option<String>,
    pub latency_ms: u64,
}

/// Core trait for database connections
///
/// Every method runs exactly one statement. Parameters are bound by the
/// driver, never spliced into the SQL text.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Check the connection is alive and report the server version
    async fn test_connection(&self) -> Result<ConnectionInfo>;

    /// Run a statement that returns no rows, reporting affected rows
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run an INSERT and report the key the store generated for it
    async fn insert(&self, sql: &str, params: &[Value]) -> Result<Value>;

    /// Run a query and collect every row
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Release the underlying connection
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared handle to an open connection
pub type ConnectionHandle = Arc<dyn DatabaseConnection>;

/// Factory function - opens the right connection type based on driver
pub async fn open(config: &ConnectionConfig) -> Result<ConnectionHandle> {
    if !config.driver.is_available() {
        return Err(Error::DriverNotAvailable(config.driver.feature_name()));
    }

    match config.driver {
        DatabaseType::SQLite => Ok(Arc::new(
            super::drivers::sqlite::SqliteConnection::open(config).await?,
        )),

        #[cfg(feature = "postgres")]
        DatabaseType::PostgreSQL => Ok(Arc::new(
            super::drivers::postgres::PostgresConnection::open(config).await?,
        )),

        #[cfg(feature = "mysql")]
        DatabaseType::MySQL => Ok(Arc::new(
            super::drivers::mysql::MySqlConnection::open(config).await?,
        )),

        // Fallback for when feature not compiled
        #[allow(unreachable_patterns)]
        _ => Err(Error::DriverNotAvailable(config.driver.feature_name())),
    }
}
