//! Blocking session owning one lazily opened connection

use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Runtime;

use super::connection::{ConnectionConfig, DatabaseType};
use super::driver::{self, ConnectionHandle, ConnectionInfo};
use super::error::{Error, Result};
use super::value::{Row, Value};

/// Owns a connection configuration and at most one open connection.
///
/// The connection is opened on first use and shared by every operation run
/// through the session until [`Session::close`]. All calls block the current
/// thread; they must not be made from inside an async runtime.
pub struct Session {
    config: ConnectionConfig,
    // Taken only while the session is dropped
    runtime: Option<Runtime>,
    handle: Option<ConnectionHandle>,
}

impl Session {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Connection(format!("cannot start driver runtime: {}", e)))?;

        Ok(Self {
            config,
            runtime: Some(runtime),
            handle: None,
        })
    }

    fn block_on<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        match &self.runtime {
            Some(runtime) => runtime.block_on(future),
            None => Err(Error::Connection("session runtime is shut down".into())),
        }
    }

    /// Session configured from `database.toml` and `DB_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ConnectionConfig::from_env()?)
    }

    /// SQLite session on `path`; `:memory:` gives a private database.
    pub fn sqlite(path: impl Into<String>) -> Result<Self> {
        Self::new(ConnectionConfig::sqlite(path))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn database_type(&self) -> DatabaseType {
        self.config.driver
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Return the open connection, opening it first if needed.
    pub fn connect(&mut self) -> Result<ConnectionHandle> {
        if let Some(handle) = &self.handle {
            return Ok(Arc::clone(handle));
        }

        let descriptor = self.config.descriptor();
        let handle = self
            .block_on(driver::open(&self.config))
            .inspect_err(|e| {
                tracing::warn!(driver = %self.config.driver, %descriptor, error = %e, "cannot open database connection");
            })?;
        tracing::info!(driver = %self.config.driver, %descriptor, "opened database connection");

        self.handle = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Forget the open connection. The driver is shut down only when no
    /// other clone of the handle is still alive.
    pub fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if Arc::strong_count(&handle) == 1 {
            if let Err(e) = self.block_on(handle.close()) {
                tracing::warn!(error = %e, "error while closing database connection");
            }
        }
        tracing::info!(driver = %self.config.driver, "closed database connection");
    }

    pub fn ping(&mut self) -> Result<ConnectionInfo> {
        let handle = self.connect()?;
        self.block_on(handle.test_connection())
    }

    /// Run a statement that returns no rows and report affected rows.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let handle = self.connect()?;
        tracing::trace!(sql, params = params.len(), "execute");
        self.block_on(handle.execute(sql, params))
    }

    /// Run an INSERT and report the generated key.
    pub fn insert(&mut self, sql: &str, params: &[Value]) -> Result<Value> {
        let handle = self.connect()?;
        tracing::trace!(sql, params = params.len(), "insert");
        self.block_on(handle.insert(sql, params))
    }

    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let handle = self.connect()?;
        tracing::trace!(sql, params = params.len(), "query");
        self.block_on(handle.query(sql, params))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Blocking inside an async context panics: release the connection
        // without waiting for the driver and let the runtime wind down.
        if tokio::runtime::Handle::try_current().is_ok() {
            self.handle.take();
            if let Some(runtime) = self.runtime.take() {
                runtime.shutdown_background();
            }
            return;
        }
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("descriptor", &self.config.descriptor().to_string())
            .field("connected", &self.is_connected())
            .finish()
    }
}
