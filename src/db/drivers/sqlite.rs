//! SQLite driver implementation

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, ToSql};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::db::connection::{ConnectionConfig, DatabaseType, Descriptor};
use crate::db::driver::{ConnectionInfo, DatabaseConnection};
use crate::db::error::{Error, Result};
use crate::db::value::{Row, Value};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqliteValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*b))),
            Value::Int(n) => ToSqlOutput::Owned(SqliteValue::Integer(*n)),
            Value::Float(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

pub struct SqliteConnection {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteConnection {
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let path = match config.descriptor() {
            Descriptor::SQLite { path } => path,
            other => {
                return Err(Error::Configuration(format!(
                    "SQLite driver cannot open {}",
                    other
                )))
            }
        };

        // For SQLite, the path is a file path or :memory:
        if path != ":memory:" {
            if let Some(parent) = Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(Error::Connection(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }
        }

        // SQLite is synchronous, so we run it in a blocking task
        let conn = tokio::task::spawn_blocking(move || rusqlite::Connection::open(&path))
            .await
            .map_err(|e| Error::Connection(e.to_string()))?
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| Error::Connection("SQLite connection lock poisoned".into()))?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Connection(e.to_string()))?
    }
}

#[async_trait]
impl DatabaseConnection for SqliteConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn test_connection(&self) -> Result<ConnectionInfo> {
        let start = Instant::now();

        let version: String = self
            .with_conn(|conn| {
                conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))
                    .map_err(|e| Error::Connection(e.to_string()))
            })
            .await?;

        Ok(ConnectionInfo {
            server_version: Some(format!("SQLite {}", version)),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            conn.execute(&sql, params_from_iter(params.iter()))
                .map(|affected| affected as u64)
                .map_err(|e| Error::statement(e, &sql))
        })
        .await
    }

    async fn insert(&self, sql: &str, params: &[Value]) -> Result<Value> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            conn.execute(&sql, params_from_iter(params.iter()))
                .map_err(|e| Error::statement(e, &sql))?;
            Ok(Value::Int(conn.last_insert_rowid()))
        })
        .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::statement(e, &sql))?;
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();

            let mut rows = stmt
                .query(params_from_iter(params.iter()))
                .map_err(|e| Error::statement(e, &sql))?;

            let mut result = Vec::new();
            while let Some(row) = rows.next().map_err(|e| Error::statement(e, &sql))? {
                let mut record = Row::new();
                for (idx, name) in columns.iter().enumerate() {
                    let value = row.get_ref(idx).map_err(|e| Error::statement(e, &sql))?;
                    record.insert(name.as_str(), from_sqlite(value));
                }
                result.push(record);
            }
            Ok(result)
        })
        .await
    }
}
