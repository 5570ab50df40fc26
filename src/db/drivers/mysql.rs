//! MySQL driver implementation

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, Params};
use std::time::Instant;
use tokio::sync::Mutex;

use crate::db::connection::{ConnectionConfig, DatabaseType, Descriptor};
use crate::db::driver::{ConnectionInfo, DatabaseConnection};
use crate::db::error::{Error, Result};
use crate::db::value::{Row, Value};

fn to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int(n) => mysql_async::Value::from(*n),
        Value::Float(f) => mysql_async::Value::from(*f),
        Value::Text(s) => mysql_async::Value::from(s.clone()),
    }
}

fn from_mysql(value: mysql_async::Value) -> Value {
    match value {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
        mysql_async::Value::Int(n) => Value::Int(n),
        mysql_async::Value::UInt(n) => i64::try_from(n)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(n.to_string())),
        mysql_async::Value::Float(f) => Value::Float(f64::from(f)),
        mysql_async::Value::Double(d) => Value::Float(d),
        // Temporal values are scalars here; keep their SQL text form
        other => Value::Text(other.as_sql(true).trim_matches('\'').to_string()),
    }
}

fn bind(params: &[Value]) -> Params {
    if params.is_empty() {
        Params::Empty
    } else {
        Params::Positional(params.iter().map(to_mysql).collect())
    }
}

fn to_row(mut mysql_row: mysql_async::Row) -> Row {
    let columns: Vec<String> = mysql_row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();

    let mut row = Row::new();
    for (idx, name) in columns.into_iter().enumerate() {
        let value = mysql_row
            .take::<mysql_async::Value, _>(idx)
            .map_or(Value::Null, from_mysql);
        row.insert(name, value);
    }
    row
}

fn map_err(e: mysql_async::Error, sql: &str) -> Error {
    match e {
        mysql_async::Error::Io(_) => Error::Connection(e.to_string()),
        other => Error::statement(other, sql),
    }
}

pub struct MySqlConnection {
    // None once closed
    conn: Mutex<Option<Conn>>,
}

/// Connection options; the port comes from the settings, not the descriptor.
fn connect_opts(config: &ConnectionConfig) -> Result<OptsBuilder> {
    let (host, database) = match config.descriptor() {
        Descriptor::MySQL { host, database } => (host, database),
        other => {
            return Err(Error::Configuration(format!(
                "MySQL driver cannot open {}",
                other
            )))
        }
    };

    Ok(OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(config.port_or_default().unwrap_or(3306))
        .db_name(Some(database))
        .user(config.username.clone())
        .pass(config.password.clone()))
}

impl MySqlConnection {
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let opts = connect_opts(config)?;

        let timeout = config.timeout();
        let conn = tokio::time::timeout(timeout, Conn::new(opts))
            .await
            .map_err(|_| Error::Timeout(timeout))?
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }
}

fn live(slot: &mut Option<Conn>) -> Result<&mut Conn> {
    slot.as_mut()
        .ok_or_else(|| Error::Connection("MySQL connection is closed".into()))
}

#[async_trait]
impl DatabaseConnection for MySqlConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn test_connection(&self) -> Result<ConnectionInfo> {
        let start = Instant::now();
        let mut guard = self.conn.lock().await;
        let conn = live(&mut guard)?;

        let version: Option<String> = conn
            .query_first("SELECT VERSION()")
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(ConnectionInfo {
            server_version: version.map(|v| format!("MySQL {}", v)),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = live(&mut guard)?;

        conn.exec_drop(sql, bind(params))
            .await
            .map_err(|e| map_err(e, sql))?;
        Ok(conn.affected_rows())
    }

    async fn insert(&self, sql: &str, params: &[Value]) -> Result<Value> {
        let mut guard = self.conn.lock().await;
        let conn = live(&mut guard)?;

        conn.exec_drop(sql, bind(params))
            .await
            .map_err(|e| map_err(e, sql))?;
        Ok(conn
            .last_insert_id()
            .and_then(|id| i64::try_from(id).ok())
            .map_or(Value::Null, Value::Int))
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = live(&mut guard)?;

        let rows: Vec<mysql_async::Row> = conn
            .exec(sql, bind(params))
            .await
            .map_err(|e| map_err(e, sql))?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.disconnect()
                .await
                .map_err(|e| Error::Connection(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_opts_use_configured_port() {
        let mut config = ConnectionConfig::new(DatabaseType::MySQL, "garage");
        config.port = Some(3307);
        let opts = mysql_async::Opts::from(connect_opts(&config).unwrap());
        assert_eq!(opts.tcp_port(), 3307);
        assert_eq!(opts.db_name(), Some("garage"));

        config.port = None;
        let opts = mysql_async::Opts::from(connect_opts(&config).unwrap());
        assert_eq!(opts.tcp_port(), 3306);

        let sqlite = ConnectionConfig::sqlite("garage.db");
        assert!(matches!(connect_opts(&sqlite), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_value_mapping() {
        assert_eq!(from_mysql(mysql_async::Value::Int(5)), Value::Int(5));
        assert_eq!(from_mysql(mysql_async::Value::NULL), Value::Null);
        assert_eq!(
            from_mysql(mysql_async::Value::Bytes(b"Beetle".to_vec())),
            Value::from("Beetle")
        );
        assert_eq!(from_mysql(to_mysql(&Value::from(2015))), Value::Int(2015));
    }

    #[test]
    fn test_empty_params_bind_as_empty() {
        assert!(matches!(bind(&[]), Params::Empty));
        assert!(matches!(bind(&[Value::Int(1)]), Params::Positional(ref v) if v.len() == 1));
    }
}
