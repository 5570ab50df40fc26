//! PostgreSQL driver implementation

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Socket};
use uuid::Uuid;

use crate::db::connection::{ConnectionConfig, DatabaseType, Descriptor};
use crate::db::driver::{ConnectionInfo, DatabaseConnection};
use crate::db::error::{Error, Result};
use crate::db::value::{Row, Value};

type BoxError = Box<dyn StdError + Sync + Send>;

// Values are converted to whatever type the server inferred for the
// parameter; a value that cannot be represented in it is an error.
impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => {
                if *ty == Type::BOOL {
                    b.to_sql(ty, out)
                } else if is_integer(ty) {
                    encode_int(i64::from(*b), ty, out)
                } else if is_text(ty) {
                    b.to_string().to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            Value::Int(n) => encode_int(*n, ty, out),
            Value::Float(f) => encode_float(*f, ty, out),
            Value::Text(s) => encode_text(s, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn encode_int(n: i64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if *ty == Type::INT2 {
        i16::try_from(n)?.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(n)?.to_sql(ty, out)
    } else if *ty == Type::INT8 {
        n.to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (n as f32).to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (n as f64).to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        Decimal::from(n).to_sql(ty, out)
    } else if *ty == Type::BOOL {
        (n != 0).to_sql(ty, out)
    } else if is_text(ty) {
        n.to_string().to_sql(ty, out)
    } else {
        Err(mismatch(&Value::Int(n), ty))
    }
}

fn encode_float(f: f64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if *ty == Type::FLOAT4 {
        (f as f32).to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        f.to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        Decimal::try_from(f)?.to_sql(ty, out)
    } else if is_text(ty) {
        f.to_string().to_sql(ty, out)
    } else {
        Err(mismatch(&Value::Float(f), ty))
    }
}

// Text is parsed into the parameter type, the way the server would cast a
// quoted literal.
fn encode_text(s: &str, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if is_text(ty) {
        s.to_sql(ty, out)
    } else if is_integer(ty) {
        encode_int(s.trim().parse()?, ty, out)
    } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
        encode_float(s.trim().parse()?, ty, out)
    } else if *ty == Type::NUMERIC {
        s.trim().parse::<Decimal>()?.to_sql(ty, out)
    } else if *ty == Type::BOOL {
        s.trim().parse::<bool>()?.to_sql(ty, out)
    } else if *ty == Type::DATE {
        s.parse::<NaiveDate>()?.to_sql(ty, out)
    } else if *ty == Type::TIME {
        s.parse::<NaiveTime>()?.to_sql(ty, out)
    } else if *ty == Type::TIMESTAMP {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| s.parse::<NaiveDateTime>())?
            .to_sql(ty, out)
    } else if *ty == Type::TIMESTAMPTZ {
        DateTime::parse_from_rfc3339(s)?.to_sql(ty, out)
    } else if *ty == Type::UUID {
        Uuid::parse_str(s)?.to_sql(ty, out)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
    } else if *ty == Type::BYTEA {
        s.as_bytes().to_sql(ty, out)
    } else {
        Err(mismatch(&Value::Text(s.to_string()), ty))
    }
}

fn mismatch(value: &Value, ty: &Type) -> BoxError {
    let kind = match value {
        Value::Null => "NULL",
        Value::Bool(_) => "a boolean",
        Value::Int(_) => "an integer",
        Value::Float(_) => "a float",
        Value::Text(_) => "text",
    };
    format!("cannot bind {} to a parameter of type {}", kind, ty).into()
}

fn is_integer(ty: &Type) -> bool {
    [Type::INT2, Type::INT4, Type::INT8].contains(ty)
}

fn is_text(ty: &Type) -> bool {
    [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME, Type::UNKNOWN].contains(ty)
}

// Types without a scalar counterpart come back as text. Anything else is an
// error rather than a silent NULL.
impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        let value = if *ty == Type::BOOL {
            Value::Bool(bool::from_sql(ty, raw)?)
        } else if *ty == Type::INT2 {
            Value::Int(i16::from_sql(ty, raw)?.into())
        } else if *ty == Type::INT4 {
            Value::Int(i32::from_sql(ty, raw)?.into())
        } else if *ty == Type::INT8 {
            Value::Int(i64::from_sql(ty, raw)?)
        } else if *ty == Type::FLOAT4 {
            Value::Float(f32::from_sql(ty, raw)?.into())
        } else if *ty == Type::FLOAT8 {
            Value::Float(f64::from_sql(ty, raw)?)
        } else if *ty == Type::NUMERIC {
            Value::Text(Decimal::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::DATE {
            Value::Text(NaiveDate::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::TIME {
            Value::Text(NaiveTime::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::TIMESTAMP {
            Value::Text(NaiveDateTime::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::TIMESTAMPTZ {
            Value::Text(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339())
        } else if *ty == Type::UUID {
            Value::Text(Uuid::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            Value::Text(serde_json::Value::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::BYTEA {
            Value::Text(hex_bytes(&Vec::<u8>::from_sql(ty, raw)?))
        } else if <&str as FromSql>::accepts(ty) {
            Value::Text(String::from_sql(ty, raw)?)
        } else {
            return Err(format!("unsupported column type {}", ty).into());
        };
        Ok(value)
    }

    fn from_sql_null(_ty: &Type) -> std::result::Result<Self, BoxError> {
        Ok(Value::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// `bytea` in PostgreSQL's hex output format
fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn to_row(pg_row: &tokio_postgres::Row, sql: &str) -> Result<Row> {
    let mut row = Row::new();
    for (idx, column) in pg_row.columns().iter().enumerate() {
        let value: Value = pg_row
            .try_get(idx)
            .map_err(|e| Error::statement(format!("column `{}`: {}", column.name(), e), sql))?;
        row.insert(column.name(), value);
    }
    Ok(row)
}

fn map_err(e: tokio_postgres::Error, sql: &str) -> Error {
    if e.is_closed() {
        Error::Connection(e.to_string())
    } else {
        Error::statement(e, sql)
    }
}

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

async fn connect_with<T>(
    pg: &tokio_postgres::Config,
    tls: T,
    timeout: Duration,
) -> Result<Client>
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let (client, connection) = tokio::time::timeout(timeout, pg.connect(tls))
        .await
        .map_err(|_| Error::Timeout(timeout))?
        .map_err(|e| Error::Connection(e.to_string()))?;

    // Spawn connection handler (required by tokio-postgres)
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "PostgreSQL connection error");
        }
    });

    Ok(client)
}

pub struct PostgresConnection {
    client: Client,
}

impl PostgresConnection {
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let (host, port, database) = match config.descriptor() {
            Descriptor::PostgreSQL {
                host,
                port,
                database,
            } => (host, port, database),
            other => {
                return Err(Error::Configuration(format!(
                    "PostgreSQL driver cannot open {}",
                    other
                )))
            }
        };

        let mut pg = tokio_postgres::Config::new();
        pg.host(&host)
            .port(port)
            .dbname(&database)
            .connect_timeout(config.timeout());
        if let Some(user) = &config.username {
            pg.user(user);
        }
        if let Some(password) = &config.password {
            pg.password(password);
        }

        let client = if config.ssl {
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| Error::Connection(e.to_string()))?;
            let tls = postgres_native_tls::MakeTlsConnector::new(connector);
            connect_with(&pg, tls, config.timeout()).await?
        } else {
            connect_with(&pg, NoTls, config.timeout()).await?
        };

        Ok(Self { client })
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn test_connection(&self) -> Result<ConnectionInfo> {
        let start = Instant::now();

        let row = self
            .client
            .query_one("SELECT version()", &[])
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let version: String = row.get(0);
        Ok(ConnectionInfo {
            server_version: Some(version),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.client
            .execute(sql, &bind(params))
            .await
            .map_err(|e| map_err(e, sql))
    }

    // The INSERT carries a RETURNING clause for the key column.
    async fn insert(&self, sql: &str, params: &[Value]) -> Result<Value> {
        let row = self
            .client
            .query_opt(sql, &bind(params))
            .await
            .map_err(|e| map_err(e, sql))?;

        match row {
            Some(row) if !row.is_empty() => row
                .try_get(0)
                .map_err(|e| Error::statement(format!("generated key: {}", e), sql)),
            _ => Ok(Value::Null),
        }
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let rows = self
            .client
            .query(sql, &bind(params))
            .await
            .map_err(|e| map_err(e, sql))?;
        rows.iter().map(|row| to_row(row, sql)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value, ty: &Type) -> std::result::Result<BytesMut, BoxError> {
        let mut buf = BytesMut::new();
        value.to_sql(ty, &mut buf)?;
        Ok(buf)
    }

    // What the server sends back for a column of `ty` holding `value`
    fn wire<T: ToSql>(value: T, ty: &Type) -> BytesMut {
        let mut buf = BytesMut::new();
        value.to_sql(ty, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_int_binds_to_narrower_columns() {
        let buf = encode(&Value::Int(2015), &Type::INT4).unwrap();
        assert_eq!(&buf[..], &2015i32.to_be_bytes());
    }

    #[test]
    fn test_int_overflow_is_rejected() {
        assert!(encode(&Value::Int(i64::MAX), &Type::INT2).is_err());
    }

    #[test]
    fn test_null_binds_to_anything() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            Value::Null.to_sql(&Type::TEXT, &mut buf),
            Ok(IsNull::Yes)
        ));
        assert!(<Value as ToSql>::accepts(&Type::INT8));
    }

    #[test]
    fn test_text_is_converted_to_the_parameter_type() {
        assert_eq!(
            encode(&Value::from("2015"), &Type::INT4).unwrap(),
            wire(2015i32, &Type::INT4)
        );
        assert_eq!(
            encode(&Value::from("9.99"), &Type::NUMERIC).unwrap(),
            wire("9.99".parse::<Decimal>().unwrap(), &Type::NUMERIC)
        );
        assert_eq!(
            encode(&Value::from("2016-03-01"), &Type::DATE).unwrap(),
            wire(NaiveDate::from_ymd_opt(2016, 3, 1).unwrap(), &Type::DATE)
        );
        assert_eq!(
            encode(&Value::from("67e55044-10b1-426f-9247-bb680e5fe0c8"), &Type::UUID).unwrap(),
            wire(
                Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap(),
                &Type::UUID
            )
        );
    }

    #[test]
    fn test_scalars_are_converted_to_the_parameter_type() {
        assert_eq!(
            encode(&Value::Bool(true), &Type::INT4).unwrap(),
            wire(1i32, &Type::INT4)
        );
        assert_eq!(
            encode(&Value::Int(5), &Type::NUMERIC).unwrap(),
            wire(Decimal::from(5), &Type::NUMERIC)
        );
        assert_eq!(
            encode(&Value::Float(1.5), &Type::TEXT).unwrap(),
            wire("1.5", &Type::TEXT)
        );
    }

    #[test]
    fn test_mismatched_binding_is_an_error() {
        assert!(encode(&Value::from("Mustang"), &Type::INT4).is_err());
        assert!(encode(&Value::from("soon"), &Type::TIMESTAMP).is_err());
        assert!(encode(&Value::Float(1.5), &Type::UUID).is_err());
        assert!(encode(&Value::Bool(true), &Type::DATE).is_err());

        let err = encode(&Value::Int(1), &Type::JSONB).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot bind an integer to a parameter of type jsonb"
        );
    }

    #[test]
    fn test_decode_scalars() {
        let raw = wire(2015i32, &Type::INT4);
        assert_eq!(Value::from_sql(&Type::INT4, &raw).unwrap(), Value::Int(2015));

        let raw = wire(true, &Type::BOOL);
        assert_eq!(Value::from_sql(&Type::BOOL, &raw).unwrap(), Value::Bool(true));

        let raw = wire("Mustang", &Type::VARCHAR);
        assert_eq!(
            Value::from_sql(&Type::VARCHAR, &raw).unwrap(),
            Value::from("Mustang")
        );

        assert_eq!(Value::from_sql_null(&Type::NUMERIC).unwrap(), Value::Null);
    }

    #[test]
    fn test_decode_rich_types_as_text() {
        let raw = wire("9.99".parse::<Decimal>().unwrap(), &Type::NUMERIC);
        assert_eq!(
            Value::from_sql(&Type::NUMERIC, &raw).unwrap(),
            Value::from("9.99")
        );

        let raw = wire(NaiveDate::from_ymd_opt(2016, 3, 1).unwrap(), &Type::DATE);
        assert_eq!(
            Value::from_sql(&Type::DATE, &raw).unwrap(),
            Value::from("2016-03-01")
        );

        let raw = wire(Uuid::nil(), &Type::UUID);
        assert_eq!(
            Value::from_sql(&Type::UUID, &raw).unwrap(),
            Value::from("00000000-0000-0000-0000-000000000000")
        );

        let raw = wire(serde_json::json!({"doors": 2}), &Type::JSONB);
        assert_eq!(
            Value::from_sql(&Type::JSONB, &raw).unwrap(),
            Value::from(r#"{"doors":2}"#)
        );

        let raw = wire(vec![0xdeu8, 0xad], &Type::BYTEA);
        assert_eq!(
            Value::from_sql(&Type::BYTEA, &raw).unwrap(),
            Value::from("\\xdead")
        );
    }

    #[test]
    fn test_decode_unsupported_type_is_an_error() {
        let err = Value::from_sql(&Type::POINT, &[0u8; 16]).unwrap_err();
        assert!(err.to_string().contains("point"));
    }
}
