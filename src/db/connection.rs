use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::error::{Error, Result};

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DatabaseType {
    #[default]
    SQLite,
    MySQL,
    PostgreSQL,
}

impl DatabaseType {
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseType::SQLite => "SQLite",
            DatabaseType::MySQL => "MySQL",
            DatabaseType::PostgreSQL => "PostgreSQL",
        }
    }

    /// Name used in configuration files and the `DB_DRIVER` variable
    pub fn key(&self) -> &'static str {
        match self {
            DatabaseType::SQLite => "sqlite",
            DatabaseType::MySQL => "mysql",
            DatabaseType::PostgreSQL => "pgsql",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            DatabaseType::SQLite => None,
            DatabaseType::MySQL => Some(3306),
            DatabaseType::PostgreSQL => Some(5432),
        }
    }

    pub fn all() -> &'static [DatabaseType] {
        &[
            DatabaseType::SQLite,
            DatabaseType::MySQL,
            DatabaseType::PostgreSQL,
        ]
    }

    pub fn feature_name(&self) -> &'static str {
        match self {
            DatabaseType::SQLite => "sqlite",
            DatabaseType::MySQL => "mysql",
            DatabaseType::PostgreSQL => "postgres",
        }
    }

    /// Whether the driver for this type was compiled in
    pub fn is_available(&self) -> bool {
        match self {
            DatabaseType::SQLite => true,
            DatabaseType::MySQL => cfg!(feature = "mysql"),
            DatabaseType::PostgreSQL => cfg!(feature = "postgres"),
        }
    }

    /// Bind placeholder for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            DatabaseType::PostgreSQL => format!("${}", index),
            DatabaseType::SQLite | DatabaseType::MySQL => "?".to_string(),
        }
    }

    /// Whether generated keys are read back with `INSERT ... RETURNING`
    pub fn uses_returning(&self) -> bool {
        matches!(self, DatabaseType::PostgreSQL)
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatabaseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DatabaseType::SQLite),
            "mysql" => Ok(DatabaseType::MySQL),
            "pgsql" | "postgres" | "postgresql" => Ok(DatabaseType::PostgreSQL),
            other => Err(Error::Configuration(format!(
                "unknown database driver `{}`",
                other
            ))),
        }
    }
}

// Unknown driver names fall back to SQLite instead of failing.
impl From<String> for DatabaseType {
    fn from(s: String) -> Self {
        s.parse().unwrap_or_else(|_| {
            tracing::warn!(driver = %s, "unrecognized database driver, falling back to SQLite");
            DatabaseType::SQLite
        })
    }
}

impl From<DatabaseType> for String {
    fn from(db_type: DatabaseType) -> Self {
        db_type.key().to_string()
    }
}

/// Where the database lives, without credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    SQLite {
        path: String,
    },
    MySQL {
        host: String,
        database: String,
    },
    PostgreSQL {
        host: String,
        port: u16,
        database: String,
    },
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::SQLite { path } => write!(f, "sqlite:{}", path),
            Descriptor::MySQL { host, database } => {
                write!(f, "mysql:host={};dbname={}", host, database)
            }
            Descriptor::PostgreSQL {
                host,
                port,
                database,
            } => write!(f, "pgsql:host={};port={};dbname={}", host, port, database),
        }
    }
}

const DEFAULT_CONFIG_FILE: &str = "database.toml";
const ENV_PREFIX: &str = "DB_";

/// Connection settings, loaded once before the first connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub driver: DatabaseType,
    #[serde(deserialize_with = "scalar_string")]
    pub host: String,
    pub port: Option<u16>,
    /// Database name, or the file path for SQLite
    #[serde(deserialize_with = "scalar_string")]
    pub database: String,
    #[serde(deserialize_with = "optional_scalar_string")]
    pub username: Option<String>,
    #[serde(deserialize_with = "optional_scalar_string")]
    pub password: Option<String>,
    /// Use TLS (PostgreSQL only)
    pub ssl: bool,
    pub timeout_secs: u64,
}

/// Accepts any scalar as text. `DB_PASSWORD=12345` reaches serde as an
/// integer once the environment provider has parsed it.
struct ScalarString;

impl<'de> de::Visitor<'de> for ScalarString {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or a number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<String, E> {
        Ok(v)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }
}

fn scalar_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    deserializer.deserialize_any(ScalarString)
}

fn optional_scalar_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    struct Text(#[serde(deserialize_with = "scalar_string")] String);

    Ok(Option::<Text>::deserialize(deserializer)?.map(|Text(s)| s))
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseType::SQLite,
            host: "localhost".to_string(),
            port: None,
            database: String::new(),
            username: None,
            password: None,
            ssl: false,
            timeout_secs: 10,
        }
    }
}

impl ConnectionConfig {
    pub fn new(driver: DatabaseType, database: impl Into<String>) -> Self {
        Self {
            driver,
            database: database.into(),
            ..Self::default()
        }
    }

    /// SQLite database at `path` (`:memory:` for a private in-memory database)
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::new(DatabaseType::SQLite, path)
    }

    /// Builds a Figment that merges defaults, `database.toml` if present and
    /// `DB_*` environment variables, in that order.
    pub fn figment() -> Figment {
        let figment = Figment::new();
        let figment = if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        };
        // DB_NAME is the database, not a display name
        figment.merge(Env::prefixed(ENV_PREFIX).map(|key| {
            if key.as_str().eq_ignore_ascii_case("name") {
                "database".into()
            } else {
                key.into()
            }
        }))
    }

    /// Loads and validates configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let config: Self = Self::figment()
            .extract()
            .map_err(|e| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "no database {} configured for {}",
                if self.driver == DatabaseType::SQLite {
                    "path"
                } else {
                    "name"
                },
                self.driver
            )));
        }
        if self.driver != DatabaseType::SQLite && self.host.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "no host configured for {}",
                self.driver
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn port_or_default(&self) -> Option<u16> {
        self.port.or_else(|| self.driver.default_port())
    }

    pub fn descriptor(&self) -> Descriptor {
        match self.driver {
            DatabaseType::MySQL => Descriptor::MySQL {
                host: self.host.clone(),
                database: self.database.clone(),
            },
            DatabaseType::PostgreSQL => Descriptor::PostgreSQL {
                host: self.host.clone(),
                port: self.port.unwrap_or(5432),
                database: self.database.clone(),
            },
            DatabaseType::SQLite => Descriptor::SQLite {
                path: self.database.clone(),
            },
        }
    }
}
