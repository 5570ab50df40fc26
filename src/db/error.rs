use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while configuring, connecting or running statements
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),
    #[error("Driver not available: {0} (not compiled)")]
    DriverNotAvailable(&'static str),
    #[error("Statement failed: {message} (sql: {sql})")]
    Statement { message: String, sql: String },
    #[error("No row in `{table}` matches {criteria}")]
    NotFound { table: String, criteria: String },
    #[error("Invalid usage: {0}")]
    Usage(String),
}

impl Error {
    pub(crate) fn statement(message: impl ToString, sql: &str) -> Self {
        Error::Statement {
            message: message.to_string(),
            sql: sql.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_statement(&self) -> bool {
        matches!(self, Error::Statement { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_keeps_sql() {
        let err = Error::statement("no such table: planes", "SELECT * FROM planes");
        assert!(err.is_statement());
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Statement failed: no such table: planes (sql: SELECT * FROM planes)"
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::NotFound {
            table: "cars".into(),
            criteria: "id = 42".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "No row in `cars` matches id = 42");
    }
}
