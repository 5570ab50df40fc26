//! Minimal active-record persistence over SQLite, MySQL and PostgreSQL.
//!
//! [`Session`] resolves the connection settings and lazily opens one
//! connection; [`Model`] and [`Record`] map plain types onto tables.

pub mod db;
pub mod model;

pub use db::{
    ConnectionConfig, ConnectionHandle, DatabaseType, Descriptor, Error, Result, Row, Session,
    Value,
};
pub use model::{Criteria, Model, Record, RecordState, SaveOutcome};
