//! Database driver implementations
//! SQLite is always built, the network drivers are conditionally compiled based on features

pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;
