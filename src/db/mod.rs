pub mod connection;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod session;
pub mod value;

pub use connection::{ConnectionConfig, DatabaseType, Descriptor};
pub use driver::{ConnectionHandle, ConnectionInfo, DatabaseConnection};
pub use error::{Error, Result};
pub use session::Session;
pub use value::{Row, Value};
