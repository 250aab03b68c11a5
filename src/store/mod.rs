//! Persistence layer: libSQL-backed storage for tone memory and feedback records.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, StoredRecord};
