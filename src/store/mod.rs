//! Persistence layer — libSQL-backed storage for groups, tasks, and
//! the calendar cache.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, StatusCounts};
