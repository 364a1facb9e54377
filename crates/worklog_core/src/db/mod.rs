//! Relational storage plumbing shared by every SQL dialect.
//!
//! # Responsibility
//! - Define the `SqlExecutor` seam over one live connection pool.
//! - Provide SQLite, MySQL and PostgreSQL executors.
//! - Provision the fixed record schema per dialect.
//!
//! # Invariants
//! - Result cells are always text (`SqlDialect::text` casts every selected
//!   column), so row decoding is dialect-independent.
//! - A closed executor fails every call with `DbError::Closed`.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub mod dialect;
pub mod mysql;
mod open;
pub mod postgres;
mod runtime;
pub mod schema;
pub mod sqlite;

pub use dialect::{ColumnType, SqlDialect};
pub use open::open_sqlite;

pub type DbResult<T> = Result<T, DbError>;

/// One result row; every cell is the text rendering of its column.
pub type SqlRow = Vec<Option<String>>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Sqlx(sqlx::Error),
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    /// The async runtime that drives pooled drivers could not start.
    Runtime(std::io::Error),
    Closed,
    InvalidProfile(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Sqlx(err) => write!(f, "{err}"),
            Self::Timeout { operation, after } => {
                write!(f, "{operation} timed out after {} ms", after.as_millis())
            }
            Self::Runtime(err) => write!(f, "database runtime unavailable: {err}"),
            Self::Closed => write!(f, "connection pool is closed"),
            Self::InvalidProfile(message) => write!(f, "invalid connection profile: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Sqlx(err) => Some(err),
            Self::Runtime(err) => Some(err),
            Self::Timeout { .. } | Self::Closed | Self::InvalidProfile(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(value: sqlx::Error) -> Self {
        Self::Sqlx(value)
    }
}

/// Bind parameter accepted by every executor.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::Text)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

/// Blocking access to one relational connection pool.
///
/// Statements use the placeholders produced by `dialect()`.
pub trait SqlExecutor: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    /// Executes one statement and returns the affected row count.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<u64>;

    /// Runs one query; selected columns must be text-cast.
    fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<SqlRow>>;

    /// Confirms a fresh connection answers within `timeout`.
    fn check_valid(&self, timeout: Duration) -> DbResult<()>;

    /// Releases every pooled connection. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
