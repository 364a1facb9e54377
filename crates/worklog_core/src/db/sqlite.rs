//! Embedded SQLite executor.
//!
//! # Invariants
//! - Exactly one connection is held; callers are serialized on its mutex.
//! - An in-memory database lives exactly as long as its executor.

use super::{open_sqlite, DbError, DbResult, SqlDialect, SqlExecutor, SqlRow, SqlValue};
use log::debug;
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{params_from_iter, Connection, OpenFlags, ToSql};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Text(value) => ToSqlOutput::from(value.as_str()),
            Self::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
        })
    }
}

pub struct SqliteExecutor {
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
}

impl SqliteExecutor {
    /// Opens the database at `path` (`None` for in-memory).
    pub fn open(path: Option<&Path>, busy_timeout: Duration) -> DbResult<Self> {
        let conn = open_sqlite(path, busy_timeout)?;
        Ok(Self {
            path: path.map(Path::to_path_buf),
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Opens a throwaway connection and runs a trivial query.
    ///
    /// Never creates a file: a missing database only needs an existing
    /// parent directory, since activation creates it.
    pub fn probe(path: Option<&Path>, timeout: Duration) -> DbResult<()> {
        let conn = match path {
            Some(path) if !path.exists() => {
                let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
                return match parent {
                    Some(dir) if !dir.is_dir() => Err(DbError::InvalidProfile(format!(
                        "directory {} does not exist",
                        dir.display()
                    ))),
                    _ => Ok(()),
                };
            }
            Some(path) => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(timeout)?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_conn<T>(&self, run: impl FnOnce(&Connection) -> DbResult<T>) -> DbResult<T> {
        let guard = self.lock();
        match guard.as_ref() {
            Some(conn) => run(conn),
            None => Err(DbError::Closed),
        }
    }
}

impl SqlExecutor for SqliteExecutor {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        self.with_conn(|conn| {
            let changed = conn.execute(sql, params_from_iter(params.iter()))?;
            Ok(changed as u64)
        })
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<SqlRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let width = stmt.column_count();
            let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                (0..width)
                    .map(|index| row.get::<_, Option<String>>(index))
                    .collect::<rusqlite::Result<SqlRow>>()
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    fn check_valid(&self, _timeout: Duration) -> DbResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }

    fn close(&self) {
        if let Some(conn) = self.lock().take() {
            if let Err((_, err)) = conn.close() {
                debug!("event=pool_close module=db status=error dialect=sqlite error={err}");
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

impl Drop for SqliteExecutor {
    fn drop(&mut self) {
        self.close();
    }
}
