//! Schema provisioning for relational backends.
//!
//! # Responsibility
//! - Detect whether the record schema is present on a connection.
//! - Create all tables and indexes idempotently.
//! - Stamp the schema version into `database_info`.
//!
//! # Invariants
//! - Provisioning an already provisioned database is a no-op apart from
//!   refreshing the version row.
//! - Table-name comparison is case-insensitive.

use super::{ColumnType, DbResult, SqlExecutor, SqlValue};
use log::{error, info};
use std::time::Instant;

/// Version written to `database_info.schema_version` after provisioning.
pub const SCHEMA_VERSION: &str = "1";

/// Tables that must all exist for the schema to count as present.
pub const REQUIRED_TABLES: [&str; 2] = ["employees", "work_records"];

const VERSION_KEY: &str = "schema_version";

fn table_names(executor: &dyn SqlExecutor) -> DbResult<Vec<String>> {
    let rows = executor.query(executor.dialect().table_names_sql(), &[])?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.into_iter().next().flatten())
        .map(|name| name.to_ascii_lowercase())
        .collect())
}

/// Returns whether every required table exists.
pub fn schema_exists(executor: &dyn SqlExecutor) -> DbResult<bool> {
    let present = table_names(executor)?;
    Ok(REQUIRED_TABLES
        .iter()
        .all(|table| present.iter().any(|name| name == table)))
}

/// Creates every table and index, then records the schema version.
///
/// # Side effects
/// - Emits `schema_provision` logging events with duration and status.
pub fn provision(executor: &dyn SqlExecutor) -> DbResult<()> {
    let started_at = Instant::now();
    let dialect = executor.dialect();
    info!(
        "event=schema_provision module=db status=start dialect={}",
        dialect.name()
    );

    let result = dialect
        .schema_statements()
        .iter()
        .try_for_each(|statement| executor.execute(statement, &[]).map(|_| ()))
        .and_then(|()| {
            executor.execute(
                &dialect.upsert_property_sql(),
                &[
                    SqlValue::from(VERSION_KEY),
                    SqlValue::from(SCHEMA_VERSION),
                ],
            )
        });

    match result {
        Ok(_) => {
            info!(
                "event=schema_provision module=db status=ok dialect={} version={} duration_ms={}",
                dialect.name(),
                SCHEMA_VERSION,
                started_at.elapsed().as_millis()
            );
            Ok(())
        }
        Err(err) => {
            error!(
                "event=schema_provision module=db status=error dialect={} duration_ms={} error={}",
                dialect.name(),
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

/// Provisions only when the schema is missing. Returns whether it did.
pub fn ensure_schema(executor: &dyn SqlExecutor) -> DbResult<bool> {
    if schema_exists(executor)? {
        info!(
            "event=schema_check module=db status=ok dialect={} present=true",
            executor.dialect().name()
        );
        return Ok(false);
    }
    provision(executor)?;
    Ok(true)
}

/// Reads the recorded schema version, `None` when never provisioned.
pub fn schema_version(executor: &dyn SqlExecutor) -> DbResult<Option<String>> {
    if !table_names(executor)?.iter().any(|name| name == "database_info") {
        return Ok(None);
    }
    let dialect = executor.dialect();
    let sql = format!(
        "SELECT {} FROM database_info WHERE property_key = {}",
        dialect.text("property_value"),
        dialect.placeholder(1, ColumnType::Text)
    );
    let rows = executor.query(&sql, &[SqlValue::from(VERSION_KEY)])?;
    Ok(rows.into_iter().next().and_then(|row| row.into_iter().next().flatten()))
}

#[cfg(test)]
mod tests {
    use super::{ensure_schema, provision, schema_exists, schema_version, SCHEMA_VERSION};
    use crate::db::sqlite::SqliteExecutor;
    use crate::db::SqlExecutor;
    use std::time::Duration;

    fn memory() -> SqliteExecutor {
        SqliteExecutor::open(None, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn fresh_database_has_no_schema() {
        let executor = memory();
        assert!(!schema_exists(&executor).unwrap());
        assert_eq!(schema_version(&executor).unwrap(), None);
    }

    #[test]
    fn provision_twice_is_idempotent() {
        let executor = memory();
        provision(&executor).unwrap();
        provision(&executor).unwrap();

        assert!(schema_exists(&executor).unwrap());
        assert_eq!(
            schema_version(&executor).unwrap().as_deref(),
            Some(SCHEMA_VERSION)
        );
        let rows = executor
            .query("SELECT CAST(COUNT(*) AS TEXT) FROM database_info", &[])
            .unwrap();
        assert_eq!(rows[0][0].as_deref(), Some("1"));
    }

    #[test]
    fn ensure_schema_reports_whether_it_provisioned() {
        let executor = memory();
        assert!(ensure_schema(&executor).unwrap());
        assert!(!ensure_schema(&executor).unwrap());
    }

    #[test]
    fn partial_schema_is_not_reported_present() {
        let executor = memory();
        executor
            .execute("CREATE TABLE EMPLOYEES (id TEXT PRIMARY KEY)", &[])
            .unwrap();
        assert!(!schema_exists(&executor).unwrap());
    }
}
