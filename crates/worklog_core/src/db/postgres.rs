//! PostgreSQL executor over a sqlx connection pool.
//!
//! # Invariants
//! - The pool is created eagerly; a returned executor has reached the server.
//! - After `close` the pool is gone and every call fails with `Closed`.

use super::runtime::{block_on, block_on_timeout};
use super::{DbError, DbResult, SqlDialect, SqlExecutor, SqlRow, SqlValue};
use crate::model::profile::ConnectionProfile;
use log::{debug, info};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, Postgres};
use sqlx::query::Query;
use sqlx::{ConnectOptions, Connection, Row};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const DEFAULT_PORT: u16 = 5432;

pub struct PgExecutor {
    pool: Mutex<Option<PgPool>>,
}

/// Connection options for `profile`, credentials included.
pub fn connect_options(profile: &ConnectionProfile) -> DbResult<PgConnectOptions> {
    let host = profile
        .host
        .as_deref()
        .ok_or_else(|| DbError::InvalidProfile(format!("`{}` has no host", profile.name)))?;
    let mut options = PgConnectOptions::new()
        .host(host)
        .port(profile.port.unwrap_or(DEFAULT_PORT))
        .application_name("worklog");
    if let Some(database) = profile.database.as_deref() {
        options = options.database(database);
    }
    if let Some(username) = profile.username.as_deref() {
        options = options.username(username);
    }
    if let Some(password) = profile.password.as_ref() {
        options = options.password(password.expose());
    }
    Ok(options)
}

impl PgExecutor {
    /// Builds the pool for `profile` with its effective pool settings.
    pub fn connect(profile: &ConnectionProfile) -> DbResult<Self> {
        let options = connect_options(profile)?;
        let pool_settings = profile.effective_pool();
        let pool = block_on_timeout("postgres_connect", pool_settings.connect_timeout, async move {
            PgPoolOptions::new()
                .max_connections(pool_settings.max_size)
                .min_connections(pool_settings.min_idle)
                .acquire_timeout(pool_settings.connect_timeout)
                .connect_with(options)
                .await
                .map_err(DbError::from)
        })?;
        info!(
            "event=pool_open module=db status=ok dialect=postgres max_size={} min_idle={}",
            pool_settings.max_size, pool_settings.min_idle
        );
        Ok(Self {
            pool: Mutex::new(Some(pool)),
        })
    }

    /// Opens one short-lived connection, pings it and closes it.
    pub fn probe(profile: &ConnectionProfile, timeout: Duration) -> DbResult<()> {
        let options = connect_options(profile)?;
        block_on_timeout("postgres_probe", timeout, ping_once(options))
    }

    fn lock(&self) -> MutexGuard<'_, Option<PgPool>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool(&self) -> DbResult<PgPool> {
        self.lock().clone().ok_or(DbError::Closed)
    }
}

async fn ping_once(options: PgConnectOptions) -> DbResult<()> {
    let mut conn = options.connect().await?;
    conn.ping().await?;
    conn.close().await?;
    Ok(())
}

async fn ping_pooled(pool: PgPool) -> DbResult<()> {
    let mut conn = pool.acquire().await?;
    conn.ping().await?;
    Ok(())
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Text(value) => query.bind(value.clone()),
            SqlValue::Integer(value) => query.bind(*value),
            SqlValue::Real(value) => query.bind(*value),
        };
    }
    query
}

impl SqlExecutor for PgExecutor {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        let pool = self.pool()?;
        let result = block_on(bind_params(sqlx::query(sql), params).execute(&pool))??;
        Ok(result.rows_affected())
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<SqlRow>> {
        let pool = self.pool()?;
        let rows = block_on(bind_params(sqlx::query(sql), params).fetch_all(&pool))??;
        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|index| row.try_get::<Option<String>, _>(index))
                    .collect::<Result<SqlRow, _>>()
                    .map_err(DbError::from)
            })
            .collect()
    }

    fn check_valid(&self, timeout: Duration) -> DbResult<()> {
        let pool = self.pool()?;
        block_on_timeout("postgres_check_valid", timeout, ping_pooled(pool))
    }

    fn close(&self) {
        if let Some(pool) = self.lock().take() {
            if let Err(err) = block_on(pool.close()) {
                debug!("event=pool_close module=db status=error dialect=postgres error={err}");
                return;
            }
            info!("event=pool_close module=db status=ok dialect=postgres");
        }
    }

    fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

impl Drop for PgExecutor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::PgExecutor;
    use crate::db::DbError;
    use crate::model::profile::{BackendKind, ConnectionProfile};
    use std::time::Duration;

    #[test]
    fn probe_fails_fast_against_a_closed_port() {
        let profile =
            ConnectionProfile::relational("nowhere", BackendKind::Postgres, "127.0.0.1", 1, "worklog")
                .with_credentials("root", "pw");
        let err = PgExecutor::probe(&profile, Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, DbError::Sqlx(_) | DbError::Timeout { .. }));
    }
}
