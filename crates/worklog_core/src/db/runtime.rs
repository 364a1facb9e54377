//! Shared async runtime driving the pooled SQL drivers.
//!
//! The rest of the crate is blocking; sqlx futures are run to completion on
//! one process-wide multi-thread runtime.

use super::{DbError, DbResult};
use once_cell::sync::OnceCell;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

fn runtime() -> DbResult<&'static Runtime> {
    RUNTIME.get_or_try_init(|| {
        Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("worklog-sql")
            .enable_all()
            .build()
            .map_err(DbError::Runtime)
    })
}

/// Runs `future` to completion on the shared runtime.
pub(crate) fn block_on<F: Future>(future: F) -> DbResult<F::Output> {
    Ok(runtime()?.block_on(future))
}

/// Runs `future`, failing with `DbError::Timeout` once `after` elapses.
pub(crate) fn block_on_timeout<T, F>(operation: &'static str, after: Duration, future: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    block_on(async move {
        match tokio::time::timeout(after, future).await {
            Ok(result) => result,
            Err(_) => Err(DbError::Timeout { operation, after }),
        }
    })?
}
