//! Cached repository construction for the live backend.
//!
//! # Responsibility
//! - Hand out the repository pair bound to the live backend.
//! - Build pairs lazily with double-checked construction.
//! - Give the switch protocol exclusive access through `SwitchLease`.
//!
//! # Invariants
//! - The cache holds at most one pair, keyed by the live backend's `CacheKey`.
//! - Readers never observe a pair from one backend mixed with another.
//! - A lease holds the write lock for its whole lifetime.

use crate::backend::{BackendError, LiveBackend};
use crate::db::DbError;
use crate::model::profile::CacheKey;
use crate::model::record::RecordValidator;
use crate::repo::{EmployeeRepository, RepositoryPair, WorkRecordRepository};
use log::info;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

#[derive(Debug)]
pub enum FactoryError {
    NoActiveConnection,
    Backend(BackendError),
    SchemaProvision(DbError),
}

impl Display for FactoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoActiveConnection => write!(f, "no active database connection"),
            Self::Backend(err) => write!(f, "{err}"),
            Self::SchemaProvision(err) => write!(f, "schema provisioning failed: {err}"),
        }
    }
}

impl Error for FactoryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NoActiveConnection => None,
            Self::Backend(err) => Some(err),
            Self::SchemaProvision(err) => Some(err),
        }
    }
}

pub type FactoryResult<T> = Result<T, FactoryError>;

#[derive(Default)]
struct FactoryState {
    live: Option<LiveBackend>,
    cache: HashMap<CacheKey, RepositoryPair>,
}

pub struct RepositoryFactory {
    state: RwLock<FactoryState>,
    validator: Arc<dyn RecordValidator>,
    builds: AtomicUsize,
}

impl RepositoryFactory {
    pub fn new(validator: Arc<dyn RecordValidator>) -> Self {
        Self {
            state: RwLock::new(FactoryState::default()),
            validator,
            builds: AtomicUsize::new(0),
        }
    }

    /// Both repositories for the live backend, built on first use.
    ///
    /// # Errors
    /// - `NoActiveConnection` when nothing is live.
    /// - `Backend` when the live pool was already closed.
    /// - `SchemaProvision` when a lazy rebuild cannot provision the schema.
    pub fn repositories(&self) -> FactoryResult<RepositoryPair> {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let live = state.live.as_ref().ok_or(FactoryError::NoActiveConnection)?;
            if let Some(pair) = state.cache.get(live.key()) {
                return Ok(pair.clone());
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.build_locked(&mut state)
    }

    pub fn employee_repository(&self) -> FactoryResult<Arc<dyn EmployeeRepository>> {
        Ok(self.repositories()?.employees)
    }

    pub fn work_record_repository(&self) -> FactoryResult<Arc<dyn WorkRecordRepository>> {
        Ok(self.repositories()?.work_records)
    }

    /// Cache key of the live backend.
    pub fn active_binding(&self) -> Option<CacheKey> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .live
            .as_ref()
            .map(|live| live.key().clone())
    }

    /// Drops cached handles; the live backend stays connected.
    pub fn clear_cache(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .cache
            .clear();
    }

    pub fn cached_keys(&self) -> Vec<CacheKey> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cache
            .keys()
            .cloned()
            .collect()
    }

    /// Number of pairs built since creation.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Exclusive access for the switch protocol.
    pub(crate) fn lease(&self) -> SwitchLease<'_> {
        SwitchLease {
            factory: self,
            state: self.state.write().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn build_locked(&self, state: &mut FactoryState) -> FactoryResult<RepositoryPair> {
        let live = state.live.as_ref().ok_or(FactoryError::NoActiveConnection)?;
        if let Some(pair) = state.cache.get(live.key()) {
            return Ok(pair.clone());
        }
        if let Some(executor) = live.executor() {
            if executor.is_closed() {
                return Err(FactoryError::Backend(BackendError::Db(DbError::Closed)));
            }
        }
        live.ensure_schema().map_err(FactoryError::SchemaProvision)?;

        let pair = RepositoryPair::for_backend(live, Arc::clone(&self.validator));
        let key = live.key().clone();
        self.builds.fetch_add(1, Ordering::SeqCst);
        info!("event=repository_build module=service status=ok binding={key}");
        state.cache.clear();
        state.cache.insert(key, pair.clone());
        Ok(pair)
    }
}

/// Write access to the factory held across a switch.
pub(crate) struct SwitchLease<'a> {
    factory: &'a RepositoryFactory,
    state: RwLockWriteGuard<'a, FactoryState>,
}

impl SwitchLease<'_> {
    /// Detaches the live backend and drops cached handles.
    pub(crate) fn take_live(&mut self) -> Option<LiveBackend> {
        self.state.cache.clear();
        self.state.live.take()
    }

    pub(crate) fn install(&mut self, live: LiveBackend) {
        self.state.cache.clear();
        self.state.live = Some(live);
    }

    /// Clears the cache and eagerly builds the pair for the installed backend.
    pub(crate) fn rebuild(&mut self) -> FactoryResult<RepositoryPair> {
        self.state.cache.clear();
        self.factory.build_locked(&mut self.state)
    }

    pub(crate) fn cached(&self) -> Option<&RepositoryPair> {
        let live = self.state.live.as_ref()?;
        self.state.cache.get(live.key())
    }

    pub(crate) fn cache_len(&self) -> usize {
        self.state.cache.len()
    }
}
