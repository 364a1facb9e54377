//! Connection manager facade.
//!
//! # Responsibility
//! - Own the registry, client namespace, factory, coordinator and notifier.
//! - Offer blocking and background variants of probe and activation.
//!
//! # Invariants
//! - Background callbacks run on a worker thread, never the caller's.
//! - `shutdown` leaves no live backend and no cached repositories.

use super::executor::{BackgroundExecutor, ExecutorError};
use super::factory::{FactoryResult, RepositoryFactory};
use super::notifier::{ChangeListener, ChangeNotifier};
use super::switch::{SwitchCoordinator, SwitchError, SwitchLogEntry, SwitchReport, SwitchState};
use crate::backend::probe::BackendProbe;
use crate::backend::DocumentNamespace;
use crate::config::CoreConfig;
use crate::model::profile::{CacheKey, ConnectionProfile};
use crate::model::record::{BasicRecordValidator, RecordValidator};
use crate::registry::secret::SecretCipher;
use crate::registry::store::ProfileStore;
use crate::registry::{ConnectionRegistry, RegistryError};
use crate::repo::{EmployeeRepository, RepositoryPair, WorkRecordRepository};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

const WORKER_NAME: &str = "worklog-bg";

#[derive(Debug)]
pub enum ManagerError {
    Registry(RegistryError),
    Worker(ExecutorError),
}

impl Display for ManagerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(err) => write!(f, "{err}"),
            Self::Worker(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ManagerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registry(err) => Some(err),
            Self::Worker(err) => Some(err),
        }
    }
}

impl From<RegistryError> for ManagerError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<ExecutorError> for ManagerError {
    fn from(value: ExecutorError) -> Self {
        Self::Worker(value)
    }
}

struct ManagerInner {
    registry: Arc<ConnectionRegistry>,
    namespace: Arc<DocumentNamespace>,
    factory: Arc<RepositoryFactory>,
    notifier: Arc<ChangeNotifier>,
    probe: BackendProbe,
    coordinator: SwitchCoordinator,
}

impl ManagerInner {
    fn activate(&self, name: &str) -> Result<SwitchReport, SwitchError> {
        let profile = self
            .registry
            .get(name)
            .ok_or_else(|| SwitchError::NotFound(name.to_string()))?;
        self.coordinator.switch_to(&profile)
    }
}

pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
    executor: BackgroundExecutor,
}

impl ConnectionManager {
    /// Loads saved profiles from `config.profiles_path`.
    ///
    /// Secrets use the key from `WORKLOG_SECRET_KEY` when set.
    ///
    /// # Errors
    /// - `Registry` when the profile file exists but cannot be read.
    /// - `Worker` when background threads cannot be started.
    pub fn open(config: &CoreConfig) -> Result<Self, ManagerError> {
        let store = ProfileStore::new(config.profiles_path.clone(), SecretCipher::from_env());
        let registry = ConnectionRegistry::load(store)?;
        if config.bootstrap_defaults {
            registry.bootstrap_defaults()?;
        }
        info!(
            "event=manager_open module=service status=ok profiles={} active={}",
            registry.names().len(),
            registry.active_name().as_deref().unwrap_or("none")
        );
        Self::with_registry(registry, config, Arc::new(BasicRecordValidator))
    }

    pub fn with_registry(
        registry: ConnectionRegistry,
        config: &CoreConfig,
        validator: Arc<dyn RecordValidator>,
    ) -> Result<Self, ManagerError> {
        let registry = Arc::new(registry);
        let namespace = Arc::new(DocumentNamespace::new());
        let factory = Arc::new(RepositoryFactory::new(validator));
        let notifier = Arc::new(ChangeNotifier::new());
        let probe = BackendProbe::new(Arc::clone(&namespace), config.probe_timeout);
        let coordinator = SwitchCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&factory),
            Arc::clone(&namespace),
            Arc::clone(&notifier),
            probe.clone(),
            config.verify_timeout,
        );
        let executor = BackgroundExecutor::new(WORKER_NAME, config.worker_threads)?;

        Ok(Self {
            inner: Arc::new(ManagerInner {
                registry,
                namespace,
                factory,
                notifier,
                probe,
                coordinator,
            }),
            executor,
        })
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn factory(&self) -> &RepositoryFactory {
        &self.inner.factory
    }

    /// Names of document-store clients currently registered.
    pub fn document_clients(&self) -> Vec<String> {
        self.inner.namespace.names()
    }

    pub fn test_connection(&self, profile: &ConnectionProfile) -> bool {
        self.inner.probe.test(profile)
    }

    /// Probes on a worker thread and hands the outcome to `callback`.
    pub fn test_connection_async(
        &self,
        profile: ConnectionProfile,
        callback: impl FnOnce(bool) + Send + 'static,
    ) -> Result<(), ManagerError> {
        let inner = Arc::clone(&self.inner);
        self.executor
            .submit(move || callback(inner.probe.test(&profile)))?;
        Ok(())
    }

    /// Switches to the saved profile called `name`.
    pub fn activate(&self, name: &str) -> Result<SwitchReport, SwitchError> {
        self.inner.activate(name)
    }

    pub fn activate_async(
        &self,
        name: &str,
        callback: impl FnOnce(Result<SwitchReport, SwitchError>) + Send + 'static,
    ) -> Result<(), ManagerError> {
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        self.executor.submit(move || callback(inner.activate(&name)))?;
        Ok(())
    }

    /// Switches to `profile`, which must already be saved.
    pub fn switch_to(&self, profile: &ConnectionProfile) -> Result<SwitchReport, SwitchError> {
        self.inner.coordinator.switch_to(profile)
    }

    /// Reconnects the profile marked active in the saved registry.
    ///
    /// Returns `Ok(None)` when no profile is marked active.
    pub fn restore_active(&self) -> Result<Option<SwitchReport>, SwitchError> {
        let Some(name) = self.inner.registry.active_name() else {
            return Ok(None);
        };
        match self.inner.activate(&name) {
            Ok(report) => Ok(Some(report)),
            Err(err) => {
                warn!(
                    "event=restore_active module=service status=error profile={name} error={err}"
                );
                Err(err)
            }
        }
    }

    pub fn employees(&self) -> FactoryResult<Arc<dyn EmployeeRepository>> {
        self.inner.factory.employee_repository()
    }

    pub fn work_records(&self) -> FactoryResult<Arc<dyn WorkRecordRepository>> {
        self.inner.factory.work_record_repository()
    }

    pub fn repositories(&self) -> FactoryResult<RepositoryPair> {
        self.inner.factory.repositories()
    }

    pub fn active_binding(&self) -> Option<CacheKey> {
        self.inner.factory.active_binding()
    }

    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.inner.notifier.subscribe(listener);
    }

    pub fn switch_state(&self) -> SwitchState {
        self.inner.coordinator.state()
    }

    pub fn switch_history(&self) -> Vec<SwitchLogEntry> {
        self.inner.coordinator.history()
    }

    /// Closes the live backend and clears cached repositories.
    pub fn shutdown(&self) -> Result<(), SwitchError> {
        self.inner.coordinator.disconnect()?;
        info!("event=manager_shutdown module=service status=ok");
        Ok(())
    }
}
