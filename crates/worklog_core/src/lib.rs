//! Runtime-switchable data access for employee work records.
//! One live backend at a time: a document store, MySQL, PostgreSQL or
//! embedded SQLite, selected from saved connection profiles.

pub mod backend;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod registry;
pub mod repo;
pub mod service;

pub use config::CoreConfig;
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::profile::{BackendKind, CacheKey, ConnectionProfile, PoolSettings, ProfileValidationError};
pub use model::record::{BasicRecordValidator, Employee, RecordValidator, WorkRecord};
pub use model::secret::Secret;
pub use registry::{ConnectionRegistry, Persistence, RegistryError};
pub use repo::{EmployeeRepository, RepoError, RepoResult, RepositoryPair, WorkRecordRepository};
pub use service::{
    BackendChanged, ChangeListener, ConnectionManager, FactoryError, ManagerError, SwitchError,
    SwitchReport, SwitchState,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
