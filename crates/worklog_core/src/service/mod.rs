//! Connection lifecycle services.
//!
//! # Responsibility
//! - Cache repositories for the live backend (`factory`).
//! - Run the phased backend switch (`switch`).
//! - Publish backend changes and run background work (`notifier`, `executor`).
//! - Expose one facade for callers (`manager`).

pub mod executor;
pub mod factory;
pub mod manager;
pub mod notifier;
pub mod switch;

pub use executor::{BackgroundExecutor, ExecutorError};
pub use factory::{FactoryError, FactoryResult, RepositoryFactory};
pub use manager::{ConnectionManager, ManagerError};
pub use notifier::{BackendChanged, ChangeListener, ChangeNotifier};
pub use switch::{
    SwitchCause, SwitchCoordinator, SwitchError, SwitchLogEntry, SwitchReport, SwitchState,
};
