//! Durable registry of connection profiles.
//!
//! # Responsibility
//! - Keep every known profile in insertion order plus the active marker.
//! - Validate and deduplicate profiles on every mutation.
//! - Persist after each mutation and report whether it reached disk.
//!
//! # Invariants
//! - Profile names are unique.
//! - At most one profile is active, and the active profile cannot be removed.
//! - A failed save never rolls back the in-memory change.

use crate::model::profile::{BackendKind, ConnectionProfile, ProfileValidationError};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod secret;
pub mod store;

use store::{ProfileStore, StoreError, StoredRegistry};

/// Name of the profile seeded by `bootstrap_defaults`.
pub const DEFAULT_PROFILE_NAME: &str = "embedded";

#[derive(Debug)]
pub enum RegistryError {
    Validation(ProfileValidationError),
    DuplicateName(String),
    NotFound(String),
    ActiveProfile(String),
    /// The store could not be read at load time.
    Persistence(StoreError),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::DuplicateName(name) => write!(f, "a profile named `{name}` already exists"),
            Self::NotFound(name) => write!(f, "no profile named `{name}`"),
            Self::ActiveProfile(name) => {
                write!(f, "profile `{name}` is active and cannot be removed")
            }
            Self::Persistence(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Persistence(err) => Some(err),
            Self::DuplicateName(_) | Self::NotFound(_) | Self::ActiveProfile(_) => None,
        }
    }
}

impl From<ProfileValidationError> for RegistryError {
    fn from(value: ProfileValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for RegistryError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value)
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Whether a registry mutation reached durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    Saved,
    /// Applied in memory only; `reason` describes the save failure.
    MemoryOnly { reason: String },
}

impl Persistence {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    profiles: Vec<ConnectionProfile>,
    active: Option<String>,
}

impl RegistryState {
    fn position(&self, name: &str) -> Option<usize> {
        self.profiles.iter().position(|profile| profile.name == name)
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    store: Option<ProfileStore>,
}

impl ConnectionRegistry {
    /// Registry with no backing file; every mutation reports `MemoryOnly`.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            store: None,
        }
    }

    /// Loads the registry from `store`.
    ///
    /// # Errors
    /// - `Persistence` when the file exists but cannot be read or parsed.
    pub fn load(store: ProfileStore) -> RegistryResult<Self> {
        let StoredRegistry { profiles, active } = store.load()?;
        Ok(Self {
            state: RwLock::new(RegistryState { profiles, active }),
            store: Some(store),
        })
    }

    pub fn store_path(&self) -> Option<&std::path::Path> {
        self.store.as_ref().map(ProfileStore::path)
    }

    pub fn list(&self) -> Vec<ConnectionProfile> {
        self.read().profiles.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.read()
            .profiles
            .iter()
            .map(|profile| profile.name.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<ConnectionProfile> {
        let state = self.read();
        state.position(name).map(|index| state.profiles[index].clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().position(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.read().profiles.is_empty()
    }

    pub fn active(&self) -> Option<ConnectionProfile> {
        let state = self.read();
        let name = state.active.as_deref()?;
        state.position(name).map(|index| state.profiles[index].clone())
    }

    pub fn active_name(&self) -> Option<String> {
        self.read().active.clone()
    }

    /// Adds a new profile.
    ///
    /// # Errors
    /// - `Validation` when the profile is malformed.
    /// - `DuplicateName` when a profile with the same name exists.
    pub fn add(&self, mut profile: ConnectionProfile) -> RegistryResult<Persistence> {
        profile.validate()?;
        let mut state = self.write();
        if state.position(&profile.name).is_some() {
            return Err(RegistryError::DuplicateName(profile.name));
        }
        profile.active = false;
        info!(
            "event=profile_add module=registry status=ok profile={} kind={}",
            profile.name, profile.kind
        );
        state.profiles.push(profile);
        Ok(self.persist(&state))
    }

    /// Replaces the profile called `name`, keeping its position.
    ///
    /// The active marker follows a rename. Live connections are untouched
    /// until the profile is activated again.
    pub fn update(&self, name: &str, mut profile: ConnectionProfile) -> RegistryResult<Persistence> {
        profile.validate()?;
        let mut state = self.write();
        let index = state
            .position(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if profile.name != name && state.position(&profile.name).is_some() {
            return Err(RegistryError::DuplicateName(profile.name));
        }

        let was_active = state.active.as_deref() == Some(name);
        profile.active = was_active;
        if was_active {
            state.active = Some(profile.name.clone());
        }
        info!(
            "event=profile_update module=registry status=ok profile={} kind={} active={}",
            profile.name, profile.kind, was_active
        );
        state.profiles[index] = profile;
        Ok(self.persist(&state))
    }

    /// Removes the profile called `name`.
    ///
    /// # Errors
    /// - `ActiveProfile` when it is the active profile.
    /// - `NotFound` when no such profile exists.
    pub fn remove(&self, name: &str) -> RegistryResult<Persistence> {
        let mut state = self.write();
        if state.active.as_deref() == Some(name) {
            return Err(RegistryError::ActiveProfile(name.to_string()));
        }
        let index = state
            .position(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        state.profiles.remove(index);
        info!("event=profile_remove module=registry status=ok profile={name}");
        Ok(self.persist(&state))
    }

    /// Makes `name` the only active profile and persists.
    pub(crate) fn mark_active(&self, name: &str) -> RegistryResult<Persistence> {
        let mut state = self.write();
        if state.position(name).is_none() {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        for profile in &mut state.profiles {
            profile.active = profile.name == name;
        }
        state.active = Some(name.to_string());
        Ok(self.persist(&state))
    }

    /// Seeds an in-memory embedded profile when the registry is empty.
    ///
    /// Returns whether a profile was added.
    pub fn bootstrap_defaults(&self) -> RegistryResult<bool> {
        if !self.is_empty() {
            return Ok(false);
        }
        match self.add(ConnectionProfile::embedded(DEFAULT_PROFILE_NAME, None)) {
            Ok(_) => {
                info!(
                    "event=profile_bootstrap module=registry status=ok profile={DEFAULT_PROFILE_NAME} kind={}",
                    BackendKind::Embedded
                );
                Ok(true)
            }
            Err(RegistryError::DuplicateName(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Writes the current state to the store.
    pub fn save(&self) -> Persistence {
        let state = self.read();
        self.persist(&state)
    }

    fn persist(&self, state: &RegistryState) -> Persistence {
        let Some(store) = self.store.as_ref() else {
            return Persistence::MemoryOnly {
                reason: "registry has no backing store".to_string(),
            };
        };
        match store.save(&state.profiles, state.active.as_deref()) {
            Ok(()) => Persistence::Saved,
            Err(err) => {
                warn!(
                    "event=registry_persist module=registry status=error path={} error={}",
                    store.path().display(),
                    err
                );
                Persistence::MemoryOnly {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionRegistry, Persistence, RegistryError};
    use crate::model::profile::{BackendKind, ConnectionProfile};

    fn mysql(name: &str) -> ConnectionProfile {
        ConnectionProfile::relational(name, BackendKind::MySql, "localhost", 3306, "empdb")
    }

    #[test]
    fn in_memory_registry_reports_memory_only() {
        let registry = ConnectionRegistry::in_memory();
        let outcome = registry.add(mysql("Local")).unwrap();
        assert!(matches!(outcome, Persistence::MemoryOnly { .. }));
        assert_eq!(registry.names(), vec!["Local".to_string()]);
    }

    #[test]
    fn rename_onto_existing_name_is_rejected() {
        let registry = ConnectionRegistry::in_memory();
        registry.add(mysql("A")).unwrap();
        registry.add(mysql("B")).unwrap();
        let err = registry.update("A", mysql("B")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "B"));
    }

    #[test]
    fn active_marker_follows_rename() {
        let registry = ConnectionRegistry::in_memory();
        registry.add(mysql("A")).unwrap();
        registry.mark_active("A").unwrap();
        registry.update("A", mysql("A2")).unwrap();

        assert_eq!(registry.active_name().as_deref(), Some("A2"));
        assert!(registry.get("A2").unwrap().active);
    }

    #[test]
    fn bootstrap_only_seeds_an_empty_registry() {
        let registry = ConnectionRegistry::in_memory();
        assert!(registry.bootstrap_defaults().unwrap());
        assert!(!registry.bootstrap_defaults().unwrap());
        assert_eq!(registry.get("embedded").unwrap().kind, BackendKind::Embedded);
    }
}
