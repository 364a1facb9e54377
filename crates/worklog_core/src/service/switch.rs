//! Runtime backend switch protocol.
//!
//! # Responsibility
//! - Move the live backend from one profile to another in ordered phases.
//! - Keep repository readers from observing a half-switched state.
//! - Record committed switches and notify listeners.
//!
//! # Invariants
//! - At most one switch runs at a time; a concurrent request fails fast.
//! - A failed probe changes nothing.
//! - A failure after Applying leaves no live backend and the registry's
//!   previous active mark intact.
//!
//! # See also
//! - DESIGN.md "Switch protocol"

use super::factory::{FactoryError, RepositoryFactory, SwitchLease};
use super::notifier::{BackendChanged, ChangeNotifier};
use crate::backend::probe::BackendProbe;
use crate::backend::{BackendError, DocumentNamespace, LiveBackend};
use crate::db::DbError;
use crate::model::profile::{BackendKind, ConnectionProfile, ProfileValidationError};
use crate::registry::{ConnectionRegistry, Persistence, RegistryError};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const HISTORY_LIMIT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Idle,
    Probing,
    Applying,
    Provisioning,
    Rebuilding,
    Verifying,
    Committed,
    RolledBack,
}

impl SwitchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Probing => "probing",
            Self::Applying => "applying",
            Self::Provisioning => "provisioning",
            Self::Rebuilding => "rebuilding",
            Self::Verifying => "verifying",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl Display for SwitchState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying failure of a switch phase.
#[derive(Debug)]
pub enum SwitchCause {
    Backend(BackendError),
    SchemaProvision(DbError),
    Repository(FactoryError),
    Verification(String),
    Registry(RegistryError),
}

impl Display for SwitchCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(err) => write!(f, "{err}"),
            Self::SchemaProvision(err) => write!(f, "schema provisioning failed: {err}"),
            Self::Repository(err) => write!(f, "{err}"),
            Self::Verification(message) => write!(f, "verification failed: {message}"),
            Self::Registry(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SwitchCause {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(err) => Some(err),
            Self::SchemaProvision(err) => Some(err),
            Self::Repository(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Verification(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum SwitchError {
    Validation(ProfileValidationError),
    NotFound(String),
    ProbeFailed(String),
    SwitchInProgress,
    Phase {
        phase: SwitchState,
        profile: String,
        source: SwitchCause,
    },
}

impl Display for SwitchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(name) => write!(f, "no saved profile named `{name}`"),
            Self::ProbeFailed(name) => write!(f, "profile `{name}` is not reachable"),
            Self::SwitchInProgress => write!(f, "another backend switch is in progress"),
            Self::Phase {
                phase,
                profile,
                source,
            } => write!(f, "switch to `{profile}` failed while {phase}: {source}"),
        }
    }
}

impl Error for SwitchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Phase { source, .. } => Some(source),
            Self::NotFound(_) | Self::ProbeFailed(_) | Self::SwitchInProgress => None,
        }
    }
}

/// Outcome of a committed switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchReport {
    pub profile: String,
    pub kind: BackendKind,
    /// Whether the schema was created during this switch.
    pub provisioned: bool,
    pub persistence: Persistence,
    pub duration: Duration,
}

/// Audit entry for one committed switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchLogEntry {
    pub at: DateTime<Utc>,
    pub profile: String,
    pub kind: BackendKind,
    pub provisioned: bool,
}

/// Clears the in-flight flag on every exit path.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SwitchCoordinator {
    registry: Arc<ConnectionRegistry>,
    factory: Arc<RepositoryFactory>,
    namespace: Arc<DocumentNamespace>,
    notifier: Arc<ChangeNotifier>,
    probe: BackendProbe,
    verify_timeout: Duration,
    in_flight: AtomicBool,
    state: Mutex<SwitchState>,
    history: Mutex<VecDeque<SwitchLogEntry>>,
}

impl SwitchCoordinator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        factory: Arc<RepositoryFactory>,
        namespace: Arc<DocumentNamespace>,
        notifier: Arc<ChangeNotifier>,
        probe: BackendProbe,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            factory,
            namespace,
            notifier,
            probe,
            verify_timeout,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(SwitchState::Idle),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn state(&self) -> SwitchState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed switches, oldest first.
    pub fn history(&self) -> Vec<SwitchLogEntry> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn is_switching(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Makes the saved profile named `requested.name` the live backend.
    ///
    /// The registry copy is what gets probed and connected; other fields of
    /// `requested` are ignored.
    ///
    /// # Errors
    /// - `Validation`, `NotFound`, `SwitchInProgress`: rejected up front.
    /// - `ProbeFailed`: target unreachable; nothing changed.
    /// - `Phase`: failed after Applying began; no backend is live.
    pub fn switch_to(&self, requested: &ConnectionProfile) -> Result<SwitchReport, SwitchError> {
        requested.validate().map_err(SwitchError::Validation)?;
        let saved = self
            .registry
            .get(&requested.name)
            .ok_or_else(|| SwitchError::NotFound(requested.name.clone()))?;
        saved.validate().map_err(SwitchError::Validation)?;
        let profile = &saved;
        let Some(_flight) = FlightGuard::acquire(&self.in_flight) else {
            warn!(
                "event=backend_switch module=service status=error profile={} error_code=switch_in_progress",
                profile.name
            );
            return Err(SwitchError::SwitchInProgress);
        };

        let started_at = Instant::now();
        info!(
            "event=backend_switch module=service status=start profile={} kind={}",
            profile.name, profile.kind
        );

        self.set_state(SwitchState::Probing);
        if !self.probe.test(profile) {
            self.set_state(SwitchState::Idle);
            error!(
                "event=backend_switch module=service status=error profile={} phase=probing error_code=probe_failed",
                profile.name
            );
            return Err(SwitchError::ProbeFailed(profile.name.clone()));
        }

        let mut lease = self.factory.lease();
        let outcome = self.apply(&mut lease, profile);
        let (provisioned, persistence) = match outcome {
            Ok(done) => done,
            Err((phase, cause)) => {
                if let Some(partial) = lease.take_live() {
                    partial.close(&self.namespace);
                }
                drop(lease);
                self.set_state(SwitchState::RolledBack);
                error!(
                    "event=backend_switch module=service status=error profile={} phase={} duration_ms={} error={}",
                    profile.name,
                    phase,
                    started_at.elapsed().as_millis(),
                    cause
                );
                return Err(SwitchError::Phase {
                    phase,
                    profile: profile.name.clone(),
                    source: cause,
                });
            }
        };
        drop(lease);

        self.set_state(SwitchState::Committed);
        self.record(profile, provisioned);
        let report = SwitchReport {
            profile: profile.name.clone(),
            kind: profile.kind,
            provisioned,
            persistence,
            duration: started_at.elapsed(),
        };
        info!(
            "event=backend_switch module=service status=ok profile={} kind={} provisioned={} saved={} duration_ms={}",
            report.profile,
            report.kind,
            report.provisioned,
            report.persistence.is_saved(),
            report.duration.as_millis()
        );

        // Still in flight here: a listener that starts another switch is rejected.
        self.notifier.publish(&BackendChanged {
            kind: profile.kind,
            profile: profile.name.clone(),
            message: format!("Connected to {} ({})", profile.name, profile.kind.label()),
        });
        Ok(report)
    }

    /// Closes the live backend and clears the cache.
    ///
    /// # Errors
    /// - `SwitchInProgress` when a switch is running.
    pub fn disconnect(&self) -> Result<(), SwitchError> {
        let Some(_flight) = FlightGuard::acquire(&self.in_flight) else {
            return Err(SwitchError::SwitchInProgress);
        };
        let mut lease = self.factory.lease();
        if let Some(live) = lease.take_live() {
            live.close(&self.namespace);
            info!(
                "event=backend_disconnect module=service status=ok profile={}",
                live.key().name
            );
        }
        drop(lease);
        self.set_state(SwitchState::Idle);
        Ok(())
    }

    fn apply(
        &self,
        lease: &mut SwitchLease<'_>,
        profile: &ConnectionProfile,
    ) -> Result<(bool, Persistence), (SwitchState, SwitchCause)> {
        self.set_state(SwitchState::Applying);
        if let Some(previous) = lease.take_live() {
            previous.close(&self.namespace);
        }
        let live = LiveBackend::connect(profile, &self.namespace)
            .map_err(|err| (SwitchState::Applying, SwitchCause::Backend(err)))?;
        lease.install(live.clone());

        self.set_state(SwitchState::Provisioning);
        let provisioned = live
            .ensure_schema()
            .map_err(|err| (SwitchState::Provisioning, SwitchCause::SchemaProvision(err)))?
            .unwrap_or(false);

        self.set_state(SwitchState::Rebuilding);
        lease
            .rebuild()
            .map_err(|err| (SwitchState::Rebuilding, SwitchCause::Repository(err)))?;

        self.set_state(SwitchState::Verifying);
        self.verify(lease, &live, profile)
            .map_err(|message| (SwitchState::Verifying, SwitchCause::Verification(message)))?;

        let persistence = self
            .registry
            .mark_active(&profile.name)
            .map_err(|err| (SwitchState::Verifying, SwitchCause::Registry(err)))?;
        Ok((provisioned, persistence))
    }

    fn verify(
        &self,
        lease: &SwitchLease<'_>,
        live: &LiveBackend,
        profile: &ConnectionProfile,
    ) -> Result<(), String> {
        let saved_kind = self
            .registry
            .get(&profile.name)
            .map(|saved| saved.kind)
            .ok_or_else(|| format!("profile {} left the registry", profile.name))?;
        if live.kind() != saved_kind {
            return Err(format!(
                "live backend is {} but {} is saved as {}",
                live.kind(),
                profile.name,
                saved_kind
            ));
        }
        live.verify(&self.namespace, self.verify_timeout)
            .map_err(|err| err.to_string())?;

        let expected = profile.cache_key();
        let pair = lease
            .cached()
            .ok_or_else(|| "repositories were not cached".to_string())?;
        if lease.cache_len() != 1 || pair.binding() != Some(&expected) {
            return Err(format!("repositories are not bound to {expected}"));
        }
        Ok(())
    }

    fn record(&self, profile: &ConnectionProfile, provisioned: bool) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(SwitchLogEntry {
            at: Utc::now(),
            profile: profile.name.clone(),
            kind: profile.kind,
            provisioned,
        });
    }

    fn set_state(&self, next: SwitchState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}
