//! Side-effect-free reachability check for a connection profile.
//!
//! # Invariants
//! - `test` never panics and never returns an error; failures are `false`.
//! - Probe clients never outlive the call: the namespace nets zero entries.

use super::document::DocumentClient;
use super::{DocumentNamespace, EMPLOYEE_COLLECTION};
use crate::db::mysql::MySqlExecutor;
use crate::db::postgres::PgExecutor;
use crate::db::sqlite::SqliteExecutor;
use crate::model::profile::{BackendKind, ConnectionProfile};
use log::{error, info};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct BackendProbe {
    namespace: Arc<DocumentNamespace>,
    timeout: Duration,
}

/// Removes a probe client from the namespace on every exit path.
struct ProbeRegistration<'a> {
    namespace: &'a DocumentNamespace,
    name: String,
}

impl Drop for ProbeRegistration<'_> {
    fn drop(&mut self) {
        self.namespace.remove(&self.name);
    }
}

impl BackendProbe {
    pub fn new(namespace: Arc<DocumentNamespace>, timeout: Duration) -> Self {
        Self { namespace, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns whether `profile` is reachable right now.
    ///
    /// # Side effects
    /// - Emits `backend_probe` logging events with duration and status.
    pub fn test(&self, profile: &ConnectionProfile) -> bool {
        let started_at = Instant::now();
        if let Err(err) = profile.validate() {
            error!(
                "event=backend_probe module=backend status=error profile={} kind={} error_code=invalid_profile error={}",
                profile.name, profile.kind, err
            );
            return false;
        }

        info!(
            "event=backend_probe module=backend status=start profile={} kind={}",
            profile.name, profile.kind
        );
        let outcome = match profile.kind {
            BackendKind::DocumentStore => self.probe_document_store(profile),
            BackendKind::MySql => {
                MySqlExecutor::probe(profile, self.timeout).map_err(|err| err.to_string())
            }
            BackendKind::Postgres => {
                PgExecutor::probe(profile, self.timeout).map_err(|err| err.to_string())
            }
            BackendKind::Embedded => SqliteExecutor::probe(profile.embedded_path(), self.timeout)
                .map_err(|err| err.to_string()),
        };

        match outcome {
            Ok(()) => {
                info!(
                    "event=backend_probe module=backend status=ok profile={} kind={} duration_ms={}",
                    profile.name,
                    profile.kind,
                    started_at.elapsed().as_millis()
                );
                true
            }
            Err(err) => {
                error!(
                    "event=backend_probe module=backend status=error profile={} kind={} duration_ms={} error={}",
                    profile.name,
                    profile.kind,
                    started_at.elapsed().as_millis(),
                    err
                );
                false
            }
        }
    }

    fn probe_document_store(&self, profile: &ConnectionProfile) -> Result<(), String> {
        let registration = ProbeRegistration {
            namespace: &self.namespace,
            name: format!("probe-{}-{}", profile.name, Uuid::new_v4()),
        };
        let client = self
            .namespace
            .get_or_create(&registration.name, || DocumentClient::connect(profile, self.timeout))
            .map_err(|err| err.to_string())?;
        client.ping(EMPLOYEE_COLLECTION).map_err(|err| err.to_string())
    }
}
