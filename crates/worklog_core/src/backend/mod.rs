//! Live backend connections and their lifecycle.
//!
//! # Responsibility
//! - Turn a connection profile into a live client or pool.
//! - Probe profiles without retaining anything.
//! - Close and verify live backends for the switch protocol.
//!
//! # Invariants
//! - Document clients of live backends are registered as `worklog-<profile>`.
//! - Relational pools are created and closed only through `LiveBackend`.

use crate::db::mysql::MySqlExecutor;
use crate::db::postgres::PgExecutor;
use crate::db::sqlite::SqliteExecutor;
use crate::db::{schema, DbError, SqlExecutor};
use crate::model::profile::{BackendKind, CacheKey, ConnectionProfile, ProfileValidationError};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

pub mod document;
pub mod namespace;
pub mod probe;

use document::{DocumentClient, DocumentError};
use namespace::ClientNamespace;

pub const EMPLOYEE_COLLECTION: &str = "employees";
pub const WORK_RECORD_COLLECTION: &str = "work_records";

pub type DocumentNamespace = ClientNamespace<DocumentClient>;

#[derive(Debug)]
pub enum BackendError {
    Profile(ProfileValidationError),
    Db(DbError),
    Document(DocumentError),
    /// The live client is no longer registered in the namespace.
    Unregistered(String),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Profile(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Document(err) => write!(f, "{err}"),
            Self::Unregistered(name) => write!(f, "client `{name}` is not registered"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Profile(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Document(err) => Some(err),
            Self::Unregistered(_) => None,
        }
    }
}

impl From<ProfileValidationError> for BackendError {
    fn from(value: ProfileValidationError) -> Self {
        Self::Profile(value)
    }
}

impl From<DbError> for BackendError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<DocumentError> for BackendError {
    fn from(value: DocumentError) -> Self {
        Self::Document(value)
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Namespace entry name of the live client for `profile_name`.
pub fn live_client_name(profile_name: &str) -> String {
    format!("worklog-{profile_name}")
}

#[derive(Clone)]
pub enum LiveConnection {
    Document {
        client: Arc<DocumentClient>,
        registered_as: String,
    },
    Relational(Arc<dyn SqlExecutor>),
}

/// The one connected backend repositories are built from.
#[derive(Clone)]
pub struct LiveBackend {
    key: CacheKey,
    connection: LiveConnection,
}

impl std::fmt::Debug for LiveBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBackend").field("key", &self.key).finish()
    }
}

impl LiveBackend {
    /// Connects to `profile`, registering document clients in `namespace`.
    pub fn connect(profile: &ConnectionProfile, namespace: &DocumentNamespace) -> BackendResult<Self> {
        profile.validate()?;
        let pool = profile.effective_pool();
        let connection = match profile.kind {
            BackendKind::DocumentStore => {
                let registered_as = live_client_name(&profile.name);
                let client = namespace.get_or_create(&registered_as, || {
                    DocumentClient::connect(profile, pool.connect_timeout)
                })?;
                LiveConnection::Document {
                    client,
                    registered_as,
                }
            }
            BackendKind::MySql => LiveConnection::Relational(Arc::new(MySqlExecutor::connect(profile)?)),
            BackendKind::Postgres => LiveConnection::Relational(Arc::new(PgExecutor::connect(profile)?)),
            BackendKind::Embedded => LiveConnection::Relational(Arc::new(SqliteExecutor::open(
                profile.embedded_path(),
                pool.connect_timeout,
            )?)),
        };
        info!(
            "event=backend_connect module=backend status=ok profile={} kind={}",
            profile.name, profile.kind
        );
        Ok(Self {
            key: profile.cache_key(),
            connection,
        })
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn kind(&self) -> BackendKind {
        self.key.kind
    }

    pub fn connection(&self) -> &LiveConnection {
        &self.connection
    }

    pub fn executor(&self) -> Option<&Arc<dyn SqlExecutor>> {
        match &self.connection {
            LiveConnection::Relational(executor) => Some(executor),
            LiveConnection::Document { .. } => None,
        }
    }

    /// Provisions the schema when missing. `None` for the document store.
    pub fn ensure_schema(&self) -> Result<Option<bool>, DbError> {
        match &self.connection {
            LiveConnection::Relational(executor) => schema::ensure_schema(executor.as_ref()).map(Some),
            LiveConnection::Document { .. } => Ok(None),
        }
    }

    /// Confirms the backend is still usable.
    pub fn verify(&self, namespace: &DocumentNamespace, timeout: Duration) -> BackendResult<()> {
        match &self.connection {
            LiveConnection::Relational(executor) => Ok(executor.check_valid(timeout)?),
            LiveConnection::Document { registered_as, .. } => {
                if namespace.contains(registered_as) {
                    Ok(())
                } else {
                    Err(BackendError::Unregistered(registered_as.clone()))
                }
            }
        }
    }

    /// Releases the pool or unregisters the client. Never fails.
    pub fn close(&self, namespace: &DocumentNamespace) {
        match &self.connection {
            LiveConnection::Relational(executor) => executor.close(),
            LiveConnection::Document { registered_as, .. } => {
                if namespace.remove(registered_as).is_none() {
                    warn!(
                        "event=backend_close module=backend status=error profile={} error_code=not_registered",
                        self.key.name
                    );
                    return;
                }
            }
        }
        info!(
            "event=backend_close module=backend status=ok profile={} kind={}",
            self.key.name, self.key.kind
        );
    }
}
