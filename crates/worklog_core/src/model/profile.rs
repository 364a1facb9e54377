//! Connection profile model.
//!
//! # Responsibility
//! - Describe one named way to reach a storage backend.
//! - Decide well-formedness per backend kind.
//! - Derive the repository cache key and effective pool tuning.
//!
//! # Invariants
//! - `name` is the identity of a profile; the cache key is `(kind, name)` and
//!   never a hash of mutable connection fields.
//! - The password is a `Secret` and is redacted from every serialized form.

use crate::model::secret::Secret;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Closed set of supported storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    /// Firestore-compatible REST document database.
    #[serde(rename = "document_store")]
    DocumentStore,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "postgres")]
    Postgres,
    /// Embedded SQLite, used for tests and single-user setups.
    #[serde(rename = "embedded")]
    Embedded,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::DocumentStore,
        BackendKind::MySql,
        BackendKind::Postgres,
        BackendKind::Embedded,
    ];

    /// Stable identifier used in the profile store, logs and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DocumentStore => "document_store",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Embedded => "embedded",
        }
    }

    /// Human-readable label for status messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::DocumentStore => "document store",
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::Embedded => "embedded SQLite",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "document_store" | "document" | "firestore" => Some(Self::DocumentStore),
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "embedded" | "sqlite" => Some(Self::Embedded),
            _ => None,
        }
    }

    pub fn is_relational(self) -> bool {
        !matches!(self, Self::DocumentStore)
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cached repository pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey {
    pub kind: BackendKind,
    pub name: String,
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Optional pool tuning; unset fields fall back to per-kind defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolSettings {
    pub max_pool_size: Option<u32>,
    pub min_idle: Option<u32>,
    pub connect_timeout: Option<Duration>,
}

/// Pool tuning after defaults are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectivePool {
    pub max_size: u32,
    pub min_idle: u32,
    pub connect_timeout: Duration,
}

impl PoolSettings {
    /// Resolves unset fields against the defaults for `kind`.
    ///
    /// `max_size` is at least 1 and `min_idle` never exceeds it.
    pub fn resolve(&self, kind: BackendKind) -> EffectivePool {
        let (max_default, idle_default, timeout_default) = match kind {
            BackendKind::MySql | BackendKind::Postgres => (10, 1, Duration::from_secs(30)),
            BackendKind::Embedded => (1, 1, Duration::from_secs(5)),
            BackendKind::DocumentStore => (1, 0, Duration::from_secs(30)),
        };
        let max_size = self.max_pool_size.unwrap_or(max_default).max(1);
        let min_idle = self.min_idle.unwrap_or(idle_default).min(max_size);
        let connect_timeout = self
            .connect_timeout
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(timeout_default);

        EffectivePool {
            max_size,
            min_idle,
            connect_timeout,
        }
    }
}

/// Validation failure for a connection profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileValidationError {
    EmptyName,
    MissingField {
        profile: String,
        kind: BackendKind,
        field: &'static str,
    },
}

impl Display for ProfileValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "profile name cannot be empty"),
            Self::MissingField {
                profile,
                kind,
                field,
            } => write!(
                f,
                "profile `{profile}` ({kind}) is missing required field `{field}`"
            ),
        }
    }
}

impl Error for ProfileValidationError {}

/// Named description of how to reach one storage backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionProfile {
    pub name: String,
    pub kind: BackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Path to a file holding the document-store access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Database name; for `Embedded` a file path, empty meaning in-memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret>,
    pub pool: PoolSettings,
    pub active: bool,
}

impl ConnectionProfile {
    /// Creates an empty profile of `kind`; callers fill kind-specific fields.
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            project_id: None,
            endpoint: None,
            credentials_path: None,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            pool: PoolSettings::default(),
            active: false,
        }
    }

    pub fn document_store(
        name: impl Into<String>,
        project_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let mut profile = Self::new(name, BackendKind::DocumentStore);
        profile.project_id = Some(project_id.into());
        profile.endpoint = Some(endpoint.into());
        profile
    }

    pub fn relational(
        name: impl Into<String>,
        kind: BackendKind,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        let mut profile = Self::new(name, kind);
        profile.host = Some(host.into());
        profile.port = Some(port);
        profile.database = Some(database.into());
        profile
    }

    /// Embedded SQLite profile; `None` selects a private in-memory database.
    pub fn embedded(name: impl Into<String>, path: Option<PathBuf>) -> Self {
        let mut profile = Self::new(name, BackendKind::Embedded);
        profile.database = path.map(|path| path.to_string_lossy().into_owned());
        profile
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<Secret>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    /// Checks that the fields required by `kind` are present.
    ///
    /// # Errors
    /// - `EmptyName` when the trimmed name is empty.
    /// - `MissingField` naming the first absent required field.
    pub fn validate(&self) -> Result<(), ProfileValidationError> {
        if self.name.trim().is_empty() {
            return Err(ProfileValidationError::EmptyName);
        }

        match self.kind {
            BackendKind::DocumentStore => {
                self.require(&self.project_id, "project_id")?;
                self.require(&self.endpoint, "endpoint")?;
            }
            BackendKind::MySql | BackendKind::Postgres => {
                self.require(&self.host, "host")?;
                if !matches!(self.port, Some(port) if port > 0) {
                    return Err(self.missing("port"));
                }
                self.require(&self.database, "database")?;
            }
            BackendKind::Embedded => {}
        }

        Ok(())
    }

    pub fn is_well_formed(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    pub fn effective_pool(&self) -> EffectivePool {
        self.pool.resolve(self.kind)
    }

    /// SQLite file location for embedded profiles, `None` for in-memory.
    pub fn embedded_path(&self) -> Option<&Path> {
        self.database
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(Path::new)
    }

    /// Short connection target for logs; never includes credentials.
    pub fn target_summary(&self) -> String {
        match self.kind {
            BackendKind::DocumentStore => format!(
                "{}/{}",
                self.endpoint.as_deref().unwrap_or_default(),
                self.project_id.as_deref().unwrap_or_default()
            ),
            BackendKind::MySql | BackendKind::Postgres => format!(
                "{}:{}/{}",
                self.host.as_deref().unwrap_or_default(),
                self.port.unwrap_or_default(),
                self.database.as_deref().unwrap_or_default()
            ),
            BackendKind::Embedded => match self.embedded_path() {
                Some(path) => path.display().to_string(),
                None => ":memory:".to_string(),
            },
        }
    }

    fn require(&self, value: &Option<String>, field: &'static str) -> Result<(), ProfileValidationError> {
        match value.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => Ok(()),
            _ => Err(self.missing(field)),
        }
    }

    fn missing(&self, field: &'static str) -> ProfileValidationError {
        ProfileValidationError::MissingField {
            profile: self.name.clone(),
            kind: self.kind,
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BackendKind, ConnectionProfile, PoolSettings, ProfileValidationError};
    use std::time::Duration;

    #[test]
    fn relational_profile_requires_host_port_and_database() {
        let valid = ConnectionProfile::relational("Local", BackendKind::MySql, "localhost", 3306, "empdb");
        assert!(valid.is_well_formed());

        let mut no_host = valid.clone();
        no_host.host = Some("  ".to_string());
        assert!(matches!(
            no_host.validate(),
            Err(ProfileValidationError::MissingField { field: "host", .. })
        ));

        let mut no_port = valid.clone();
        no_port.port = Some(0);
        assert!(matches!(
            no_port.validate(),
            Err(ProfileValidationError::MissingField { field: "port", .. })
        ));

        let mut no_db = valid;
        no_db.database = None;
        assert!(matches!(
            no_db.validate(),
            Err(ProfileValidationError::MissingField { field: "database", .. })
        ));
    }

    #[test]
    fn document_store_requires_project_and_endpoint() {
        let valid = ConnectionProfile::document_store("Cloud", "emp-project", "http://localhost:8080");
        assert!(valid.is_well_formed());

        let mut no_endpoint = valid;
        no_endpoint.endpoint = None;
        assert!(matches!(
            no_endpoint.validate(),
            Err(ProfileValidationError::MissingField { field: "endpoint", .. })
        ));
    }

    #[test]
    fn embedded_profile_is_always_valid_but_name_is_required() {
        assert!(ConnectionProfile::embedded("Test", None).is_well_formed());
        assert_eq!(
            ConnectionProfile::embedded("   ", None).validate(),
            Err(ProfileValidationError::EmptyName)
        );
    }

    #[test]
    fn pool_defaults_depend_on_kind_and_are_clamped() {
        let mysql = PoolSettings::default().resolve(BackendKind::MySql);
        assert_eq!(mysql.max_size, 10);
        assert_eq!(mysql.connect_timeout, Duration::from_secs(30));

        let clamped = PoolSettings {
            max_pool_size: Some(0),
            min_idle: Some(8),
            connect_timeout: Some(Duration::ZERO),
        }
        .resolve(BackendKind::Postgres);
        assert_eq!(clamped.max_size, 1);
        assert_eq!(clamped.min_idle, 1);
        assert_eq!(clamped.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn serialized_profile_redacts_password() {
        let profile = ConnectionProfile::relational("Local", BackendKind::Postgres, "db", 5432, "empdb")
            .with_credentials("app", "s3cret");
        let json = serde_json::to_string(&profile).expect("profile should serialize");

        assert!(!json.contains("s3cret"));
        assert!(json.contains("\"kind\":\"postgres\""));
    }

    #[test]
    fn cache_key_uses_kind_and_name_only() {
        let mut profile = ConnectionProfile::relational("Local", BackendKind::MySql, "a", 3306, "x");
        let before = profile.cache_key();
        profile.host = Some("b".to_string());
        assert_eq!(profile.cache_key(), before);
        assert_eq!(before.to_string(), "mysql:Local");
    }
}
