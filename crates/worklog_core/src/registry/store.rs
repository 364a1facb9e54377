//! JSON persistence for the connection registry.
//!
//! # Responsibility
//! - Load and save profiles plus the active marker.
//! - Encrypt passwords at rest through `SecretCipher`.
//!
//! # Invariants
//! - Profile order in the file is registry insertion order.
//! - Writes go to a sibling temp file which is then renamed over the target.
//! - A missing file loads as an empty registry.

use super::secret::{SecretCipher, SecretError};
use crate::model::profile::{BackendKind, ConnectionProfile, PoolSettings};
use crate::model::secret::Secret;
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const STORE_VERSION: u64 = 1;

#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, source: std::io::Error },
    Json(serde_json::Error),
    UnsupportedVersion(u64),
    Secret { profile: String, source: SecretError },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "profile store `{}`: {source}", path.display()),
            Self::Json(err) => write!(f, "profile store is malformed: {err}"),
            Self::UnsupportedVersion(version) => {
                write!(f, "profile store version {version} is not supported")
            }
            Self::Secret { profile, source } => {
                write!(f, "password of profile `{profile}`: {source}")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json(err) => Some(err),
            Self::Secret { source, .. } => Some(source),
            Self::UnsupportedVersion(_) => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Registry contents as read from disk.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StoredRegistry {
    pub profiles: Vec<ConnectionProfile>,
    pub active: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active: Option<String>,
    #[serde(default)]
    profiles: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredProfile {
    kind: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credentials_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_pool_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_idle: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
    cipher: SecretCipher,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>, cipher: SecretCipher) -> Self {
        Self {
            path: path.into(),
            cipher,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the store; a missing file yields an empty registry.
    pub fn load(&self) -> Result<StoredRegistry, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("event=store_load module=registry status=ok profiles=0 missing=true");
                return Ok(StoredRegistry::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: StoreFile = serde_json::from_str(&raw)?;
        if file.version != STORE_VERSION {
            return Err(StoreError::UnsupportedVersion(file.version));
        }

        let mut profiles = Vec::with_capacity(file.profiles.len());
        for (name, value) in file.profiles {
            let stored: StoredProfile = serde_json::from_value(value)?;
            profiles.push(self.decode(name, stored)?);
        }
        let active = file
            .active
            .filter(|name| profiles.iter().any(|profile| &profile.name == name));
        for profile in &mut profiles {
            profile.active = active.as_deref() == Some(profile.name.as_str());
        }

        info!(
            "event=store_load module=registry status=ok profiles={} active={}",
            profiles.len(),
            active.as_deref().unwrap_or("-")
        );
        Ok(StoredRegistry { profiles, active })
    }

    /// Writes `profiles` and the active marker atomically.
    pub fn save(&self, profiles: &[ConnectionProfile], active: Option<&str>) -> Result<(), StoreError> {
        let mut encoded = Map::new();
        for profile in profiles {
            encoded.insert(profile.name.clone(), serde_json::to_value(self.encode(profile)?)?);
        }
        let file = StoreFile {
            version: STORE_VERSION,
            active: active.map(str::to_string),
            profiles: encoded,
        };
        let json = serde_json::to_string_pretty(&file)?;

        match self.write_atomically(json.as_bytes()) {
            Ok(()) => {
                info!(
                    "event=store_save module=registry status=ok profiles={}",
                    profiles.len()
                );
                Ok(())
            }
            Err(source) => {
                error!(
                    "event=store_save module=registry status=error path={} error={}",
                    self.path.display(),
                    source
                );
                Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    fn write_atomically(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut temp_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "profiles.json".into());
        temp_name.push(".tmp");
        let temp_path = self.path.with_file_name(temp_name);

        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, &self.path)
    }

    fn encode(&self, profile: &ConnectionProfile) -> Result<StoredProfile, StoreError> {
        let password = profile
            .password
            .as_ref()
            .map(|secret| self.cipher.encrypt(secret.expose()))
            .transpose()
            .map_err(|source| StoreError::Secret {
                profile: profile.name.clone(),
                source,
            })?;

        Ok(StoredProfile {
            kind: profile.kind,
            project_id: profile.project_id.clone(),
            endpoint: profile.endpoint.clone(),
            credentials_path: profile.credentials_path.clone(),
            host: profile.host.clone(),
            port: profile.port,
            database: profile.database.clone(),
            username: profile.username.clone(),
            password,
            max_pool_size: profile.pool.max_pool_size,
            min_idle: profile.pool.min_idle,
            connect_timeout_ms: profile
                .pool
                .connect_timeout
                .map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
        })
    }

    fn decode(&self, name: String, stored: StoredProfile) -> Result<ConnectionProfile, StoreError> {
        let password = stored
            .password
            .as_deref()
            .map(|value| self.cipher.decrypt(value))
            .transpose()
            .map_err(|source| StoreError::Secret {
                profile: name.clone(),
                source,
            })?
            .map(Secret::new);

        let mut profile = ConnectionProfile::new(name, stored.kind);
        profile.project_id = stored.project_id;
        profile.endpoint = stored.endpoint;
        profile.credentials_path = stored.credentials_path;
        profile.host = stored.host;
        profile.port = stored.port;
        profile.database = stored.database;
        profile.username = stored.username;
        profile.password = password;
        profile.pool = PoolSettings {
            max_pool_size: stored.max_pool_size,
            min_idle: stored.min_idle,
            connect_timeout: stored.connect_timeout_ms.map(Duration::from_millis),
        };
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::{ProfileStore, StoreError};
    use crate::model::profile::{BackendKind, ConnectionProfile};
    use crate::registry::secret::SecretCipher;
    use std::fs;
    use std::time::Duration;

    fn store_in(dir: &tempfile::TempDir) -> ProfileStore {
        ProfileStore::new(dir.path().join("profiles.json"), SecretCipher::builtin())
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = store_in(&dir).load().unwrap();
        assert!(loaded.profiles.is_empty());
        assert_eq!(loaded.active, None);
    }

    #[test]
    fn password_is_encrypted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let profile =
            ConnectionProfile::relational("Local", BackendKind::MySql, "localhost", 3306, "empdb")
                .with_credentials("root", "pw-123");
        store.save(&[profile], Some("Local")).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"password\": \"ENC:"));
        assert!(!raw.contains("pw-123"));
        assert!(!dir.path().join("profiles.json.tmp").exists());
    }

    #[test]
    fn legacy_plaintext_password_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"{"version":1,"profiles":{"Old":{"kind":"postgres","host":"db","port":5432,"database":"w","password":"plain"}}}"#,
        )
        .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(
            loaded.profiles[0].password.as_ref().map(|p| p.expose().to_string()),
            Some("plain".to_string())
        );
    }

    #[test]
    fn oversized_connect_timeout_saturates() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut profile =
            ConnectionProfile::relational("Slow", BackendKind::Postgres, "db", 5432, "w");
        profile.pool.connect_timeout = Some(Duration::MAX);
        store.save(&[profile], None).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains(&format!("\"connect_timeout_ms\": {}", u64::MAX)));
        let loaded = store.load().unwrap();
        assert_eq!(
            loaded.profiles[0].pool.connect_timeout,
            Some(Duration::from_millis(u64::MAX))
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Json(_))));
    }

    #[test]
    fn dangling_active_marker_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .save(&[ConnectionProfile::embedded("embedded", None)], Some("gone"))
            .unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.active, None);
        assert!(!loaded.profiles[0].active);
    }
}
