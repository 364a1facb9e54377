//! Runtime configuration for the connection manager.
//!
//! # Responsibility
//! - Resolve default file locations under the per-user data directory.
//! - Apply `WORKLOG_*` environment overrides.
//!
//! # Invariants
//! - Unparseable overrides are logged and ignored; defaults stay in effect.
//! - Timeouts are never zero.

use log::warn;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PROFILES_ENV: &str = "WORKLOG_PROFILES";
pub const PROBE_TIMEOUT_ENV: &str = "WORKLOG_PROBE_TIMEOUT_MS";
pub const VERIFY_TIMEOUT_ENV: &str = "WORKLOG_VERIFY_TIMEOUT_MS";
pub const LOG_LEVEL_ENV: &str = "WORKLOG_LOG_LEVEL";
pub const LOG_DIR_ENV: &str = "WORKLOG_LOG_DIR";

const APP_DIR_NAME: &str = "worklog";
const PROFILES_FILE_NAME: &str = "connections.json";
const LOG_DIR_NAME: &str = "logs";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_WORKER_THREADS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub profiles_path: PathBuf,
    pub probe_timeout: Duration,
    pub verify_timeout: Duration,
    pub worker_threads: usize,
    /// Seed the in-memory embedded profile when no profiles are saved.
    pub bootstrap_defaults: bool,
    pub log_level: String,
    pub log_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME);
        Self::in_dir(base)
    }
}

impl CoreConfig {
    /// Defaults with every file placed under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            profiles_path: dir.join(PROFILES_FILE_NAME),
            probe_timeout: DEFAULT_TIMEOUT,
            verify_timeout: DEFAULT_TIMEOUT,
            worker_threads: DEFAULT_WORKER_THREADS,
            bootstrap_defaults: true,
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: dir.join(LOG_DIR_NAME),
        }
    }

    /// Defaults plus overrides read from the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Applies overrides from `lookup`, keyed by the `WORKLOG_*` names.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(path) = read(PROFILES_ENV) {
            self.profiles_path = PathBuf::from(path);
        }
        if let Some(timeout) = read(PROBE_TIMEOUT_ENV).and_then(|raw| parse_millis(PROBE_TIMEOUT_ENV, &raw)) {
            self.probe_timeout = timeout;
        }
        if let Some(timeout) = read(VERIFY_TIMEOUT_ENV).and_then(|raw| parse_millis(VERIFY_TIMEOUT_ENV, &raw)) {
            self.verify_timeout = timeout;
        }
        if let Some(level) = read(LOG_LEVEL_ENV) {
            self.log_level = level;
        }
        if let Some(dir) = read(LOG_DIR_ENV) {
            self.log_dir = PathBuf::from(dir);
        }
    }
}

fn parse_millis(key: &str, raw: &str) -> Option<Duration> {
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => {
            warn!("event=config_override module=config status=error key={key} error_code=invalid_millis");
            None
        }
        Ok(millis) => Some(Duration::from_millis(millis)),
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreConfig, LOG_LEVEL_ENV, PROBE_TIMEOUT_ENV, PROFILES_ENV, VERIFY_TIMEOUT_ENV};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn in_dir_places_files_under_directory() {
        let config = CoreConfig::in_dir("/var/lib/worklog");
        assert_eq!(config.profiles_path, PathBuf::from("/var/lib/worklog/connections.json"));
        assert_eq!(config.log_dir, PathBuf::from("/var/lib/worklog/logs"));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.worker_threads, 2);
        assert!(config.bootstrap_defaults);
    }

    #[test]
    fn overrides_replace_valid_values_and_skip_invalid_ones() {
        let env: HashMap<&str, &str> = HashMap::from([
            (PROFILES_ENV, "/tmp/profiles.json"),
            (PROBE_TIMEOUT_ENV, "250"),
            (VERIFY_TIMEOUT_ENV, "soon"),
            (LOG_LEVEL_ENV, "  "),
        ]);
        let mut config = CoreConfig::in_dir("/data");
        config.apply_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.profiles_path, PathBuf::from("/tmp/profiles.json"));
        assert_eq!(config.probe_timeout, Duration::from_millis(250));
        assert_eq!(config.verify_timeout, Duration::from_secs(5));
        assert_eq!(config.log_level, CoreConfig::in_dir("/data").log_level);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = CoreConfig::in_dir("/data");
        config.apply_overrides(|key| (key == PROBE_TIMEOUT_ENV).then(|| "0".to_string()));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
    }
}
