use std::fs;
use std::path::Path;
use worklog_core::registry::secret::SecretCipher;
use worklog_core::registry::store::ProfileStore;
use worklog_core::{
    BackendKind, ConnectionManager, ConnectionProfile, ConnectionRegistry, CoreConfig, Persistence,
    RegistryError, Secret,
};

fn store_at(path: &Path) -> ProfileStore {
    ProfileStore::new(path, SecretCipher::from_passphrase("registry-test-key"))
}

fn mysql(name: &str) -> ConnectionProfile {
    ConnectionProfile::relational(name, BackendKind::MySql, "db.internal", 3306, "worklog")
        .with_credentials("app", Secret::new("s3cret-pass"))
}

#[test]
fn save_and_reload_roundtrip_with_encrypted_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("connections.json");

    let registry = ConnectionRegistry::load(store_at(&path)).unwrap();
    assert_eq!(registry.add(mysql("office")).unwrap(), Persistence::Saved);
    registry
        .add(ConnectionProfile::embedded("local", Some(dir.path().join("local.db"))))
        .unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("s3cret-pass"));
    assert!(raw.contains("ENC:"));

    let reloaded = ConnectionRegistry::load(store_at(&path)).unwrap();
    assert_eq!(reloaded.names(), vec!["office".to_string(), "local".to_string()]);
    let office = reloaded.get("office").unwrap();
    assert_eq!(office.password.as_ref().map(Secret::expose), Some("s3cret-pass"));
    assert_eq!(office.port, Some(3306));
    assert!(reloaded.active().is_none());
}

#[test]
fn duplicate_names_and_malformed_profiles_are_rejected() {
    let registry = ConnectionRegistry::in_memory();
    registry.add(mysql("office")).unwrap();

    assert!(matches!(
        registry.add(mysql("office")),
        Err(RegistryError::DuplicateName(name)) if name == "office"
    ));
    let missing_host = ConnectionProfile::new("broken", BackendKind::Postgres);
    assert!(matches!(
        registry.add(missing_host),
        Err(RegistryError::Validation(_))
    ));
    assert_eq!(registry.names(), vec!["office".to_string()]);
}

#[test]
fn active_profile_survives_restart_and_cannot_be_removed() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CoreConfig::in_dir(dir.path());
    config.bootstrap_defaults = false;

    {
        let manager = ConnectionManager::open(&config).unwrap();
        manager
            .registry()
            .add(ConnectionProfile::embedded("local", Some(dir.path().join("local.db"))))
            .unwrap();
        manager.registry().add(mysql("office")).unwrap();
        manager.activate("local").unwrap();

        assert!(matches!(
            manager.registry().remove("local"),
            Err(RegistryError::ActiveProfile(name)) if name == "local"
        ));
        manager.registry().remove("office").unwrap();
        manager.shutdown().unwrap();
    }

    let reopened = ConnectionManager::open(&config).unwrap();
    let active: Vec<String> = reopened
        .registry()
        .list()
        .into_iter()
        .filter(|profile| profile.active)
        .map(|profile| profile.name)
        .collect();
    assert_eq!(active, vec!["local".to_string()]);
    assert_eq!(reopened.registry().names(), vec!["local".to_string()]);
}

#[test]
fn bootstrap_seeds_embedded_profile_on_first_open() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig::in_dir(dir.path());

    let manager = ConnectionManager::open(&config).unwrap();
    let profiles = manager.registry().list();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].kind, BackendKind::Embedded);
    assert!(config.profiles_path.exists());
}

#[test]
fn unwritable_store_keeps_changes_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("connections.json");
    let registry = ConnectionRegistry::load(store_at(&path)).unwrap();
    fs::create_dir(&path).unwrap();

    let persistence = registry.add(mysql("office")).unwrap();
    assert!(!persistence.is_saved());
    assert!(registry.contains("office"));
}
