//! Runs against real servers; start them and set `WORKLOG_TEST_*` first.

use chrono::NaiveDate;
use std::env;
use std::time::Duration;
use worklog_core::{
    BackendKind, ConnectionManager, ConnectionProfile, CoreConfig, Employee, Secret, SwitchState,
};

fn server_profile(name: &str, kind: BackendKind, prefix: &str, default_port: u16) -> ConnectionProfile {
    let var = |suffix: &str, fallback: &str| {
        env::var(format!("WORKLOG_TEST_{prefix}_{suffix}")).unwrap_or_else(|_| fallback.to_string())
    };
    ConnectionProfile::relational(
        name,
        kind,
        var("HOST", "127.0.0.1"),
        var("PORT", &default_port.to_string()).parse().unwrap(),
        var("DATABASE", "worklog_test"),
    )
    .with_credentials(var("USER", "worklog"), Secret::new(var("PASSWORD", "worklog")))
}

fn exercise(profile: ConnectionProfile) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CoreConfig::in_dir(dir.path());
    config.bootstrap_defaults = false;
    config.probe_timeout = Duration::from_secs(5);
    let manager = ConnectionManager::open(&config).unwrap();
    let name = profile.name.clone();
    manager.registry().add(profile).unwrap();

    assert!(manager.test_connection(&manager.registry().get(&name).unwrap()));
    manager.activate(&name).unwrap();
    assert_eq!(manager.switch_state(), SwitchState::Committed);

    let employees = manager.employees().unwrap();
    let employee = Employee::new(
        "Live Test",
        NaiveDate::from_ymd_opt(1980, 5, 17).unwrap(),
        format!("TX-{}", uuid::Uuid::new_v4()),
        format!("SSN-{}", uuid::Uuid::new_v4()),
    );
    employees.create(&employee).unwrap();
    assert_eq!(employees.find_by_id(&employee.id).unwrap(), Some(employee.clone()));
    assert!(employees.delete(&employee.id).unwrap());

    manager.shutdown().unwrap();
}

#[test]
#[ignore = "requires database"]
fn mysql_activation_provisions_and_serves_repositories() {
    exercise(server_profile("mysql-live", BackendKind::MySql, "MYSQL", 3306));
}

#[test]
#[ignore = "requires database"]
fn postgres_activation_provisions_and_serves_repositories() {
    exercise(server_profile("postgres-live", BackendKind::Postgres, "POSTGRES", 5432));
}
