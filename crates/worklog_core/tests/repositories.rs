use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use worklog_core::db::schema::provision;
use worklog_core::db::sqlite::SqliteExecutor;
use worklog_core::db::SqlExecutor;
use worklog_core::repo::sql_repo::{SqlEmployeeRepository, SqlWorkRecordRepository};
use worklog_core::{
    BackendKind, BasicRecordValidator, CacheKey, Employee, EmployeeRepository, RepoError,
    WorkRecord, WorkRecordRepository,
};

struct Fixture {
    employees: Arc<dyn EmployeeRepository>,
    records: SqlWorkRecordRepository,
}

fn fixture() -> Fixture {
    let executor: Arc<dyn SqlExecutor> =
        Arc::new(SqliteExecutor::open(None, Duration::from_secs(1)).unwrap());
    provision(executor.as_ref()).unwrap();
    let binding = CacheKey {
        kind: BackendKind::Embedded,
        name: "memory".to_string(),
    };
    let validator = Arc::new(BasicRecordValidator);
    let employees: Arc<dyn EmployeeRepository> = Arc::new(SqlEmployeeRepository::new(
        Arc::clone(&executor),
        validator.clone(),
        binding.clone(),
    ));
    let records = SqlWorkRecordRepository::new(executor, Arc::clone(&employees), validator, binding);
    Fixture { employees, records }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn employee(name: &str, tax: &str, ssn: &str) -> Employee {
    Employee::new(name, date(1990, 1, 1), tax, ssn)
}

#[test]
fn employee_roundtrip_and_lookup() {
    let fx = fixture();
    let mut ada = employee("Ada", "TX-1", "SSN-1");
    ada.birth_place = Some("London".to_string());
    ada.address = Some("12 St James's Sq".to_string());
    fx.employees.create(&ada).unwrap();

    assert_eq!(fx.employees.find_by_id(&ada.id).unwrap(), Some(ada.clone()));
    assert_eq!(fx.employees.find_by_tax_number("TX-1").unwrap(), Some(ada.clone()));
    assert!(fx.employees.find_by_tax_number("TX-404").unwrap().is_none());

    ada.name = "Ada King".to_string();
    fx.employees.update(&ada).unwrap();
    assert_eq!(fx.employees.find_by_id(&ada.id).unwrap().unwrap().name, "Ada King");
}

#[test]
fn find_all_orders_by_name() {
    let fx = fixture();
    fx.employees.create(&employee("Zed", "TX-2", "SSN-2")).unwrap();
    fx.employees.create(&employee("Ada", "TX-1", "SSN-1")).unwrap();

    let names: Vec<String> = fx
        .employees
        .find_all()
        .unwrap()
        .into_iter()
        .map(|employee| employee.name)
        .collect();
    assert_eq!(names, vec!["Ada".to_string(), "Zed".to_string()]);
    assert_eq!(fx.employees.count().unwrap(), 2);
}

#[test]
fn duplicate_identifiers_are_rejected() {
    let fx = fixture();
    fx.employees.create(&employee("Ada", "TX-1", "SSN-1")).unwrap();

    let err = fx.employees.create(&employee("Bob", "TX-1", "SSN-2")).unwrap_err();
    assert!(matches!(err, RepoError::Duplicate { field: "tax_number", .. }));
    let err = fx.employees.create(&employee("Bob", "TX-2", "SSN-1")).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Duplicate {
            field: "social_security_number",
            ..
        }
    ));
}

#[test]
fn validator_and_missing_rows_are_reported() {
    let fx = fixture();
    let blank = employee("  ", "TX-1", "SSN-1");
    assert!(matches!(
        fx.employees.create(&blank),
        Err(RepoError::Validation { entity: "employee", .. })
    ));

    let ghost = employee("Ghost", "TX-9", "SSN-9");
    assert!(matches!(
        fx.employees.update(&ghost),
        Err(RepoError::NotFound { entity: "employee", .. })
    ));
    assert!(!fx.employees.delete(&ghost.id).unwrap());
}

#[test]
fn work_records_require_existing_employee() {
    let fx = fixture();
    let record = WorkRecord::new("no-such-employee", date(2024, 3, 1), "EBEV-1", 100.0, 8);
    assert!(matches!(
        fx.records.create(&record),
        Err(RepoError::MissingEmployee(id)) if id == "no-such-employee"
    ));

    let negative = WorkRecord::new("no-such-employee", date(2024, 3, 1), "EBEV-1", -1.0, 8);
    assert!(matches!(
        fx.records.create(&negative),
        Err(RepoError::Validation { .. })
    ));
}

#[test]
fn work_record_queries_and_join() {
    let fx = fixture();
    let ada = employee("Ada", "TX-1", "SSN-1");
    fx.employees.create(&ada).unwrap();

    let march = WorkRecord::new(ada.id.clone(), date(2024, 3, 5), "EBEV-3", 150.5, 6);
    let january = WorkRecord::new(ada.id.clone(), date(2024, 1, 10), "EBEV-1", 99.99, 8);
    let june = WorkRecord::new(ada.id.clone(), date(2024, 6, 1), "EBEV-6", 10.0, 1);
    for record in [&march, &january, &june] {
        fx.records.create(record).unwrap();
    }

    let dates: Vec<NaiveDate> = fx
        .records
        .find_by_employee(&ada.id)
        .unwrap()
        .into_iter()
        .map(|record| record.work_date)
        .collect();
    assert_eq!(dates, vec![date(2024, 1, 10), date(2024, 3, 5), date(2024, 6, 1)]);

    let in_range = fx
        .records
        .find_by_work_date_range(date(2024, 1, 10), date(2024, 3, 5))
        .unwrap();
    assert_eq!(in_range, vec![january.clone(), march.clone()]);

    let (record, owner) = fx.records.find_with_employee(&march.id).unwrap().unwrap();
    assert_eq!(record, march);
    assert_eq!(owner.id, ada.id);
    assert!(fx.records.find_with_employee("missing").unwrap().is_none());
}

#[test]
fn payment_is_stored_in_cents() {
    let fx = fixture();
    let ada = employee("Ada", "TX-1", "SSN-1");
    fx.employees.create(&ada).unwrap();
    let mut record = WorkRecord::new(ada.id.clone(), date(2024, 2, 2), "EBEV-2", 12.344, 4);
    fx.records.create(&record).unwrap();

    let stored = fx.records.find_by_id(&record.id).unwrap().unwrap();
    assert!((stored.payment - 12.34).abs() < 1e-9);

    record.payment = 20.0;
    record.hours_worked = 5;
    fx.records.update(&record).unwrap();
    let stored = fx.records.find_by_id(&record.id).unwrap().unwrap();
    assert_eq!(stored.hours_worked, 5);
    assert!((stored.payment - 20.0).abs() < 1e-9);
}

#[test]
fn deleting_employee_removes_their_records() {
    let fx = fixture();
    let ada = employee("Ada", "TX-1", "SSN-1");
    let bob = employee("Bob", "TX-2", "SSN-2");
    fx.employees.create(&ada).unwrap();
    fx.employees.create(&bob).unwrap();
    fx.records
        .create(&WorkRecord::new(ada.id.clone(), date(2024, 1, 1), "A-1", 1.0, 1))
        .unwrap();
    fx.records
        .create(&WorkRecord::new(bob.id.clone(), date(2024, 1, 1), "B-1", 1.0, 1))
        .unwrap();

    assert!(fx.employees.delete(&ada.id).unwrap());
    assert_eq!(fx.records.count().unwrap(), 1);
    assert!(fx.records.find_by_employee(&ada.id).unwrap().is_empty());
}
