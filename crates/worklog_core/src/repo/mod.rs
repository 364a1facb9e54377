//! Repository contracts for employees and work records.
//!
//! # Responsibility
//! - Define backend-neutral data access contracts.
//! - Provide SQL and document-store implementations of both contracts.
//! - Build the repository pair for a live backend.
//!
//! # Invariants
//! - Writes consult the injected `RecordValidator` before touching storage.
//! - Work-record writes resolve the referenced employee first.
//! - Both repositories of a pair report the same `binding()`.

use crate::backend::document::DocumentError;
use crate::backend::{LiveBackend, LiveConnection};
use crate::db::DbError;
use crate::model::profile::CacheKey;
use crate::model::record::{Employee, RecordValidator, WorkRecord};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub mod document_repo;
pub mod sql_repo;

use document_repo::{DocumentEmployeeRepository, DocumentWorkRecordRepository};
use sql_repo::{SqlEmployeeRepository, SqlWorkRecordRepository};

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    /// The validator rejected the entity.
    Validation { entity: &'static str, id: String },
    Db(DbError),
    Document(DocumentError),
    NotFound { entity: &'static str, id: String },
    Duplicate {
        entity: &'static str,
        field: &'static str,
        value: String,
    },
    MissingEmployee(String),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation { entity, id } => write!(f, "{entity} `{id}` failed validation"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Document(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Duplicate {
                entity,
                field,
                value,
            } => write!(f, "{entity} with {field} `{value}` already exists"),
            Self::MissingEmployee(id) => write!(f, "referenced employee does not exist: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Document(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<DocumentError> for RepoError {
    fn from(value: DocumentError) -> Self {
        Self::Document(value)
    }
}

pub trait EmployeeRepository: Send + Sync {
    /// Inserts a new employee; tax and social security numbers must be unused.
    fn create(&self, employee: &Employee) -> RepoResult<()>;
    /// Replaces every field of an existing employee.
    fn update(&self, employee: &Employee) -> RepoResult<()>;
    fn find_by_id(&self, id: &str) -> RepoResult<Option<Employee>>;
    /// All employees ordered by name.
    fn find_all(&self) -> RepoResult<Vec<Employee>>;
    fn find_by_tax_number(&self, tax_number: &str) -> RepoResult<Option<Employee>>;
    /// Deletes the employee and its work records. Returns whether it existed.
    fn delete(&self, id: &str) -> RepoResult<bool>;
    fn count(&self) -> RepoResult<u64>;
    /// Profile this repository is bound to.
    fn binding(&self) -> &CacheKey;
}

pub trait WorkRecordRepository: Send + Sync {
    fn create(&self, record: &WorkRecord) -> RepoResult<()>;
    fn update(&self, record: &WorkRecord) -> RepoResult<()>;
    fn find_by_id(&self, id: &str) -> RepoResult<Option<WorkRecord>>;
    /// Records of one employee ordered by work date.
    fn find_by_employee(&self, employee_id: &str) -> RepoResult<Vec<WorkRecord>>;
    /// Records whose work date lies in `from..=to`, ordered by work date.
    fn find_by_work_date_range(&self, from: NaiveDate, to: NaiveDate) -> RepoResult<Vec<WorkRecord>>;
    fn delete(&self, id: &str) -> RepoResult<bool>;
    fn count(&self) -> RepoResult<u64>;
    /// A record joined with the employee it references.
    fn find_with_employee(&self, id: &str) -> RepoResult<Option<(WorkRecord, Employee)>>;
    fn binding(&self) -> &CacheKey;
}

/// Both repositories for one live backend, handed out together.
#[derive(Clone)]
pub struct RepositoryPair {
    pub employees: Arc<dyn EmployeeRepository>,
    pub work_records: Arc<dyn WorkRecordRepository>,
}

impl RepositoryPair {
    /// Builds the pair for `backend`, wiring work records to the employee repository.
    pub fn for_backend(backend: &LiveBackend, validator: Arc<dyn RecordValidator>) -> Self {
        let binding = backend.key().clone();
        match backend.connection() {
            LiveConnection::Relational(executor) => {
                let employees: Arc<dyn EmployeeRepository> = Arc::new(SqlEmployeeRepository::new(
                    Arc::clone(executor),
                    Arc::clone(&validator),
                    binding.clone(),
                ));
                let work_records = Arc::new(SqlWorkRecordRepository::new(
                    Arc::clone(executor),
                    Arc::clone(&employees),
                    validator,
                    binding,
                ));
                Self {
                    employees,
                    work_records,
                }
            }
            LiveConnection::Document { client, .. } => {
                let employees: Arc<dyn EmployeeRepository> = Arc::new(DocumentEmployeeRepository::new(
                    Arc::clone(client),
                    Arc::clone(&validator),
                    binding.clone(),
                ));
                let work_records = Arc::new(DocumentWorkRecordRepository::new(
                    Arc::clone(client),
                    Arc::clone(&employees),
                    validator,
                    binding,
                ));
                Self {
                    employees,
                    work_records,
                }
            }
        }
    }

    /// Binding shared by both repositories, `None` if they disagree.
    pub fn binding(&self) -> Option<&CacheKey> {
        let key = self.employees.binding();
        (key == self.work_records.binding()).then_some(key)
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn format_date(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub(crate) fn format_time(value: NaiveTime) -> String {
    value.format(TIME_FORMAT).to_string()
}

pub(crate) fn format_timestamp(value: NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_date(field: &str, raw: &str) -> RepoResult<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, DATE_FORMAT).map_err(|_| invalid(field, raw))
}

pub(crate) fn parse_time(field: &str, raw: &str) -> RepoResult<NaiveTime> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| invalid(field, raw))
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, an ISO `T` separator, fractional seconds
/// and a trailing `Z`.
pub(crate) fn parse_timestamp(field: &str, raw: &str) -> RepoResult<NaiveDateTime> {
    let normalized = raw.trim().trim_end_matches('Z').replacen('T', " ", 1);
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f").map_err(|_| invalid(field, raw))
}

fn invalid(field: &str, raw: &str) -> RepoError {
    RepoError::InvalidData(format!("{field} has unexpected value `{raw}`"))
}

#[cfg(test)]
mod tests {
    use super::{parse_date, parse_time, parse_timestamp};

    #[test]
    fn timestamps_from_every_backend_parse() {
        for raw in [
            "2024-03-01 10:15:30",
            "2024-03-01T10:15:30Z",
            "2024-03-01 10:15:30.250",
            "2024-03-01T10:15:30.000000Z",
        ] {
            let parsed = parse_timestamp("created_at", raw).unwrap();
            assert_eq!(parsed.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-03-01 10:15:30");
        }
    }

    #[test]
    fn dates_and_times_tolerate_backend_rendering() {
        assert_eq!(parse_date("d", "2024-03-01 00:00:00").unwrap().to_string(), "2024-03-01");
        assert_eq!(parse_time("t", "08:30:00.000").unwrap().to_string(), "08:30:00");
        assert!(parse_date("d", "yesterday").is_err());
    }
}
