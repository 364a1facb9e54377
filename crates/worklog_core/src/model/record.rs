//! Employee and work-record entities.
//!
//! # Responsibility
//! - Define the two record shapes persisted by every backend.
//! - Declare the validation seam consulted before every repository write.
//!
//! # Invariants
//! - `id` is a stable UUID string and never reused.
//! - `WorkRecord::employee_id` always references an existing employee.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RecordId = String;

/// Largest value representable by the `DECIMAL(12,2)` payment column.
pub const MAX_PAYMENT: f64 = 9_999_999_999.99;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: RecordId,
    pub name: String,
    pub birth_place: Option<String>,
    pub birth_date: NaiveDate,
    pub mother_name: Option<String>,
    /// Unique across employees.
    pub tax_number: String,
    /// Unique across employees.
    pub social_security_number: String,
    pub address: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Employee {
    /// Creates an employee with a generated ID and `created_at = now`.
    pub fn new(
        name: impl Into<String>,
        birth_date: NaiveDate,
        tax_number: impl Into<String>,
        social_security_number: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            birth_place: None,
            birth_date,
            mother_name: None,
            tax_number: tax_number.into(),
            social_security_number: social_security_number.into(),
            address: None,
            created_at: now_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRecord {
    pub id: RecordId,
    pub employee_id: RecordId,
    pub notification_date: NaiveDate,
    pub notification_time: NaiveTime,
    pub ebev_serial_number: String,
    pub work_date: NaiveDate,
    /// Stored with two decimal places.
    pub payment: f64,
    pub hours_worked: i32,
    pub created_at: NaiveDateTime,
}

impl WorkRecord {
    /// Creates a work record for `employee_id` with a generated ID.
    ///
    /// Notification date/time default to the current moment.
    pub fn new(
        employee_id: impl Into<RecordId>,
        work_date: NaiveDate,
        ebev_serial_number: impl Into<String>,
        payment: f64,
        hours_worked: i32,
    ) -> Self {
        let now = now_seconds();
        Self {
            id: Uuid::new_v4().to_string(),
            employee_id: employee_id.into(),
            notification_date: now.date(),
            notification_time: now.time(),
            ebev_serial_number: ebev_serial_number.into(),
            work_date,
            payment,
            hours_worked,
            created_at: now,
        }
    }
}

/// Entity validation predicates supplied by the application.
///
/// Repositories reject writes for which these return `false`.
pub trait RecordValidator: Send + Sync {
    fn is_valid_employee(&self, employee: &Employee) -> bool;
    fn is_valid_work_record(&self, record: &WorkRecord) -> bool;
}

/// Structural checks only: identity fields present, amounts in range.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicRecordValidator;

impl RecordValidator for BasicRecordValidator {
    fn is_valid_employee(&self, employee: &Employee) -> bool {
        [
            employee.id.as_str(),
            employee.name.as_str(),
            employee.tax_number.as_str(),
            employee.social_security_number.as_str(),
        ]
        .iter()
        .all(|value| !value.trim().is_empty())
    }

    fn is_valid_work_record(&self, record: &WorkRecord) -> bool {
        !record.id.trim().is_empty()
            && !record.employee_id.trim().is_empty()
            && !record.ebev_serial_number.trim().is_empty()
            && record.payment.is_finite()
            && (0.0..=MAX_PAYMENT).contains(&record.payment)
            && record.hours_worked >= 0
    }
}

fn now_seconds() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::{BasicRecordValidator, Employee, RecordValidator, WorkRecord};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn basic_validator_requires_identity_fields() {
        let validator = BasicRecordValidator;
        let employee = Employee::new("Ada", date(1990, 1, 2), "TX-1", "SSN-1");
        assert!(validator.is_valid_employee(&employee));

        let mut blank_tax = employee;
        blank_tax.tax_number = " ".to_string();
        assert!(!validator.is_valid_employee(&blank_tax));
    }

    #[test]
    fn basic_validator_rejects_negative_or_oversized_amounts() {
        let validator = BasicRecordValidator;
        let record = WorkRecord::new("emp-1", date(2024, 3, 1), "EBEV-1", 120.5, 8);
        assert!(validator.is_valid_work_record(&record));

        let mut negative_hours = record.clone();
        negative_hours.hours_worked = -1;
        assert!(!validator.is_valid_work_record(&negative_hours));

        let mut huge_payment = record;
        huge_payment.payment = 1e12;
        assert!(!validator.is_valid_work_record(&huge_payment));
    }
}
