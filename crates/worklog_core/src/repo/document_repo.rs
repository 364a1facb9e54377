//! Document-store repositories over the `employees` and `work_records`
//! collections.
//!
//! Dates are stored as ISO strings so range filters compare correctly;
//! ordering is applied client-side to avoid composite index requirements.

use super::{
    format_date, format_time, parse_date, parse_time, parse_timestamp, EmployeeRepository,
    RepoError, RepoResult, WorkRecordRepository,
};
use crate::backend::document::{
    Document, DocumentClient, DocumentError, FieldFilter, FieldValue, Fields, FilterOp,
};
use crate::backend::{EMPLOYEE_COLLECTION, WORK_RECORD_COLLECTION};
use crate::model::profile::CacheKey;
use crate::model::record::{Employee, RecordValidator, WorkRecord};
use chrono::{NaiveDate, NaiveDateTime};
use log::info;
use std::sync::Arc;

fn rfc3339(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn text(document: &Document, field: &str) -> RepoResult<String> {
    document
        .field(field)
        .and_then(FieldValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(document, field))
}

fn optional_text(document: &Document, field: &str) -> Option<String> {
    document
        .field(field)
        .and_then(FieldValue::as_str)
        .map(str::to_string)
}

fn missing(document: &Document, field: &str) -> RepoError {
    RepoError::InvalidData(format!("document `{}` lacks `{field}`", document.id()))
}

fn employee_fields(employee: &Employee) -> Fields {
    Fields::from([
        ("name".to_string(), FieldValue::string(&employee.name)),
        (
            "birth_place".to_string(),
            FieldValue::optional_string(employee.birth_place.as_deref()),
        ),
        ("birth_date".to_string(), FieldValue::string(format_date(employee.birth_date))),
        (
            "mother_name".to_string(),
            FieldValue::optional_string(employee.mother_name.as_deref()),
        ),
        ("tax_number".to_string(), FieldValue::string(&employee.tax_number)),
        (
            "social_security_number".to_string(),
            FieldValue::string(&employee.social_security_number),
        ),
        (
            "address".to_string(),
            FieldValue::optional_string(employee.address.as_deref()),
        ),
        (
            "created_at".to_string(),
            FieldValue::TimestampValue(rfc3339(employee.created_at)),
        ),
    ])
}

fn decode_employee(document: &Document) -> RepoResult<Employee> {
    Ok(Employee {
        id: document.id().to_string(),
        name: text(document, "name")?,
        birth_place: optional_text(document, "birth_place"),
        birth_date: parse_date("birth_date", &text(document, "birth_date")?)?,
        mother_name: optional_text(document, "mother_name"),
        tax_number: text(document, "tax_number")?,
        social_security_number: text(document, "social_security_number")?,
        address: optional_text(document, "address"),
        created_at: parse_timestamp("created_at", &text(document, "created_at")?)?,
    })
}

fn work_record_fields(record: &WorkRecord) -> Fields {
    Fields::from([
        ("employee_id".to_string(), FieldValue::string(&record.employee_id)),
        (
            "notification_date".to_string(),
            FieldValue::string(format_date(record.notification_date)),
        ),
        (
            "notification_time".to_string(),
            FieldValue::string(format_time(record.notification_time)),
        ),
        (
            "ebev_serial_number".to_string(),
            FieldValue::string(&record.ebev_serial_number),
        ),
        ("work_date".to_string(), FieldValue::string(format_date(record.work_date))),
        (
            "payment".to_string(),
            FieldValue::DoubleValue((record.payment * 100.0).round() / 100.0),
        ),
        (
            "hours_worked".to_string(),
            FieldValue::integer(i64::from(record.hours_worked)),
        ),
        (
            "created_at".to_string(),
            FieldValue::TimestampValue(rfc3339(record.created_at)),
        ),
    ])
}

fn decode_work_record(document: &Document) -> RepoResult<WorkRecord> {
    let payment = document
        .field("payment")
        .and_then(FieldValue::as_f64)
        .ok_or_else(|| missing(document, "payment"))?;
    let hours_worked = document
        .field("hours_worked")
        .and_then(FieldValue::as_i64)
        .and_then(|hours| i32::try_from(hours).ok())
        .ok_or_else(|| missing(document, "hours_worked"))?;

    Ok(WorkRecord {
        id: document.id().to_string(),
        employee_id: text(document, "employee_id")?,
        notification_date: parse_date("notification_date", &text(document, "notification_date")?)?,
        notification_time: parse_time("notification_time", &text(document, "notification_time")?)?,
        ebev_serial_number: text(document, "ebev_serial_number")?,
        work_date: parse_date("work_date", &text(document, "work_date")?)?,
        payment,
        hours_worked,
        created_at: parse_timestamp("created_at", &text(document, "created_at")?)?,
    })
}

fn decode_all<T>(
    documents: Vec<Document>,
    decode: fn(&Document) -> RepoResult<T>,
) -> RepoResult<Vec<T>> {
    documents.iter().map(decode).collect()
}

pub struct DocumentEmployeeRepository {
    client: Arc<DocumentClient>,
    validator: Arc<dyn RecordValidator>,
    binding: CacheKey,
}

impl DocumentEmployeeRepository {
    pub fn new(
        client: Arc<DocumentClient>,
        validator: Arc<dyn RecordValidator>,
        binding: CacheKey,
    ) -> Self {
        Self {
            client,
            validator,
            binding,
        }
    }

    fn find_one_by(&self, field: &str, value: &str) -> RepoResult<Option<Employee>> {
        let filter = FieldFilter::new(field, FilterOp::Equal, FieldValue::string(value));
        self.client
            .run_query(EMPLOYEE_COLLECTION, &[filter], None)?
            .first()
            .map(decode_employee)
            .transpose()
    }

    fn check_write(&self, employee: &Employee) -> RepoResult<()> {
        if !self.validator.is_valid_employee(employee) {
            return Err(RepoError::Validation {
                entity: "employee",
                id: employee.id.clone(),
            });
        }
        for (field, value) in [
            ("tax_number", employee.tax_number.as_str()),
            ("social_security_number", employee.social_security_number.as_str()),
        ] {
            if let Some(existing) = self.find_one_by(field, value)? {
                if existing.id != employee.id {
                    return Err(RepoError::Duplicate {
                        entity: "employee",
                        field,
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl EmployeeRepository for DocumentEmployeeRepository {
    fn create(&self, employee: &Employee) -> RepoResult<()> {
        self.check_write(employee)?;
        match self
            .client
            .create(EMPLOYEE_COLLECTION, &employee.id, employee_fields(employee))
        {
            Ok(_) => Ok(()),
            Err(DocumentError::AlreadyExists(_)) => Err(RepoError::Duplicate {
                entity: "employee",
                field: "id",
                value: employee.id.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn update(&self, employee: &Employee) -> RepoResult<()> {
        self.check_write(employee)?;
        if self
            .client
            .update(EMPLOYEE_COLLECTION, &employee.id, employee_fields(employee))?
        {
            return Ok(());
        }
        Err(RepoError::NotFound {
            entity: "employee",
            id: employee.id.clone(),
        })
    }

    fn find_by_id(&self, id: &str) -> RepoResult<Option<Employee>> {
        self.client
            .get(EMPLOYEE_COLLECTION, id)?
            .as_ref()
            .map(decode_employee)
            .transpose()
    }

    fn find_all(&self) -> RepoResult<Vec<Employee>> {
        let mut employees = decode_all(self.client.list(EMPLOYEE_COLLECTION)?, decode_employee)?;
        employees.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(employees)
    }

    fn find_by_tax_number(&self, tax_number: &str) -> RepoResult<Option<Employee>> {
        self.find_one_by("tax_number", tax_number)
    }

    fn delete(&self, id: &str) -> RepoResult<bool> {
        let filter = FieldFilter::new("employee_id", FilterOp::Equal, FieldValue::string(id));
        let records = self.client.run_query(WORK_RECORD_COLLECTION, &[filter], None)?;
        for record in &records {
            self.client.delete(WORK_RECORD_COLLECTION, record.id())?;
        }
        let existed = self.client.delete(EMPLOYEE_COLLECTION, id)?;
        if existed {
            info!(
                "event=employee_delete module=repo status=ok backend=document cascaded={}",
                records.len()
            );
        }
        Ok(existed)
    }

    fn count(&self) -> RepoResult<u64> {
        Ok(self.client.list(EMPLOYEE_COLLECTION)?.len() as u64)
    }

    fn binding(&self) -> &CacheKey {
        &self.binding
    }
}

pub struct DocumentWorkRecordRepository {
    client: Arc<DocumentClient>,
    employees: Arc<dyn EmployeeRepository>,
    validator: Arc<dyn RecordValidator>,
    binding: CacheKey,
}

impl DocumentWorkRecordRepository {
    pub fn new(
        client: Arc<DocumentClient>,
        employees: Arc<dyn EmployeeRepository>,
        validator: Arc<dyn RecordValidator>,
        binding: CacheKey,
    ) -> Self {
        Self {
            client,
            employees,
            validator,
            binding,
        }
    }

    fn check_write(&self, record: &WorkRecord) -> RepoResult<()> {
        if !self.validator.is_valid_work_record(record) {
            return Err(RepoError::Validation {
                entity: "work record",
                id: record.id.clone(),
            });
        }
        if self.employees.find_by_id(&record.employee_id)?.is_none() {
            return Err(RepoError::MissingEmployee(record.employee_id.clone()));
        }
        Ok(())
    }

    fn query_sorted(&self, filters: &[FieldFilter]) -> RepoResult<Vec<WorkRecord>> {
        let documents = self.client.run_query(WORK_RECORD_COLLECTION, filters, None)?;
        let mut records = decode_all(documents, decode_work_record)?;
        records.sort_by(|a, b| a.work_date.cmp(&b.work_date).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}

impl WorkRecordRepository for DocumentWorkRecordRepository {
    fn create(&self, record: &WorkRecord) -> RepoResult<()> {
        self.check_write(record)?;
        match self
            .client
            .create(WORK_RECORD_COLLECTION, &record.id, work_record_fields(record))
        {
            Ok(_) => Ok(()),
            Err(DocumentError::AlreadyExists(_)) => Err(RepoError::Duplicate {
                entity: "work record",
                field: "id",
                value: record.id.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn update(&self, record: &WorkRecord) -> RepoResult<()> {
        self.check_write(record)?;
        if self
            .client
            .update(WORK_RECORD_COLLECTION, &record.id, work_record_fields(record))?
        {
            return Ok(());
        }
        Err(RepoError::NotFound {
            entity: "work record",
            id: record.id.clone(),
        })
    }

    fn find_by_id(&self, id: &str) -> RepoResult<Option<WorkRecord>> {
        self.client
            .get(WORK_RECORD_COLLECTION, id)?
            .as_ref()
            .map(decode_work_record)
            .transpose()
    }

    fn find_by_employee(&self, employee_id: &str) -> RepoResult<Vec<WorkRecord>> {
        self.query_sorted(&[FieldFilter::new(
            "employee_id",
            FilterOp::Equal,
            FieldValue::string(employee_id),
        )])
    }

    fn find_by_work_date_range(&self, from: NaiveDate, to: NaiveDate) -> RepoResult<Vec<WorkRecord>> {
        if from > to {
            return Ok(Vec::new());
        }
        self.query_sorted(&[
            FieldFilter::new(
                "work_date",
                FilterOp::GreaterOrEqual,
                FieldValue::string(format_date(from)),
            ),
            FieldFilter::new(
                "work_date",
                FilterOp::LessOrEqual,
                FieldValue::string(format_date(to)),
            ),
        ])
    }

    fn delete(&self, id: &str) -> RepoResult<bool> {
        Ok(self.client.delete(WORK_RECORD_COLLECTION, id)?)
    }

    fn count(&self) -> RepoResult<u64> {
        Ok(self.client.list(WORK_RECORD_COLLECTION)?.len() as u64)
    }

    fn find_with_employee(&self, id: &str) -> RepoResult<Option<(WorkRecord, Employee)>> {
        let Some(record) = self.find_by_id(id)? else {
            return Ok(None);
        };
        match self.employees.find_by_id(&record.employee_id)? {
            Some(employee) => Ok(Some((record, employee))),
            None => Err(RepoError::MissingEmployee(record.employee_id)),
        }
    }

    fn binding(&self) -> &CacheKey {
        &self.binding
    }
}
