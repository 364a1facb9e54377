//! SQL repositories shared by every relational dialect.
//!
//! # Invariants
//! - Every selected column is text-cast and decoded by `RowReader`.
//! - Parameters are numbered in the order they appear in each statement,
//!   which keeps positional (`?`) dialects correct.

use super::{
    format_date, format_time, format_timestamp, parse_date, parse_time, parse_timestamp,
    EmployeeRepository, RepoError, RepoResult, WorkRecordRepository,
};
use crate::db::{ColumnType, SqlDialect, SqlExecutor, SqlRow, SqlValue};
use crate::model::profile::CacheKey;
use crate::model::record::{Employee, RecordValidator, WorkRecord};
use chrono::NaiveDate;
use std::sync::Arc;

const EMPLOYEE_COLUMNS: [(&str, ColumnType); 9] = [
    ("id", ColumnType::Text),
    ("name", ColumnType::Text),
    ("birth_place", ColumnType::Text),
    ("birth_date", ColumnType::Date),
    ("mother_name", ColumnType::Text),
    ("tax_number", ColumnType::Text),
    ("social_security_number", ColumnType::Text),
    ("address", ColumnType::Text),
    ("created_at", ColumnType::Timestamp),
];

const WORK_RECORD_COLUMNS: [(&str, ColumnType); 9] = [
    ("id", ColumnType::Text),
    ("employee_id", ColumnType::Text),
    ("notification_date", ColumnType::Date),
    ("notification_time", ColumnType::Time),
    ("ebev_serial_number", ColumnType::Text),
    ("work_date", ColumnType::Date),
    ("payment", ColumnType::Decimal),
    ("hours_worked", ColumnType::Integer),
    ("created_at", ColumnType::Timestamp),
];

/// Pre-rendered statements for one dialect and table.
struct TableSql {
    select: String,
    insert: String,
    update: String,
    delete: String,
    count: String,
}

impl TableSql {
    fn new(dialect: SqlDialect, table: &str, columns: &[(&str, ColumnType)]) -> Self {
        let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
        let types: Vec<ColumnType> = columns.iter().map(|(_, ty)| *ty).collect();

        let select = format!("SELECT {} FROM {table}", dialect.text_columns(&names));
        let insert = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            names.join(", "),
            dialect.placeholders(1, &types)
        );
        // `id` is first in `columns`; it moves to the WHERE clause.
        let assignments = columns[1..]
            .iter()
            .enumerate()
            .map(|(offset, (name, ty))| format!("{name} = {}", dialect.placeholder(offset + 1, *ty)))
            .collect::<Vec<_>>()
            .join(", ");
        let update = format!(
            "UPDATE {table} SET {assignments} WHERE id = {}",
            dialect.placeholder(columns.len(), ColumnType::Text)
        );
        let delete = format!(
            "DELETE FROM {table} WHERE id = {}",
            dialect.placeholder(1, ColumnType::Text)
        );
        let count = format!("SELECT {} FROM {table}", dialect.text("COUNT(*)"));

        Self {
            select,
            insert,
            update,
            delete,
            count,
        }
    }

    fn select_where(&self, dialect: SqlDialect, column: &str) -> String {
        format!(
            "{} WHERE {column} = {}",
            self.select,
            dialect.placeholder(1, ColumnType::Text)
        )
    }
}

/// Moves `id` (first) behind the other values, matching `TableSql::update`.
fn update_params(mut insert_params: Vec<SqlValue>) -> Vec<SqlValue> {
    if !insert_params.is_empty() {
        let id = insert_params.remove(0);
        insert_params.push(id);
    }
    insert_params
}

fn count_rows(executor: &dyn SqlExecutor, sql: &str) -> RepoResult<u64> {
    let rows = executor.query(sql, &[])?;
    let raw = rows
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next().flatten())
        .unwrap_or_else(|| "0".to_string());
    raw.trim()
        .parse()
        .map_err(|_| RepoError::InvalidData(format!("count has unexpected value `{raw}`")))
}

/// Sequential decoder over one text row.
struct RowReader {
    cells: std::vec::IntoIter<Option<String>>,
}

impl RowReader {
    fn new(row: SqlRow) -> Self {
        Self {
            cells: row.into_iter(),
        }
    }

    fn optional(&mut self) -> Option<String> {
        self.cells.next().flatten()
    }

    fn required(&mut self, field: &str) -> RepoResult<String> {
        self.optional()
            .ok_or_else(|| RepoError::InvalidData(format!("{field} is NULL")))
    }

    fn date(&mut self, field: &str) -> RepoResult<NaiveDate> {
        parse_date(field, &self.required(field)?)
    }

    fn parsed<T: std::str::FromStr>(&mut self, field: &str) -> RepoResult<T> {
        let raw = self.required(field)?;
        raw.trim()
            .parse()
            .map_err(|_| RepoError::InvalidData(format!("{field} has unexpected value `{raw}`")))
    }
}

fn decode_employee(row: SqlRow) -> RepoResult<Employee> {
    let mut reader = RowReader::new(row);
    Ok(Employee {
        id: reader.required("id")?,
        name: reader.required("name")?,
        birth_place: reader.optional(),
        birth_date: reader.date("birth_date")?,
        mother_name: reader.optional(),
        tax_number: reader.required("tax_number")?,
        social_security_number: reader.required("social_security_number")?,
        address: reader.optional(),
        created_at: parse_timestamp("created_at", &reader.required("created_at")?)?,
    })
}

fn decode_work_record(row: SqlRow) -> RepoResult<WorkRecord> {
    let mut reader = RowReader::new(row);
    Ok(WorkRecord {
        id: reader.required("id")?,
        employee_id: reader.required("employee_id")?,
        notification_date: reader.date("notification_date")?,
        notification_time: parse_time("notification_time", &reader.required("notification_time")?)?,
        ebev_serial_number: reader.required("ebev_serial_number")?,
        work_date: reader.date("work_date")?,
        payment: reader.parsed("payment")?,
        hours_worked: reader.parsed("hours_worked")?,
        created_at: parse_timestamp("created_at", &reader.required("created_at")?)?,
    })
}

fn employee_params(employee: &Employee) -> Vec<SqlValue> {
    vec![
        SqlValue::from(employee.id.as_str()),
        SqlValue::from(employee.name.as_str()),
        SqlValue::from(employee.birth_place.clone()),
        SqlValue::from(format_date(employee.birth_date)),
        SqlValue::from(employee.mother_name.clone()),
        SqlValue::from(employee.tax_number.as_str()),
        SqlValue::from(employee.social_security_number.as_str()),
        SqlValue::from(employee.address.clone()),
        SqlValue::from(format_timestamp(employee.created_at)),
    ]
}

fn work_record_params(record: &WorkRecord) -> Vec<SqlValue> {
    vec![
        SqlValue::from(record.id.as_str()),
        SqlValue::from(record.employee_id.as_str()),
        SqlValue::from(format_date(record.notification_date)),
        SqlValue::from(format_time(record.notification_time)),
        SqlValue::from(record.ebev_serial_number.as_str()),
        SqlValue::from(format_date(record.work_date)),
        SqlValue::Real((record.payment * 100.0).round() / 100.0),
        SqlValue::from(record.hours_worked),
        SqlValue::from(format_timestamp(record.created_at)),
    ]
}

pub struct SqlEmployeeRepository {
    executor: Arc<dyn SqlExecutor>,
    validator: Arc<dyn RecordValidator>,
    binding: CacheKey,
    sql: TableSql,
    delete_work_records: String,
}

impl SqlEmployeeRepository {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        validator: Arc<dyn RecordValidator>,
        binding: CacheKey,
    ) -> Self {
        let dialect = executor.dialect();
        let delete_work_records = format!(
            "DELETE FROM work_records WHERE employee_id = {}",
            dialect.placeholder(1, ColumnType::Text)
        );
        Self {
            sql: TableSql::new(dialect, "employees", &EMPLOYEE_COLUMNS),
            executor,
            validator,
            binding,
            delete_work_records,
        }
    }

    fn find_one_by(&self, column: &str, value: &str) -> RepoResult<Option<Employee>> {
        let sql = self.sql.select_where(self.executor.dialect(), column);
        self.executor
            .query(&sql, &[SqlValue::from(value)])?
            .into_iter()
            .next()
            .map(decode_employee)
            .transpose()
    }

    fn check_validity(&self, employee: &Employee) -> RepoResult<()> {
        if self.validator.is_valid_employee(employee) {
            return Ok(());
        }
        Err(RepoError::Validation {
            entity: "employee",
            id: employee.id.clone(),
        })
    }

    /// Rejects identifiers already used by a different employee.
    fn check_unique(&self, employee: &Employee) -> RepoResult<()> {
        for (column, value) in [
            ("tax_number", employee.tax_number.as_str()),
            ("social_security_number", employee.social_security_number.as_str()),
        ] {
            if let Some(existing) = self.find_one_by(column, value)? {
                if existing.id != employee.id {
                    return Err(RepoError::Duplicate {
                        entity: "employee",
                        field: column,
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl EmployeeRepository for SqlEmployeeRepository {
    fn create(&self, employee: &Employee) -> RepoResult<()> {
        self.check_validity(employee)?;
        self.check_unique(employee)?;
        if self.find_by_id(&employee.id)?.is_some() {
            return Err(RepoError::Duplicate {
                entity: "employee",
                field: "id",
                value: employee.id.clone(),
            });
        }
        self.executor.execute(&self.sql.insert, &employee_params(employee))?;
        Ok(())
    }

    fn update(&self, employee: &Employee) -> RepoResult<()> {
        self.check_validity(employee)?;
        self.check_unique(employee)?;
        let changed = self
            .executor
            .execute(&self.sql.update, &update_params(employee_params(employee)))?;
        // MySQL reports 0 affected rows when nothing changed.
        if changed == 0 && self.find_by_id(&employee.id)?.is_none() {
            return Err(RepoError::NotFound {
                entity: "employee",
                id: employee.id.clone(),
            });
        }
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> RepoResult<Option<Employee>> {
        self.find_one_by("id", id)
    }

    fn find_all(&self) -> RepoResult<Vec<Employee>> {
        let sql = format!("{} ORDER BY name, id", self.sql.select);
        self.executor
            .query(&sql, &[])?
            .into_iter()
            .map(decode_employee)
            .collect()
    }

    fn find_by_tax_number(&self, tax_number: &str) -> RepoResult<Option<Employee>> {
        self.find_one_by("tax_number", tax_number)
    }

    fn delete(&self, id: &str) -> RepoResult<bool> {
        self.executor
            .execute(&self.delete_work_records, &[SqlValue::from(id)])?;
        let changed = self.executor.execute(&self.sql.delete, &[SqlValue::from(id)])?;
        Ok(changed > 0)
    }

    fn count(&self) -> RepoResult<u64> {
        count_rows(self.executor.as_ref(), &self.sql.count)
    }

    fn binding(&self) -> &CacheKey {
        &self.binding
    }
}

pub struct SqlWorkRecordRepository {
    executor: Arc<dyn SqlExecutor>,
    employees: Arc<dyn EmployeeRepository>,
    validator: Arc<dyn RecordValidator>,
    binding: CacheKey,
    sql: TableSql,
}

impl SqlWorkRecordRepository {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        employees: Arc<dyn EmployeeRepository>,
        validator: Arc<dyn RecordValidator>,
        binding: CacheKey,
    ) -> Self {
        let sql = TableSql::new(executor.dialect(), "work_records", &WORK_RECORD_COLUMNS);
        Self {
            executor,
            employees,
            validator,
            binding,
            sql,
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

    fn query_records(&self, sql: &str, params: &[SqlValue]) -> RepoResult<Vec<WorkRecord>> {
        self.executor
            .query(sql, params)?
            .into_iter()
            .map(decode_work_record)
            .collect()
    }
}

impl WorkRecordRepository for SqlWorkRecordRepository {
    fn create(&self, record: &WorkRecord) -> RepoResult<()> {
        self.check_write(record)?;
        if self.find_by_id(&record.id)?.is_some() {
            return Err(RepoError::Duplicate {
                entity: "work record",
                field: "id",
                value: record.id.clone(),
            });
        }
        self.executor.execute(&self.sql.insert, &work_record_params(record))?;
        Ok(())
    }

    fn update(&self, record: &WorkRecord) -> RepoResult<()> {
        self.check_write(record)?;
        let changed = self
            .executor
            .execute(&self.sql.update, &update_params(work_record_params(record)))?;
        if changed == 0 && self.find_by_id(&record.id)?.is_none() {
            return Err(RepoError::NotFound {
                entity: "work record",
                id: record.id.clone(),
            });
        }
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> RepoResult<Option<WorkRecord>> {
        let sql = self.sql.select_where(self.executor.dialect(), "id");
        Ok(self
            .query_records(&sql, &[SqlValue::from(id)])?
            .into_iter()
            .next())
    }

    fn find_by_employee(&self, employee_id: &str) -> RepoResult<Vec<WorkRecord>> {
        let sql = format!(
            "{} ORDER BY work_date, id",
            self.sql.select_where(self.executor.dialect(), "employee_id")
        );
        self.query_records(&sql, &[SqlValue::from(employee_id)])
    }

    fn find_by_work_date_range(&self, from: NaiveDate, to: NaiveDate) -> RepoResult<Vec<WorkRecord>> {
        let dialect = self.executor.dialect();
        let sql = format!(
            "{} WHERE work_date >= {} AND work_date <= {} ORDER BY work_date, id",
            self.sql.select,
            dialect.placeholder(1, ColumnType::Date),
            dialect.placeholder(2, ColumnType::Date)
        );
        self.query_records(
            &sql,
            &[SqlValue::from(format_date(from)), SqlValue::from(format_date(to))],
        )
    }

    fn delete(&self, id: &str) -> RepoResult<bool> {
        let changed = self.executor.execute(&self.sql.delete, &[SqlValue::from(id)])?;
        Ok(changed > 0)
    }

    fn count(&self) -> RepoResult<u64> {
        count_rows(self.executor.as_ref(), &self.sql.count)
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

#[cfg(test)]
mod tests {
    use super::{TableSql, EMPLOYEE_COLUMNS, WORK_RECORD_COLUMNS};
    use crate::db::SqlDialect;

    #[test]
    fn update_moves_id_to_the_last_placeholder() {
        let sql = TableSql::new(SqlDialect::Sqlite, "employees", &EMPLOYEE_COLUMNS);
        assert!(sql.update.starts_with("UPDATE employees SET name = ?1,"));
        assert!(sql.update.ends_with("WHERE id = ?9"));
    }

    #[test]
    fn postgres_statements_cast_typed_parameters() {
        let sql = TableSql::new(SqlDialect::Postgres, "work_records", &WORK_RECORD_COLUMNS);
        assert!(sql.insert.contains("CAST($3 AS DATE)"));
        assert!(sql.insert.contains("CAST($7 AS NUMERIC(12,2))"));
        assert!(sql.select.contains("CAST(payment AS TEXT)"));
    }

    #[test]
    fn mysql_statements_use_positional_markers() {
        let sql = TableSql::new(SqlDialect::MySql, "employees", &EMPLOYEE_COLUMNS);
        assert_eq!(sql.insert.matches('?').count(), 9);
        assert!(sql.select.contains("CAST(birth_date AS CHAR)"));
    }
}
