//! Per-dialect SQL syntax.
//!
//! The logical schema and queries are identical across dialects; only
//! placeholders, casts, DDL clauses and upsert syntax differ.

use crate::model::profile::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    MySql,
    Postgres,
    Sqlite,
}

/// Logical type of a bound parameter, used where a dialect needs casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Decimal,
    Date,
    Time,
    Timestamp,
}

impl SqlDialect {
    /// Dialect for relational kinds, `None` for the document store.
    pub fn for_kind(kind: BackendKind) -> Option<Self> {
        match kind {
            BackendKind::MySql => Some(Self::MySql),
            BackendKind::Postgres => Some(Self::Postgres),
            BackendKind::Embedded => Some(Self::Sqlite),
            BackendKind::DocumentStore => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Placeholder for the 1-based parameter `index`.
    ///
    /// MySQL binds positionally, so callers must number parameters in the
    /// order they appear in the statement.
    pub fn placeholder(self, index: usize, ty: ColumnType) -> String {
        match self {
            Self::MySql => "?".to_string(),
            Self::Sqlite => format!("?{index}"),
            Self::Postgres => match ty {
                ColumnType::Text => format!("${index}"),
                ColumnType::Integer => format!("CAST(${index} AS INTEGER)"),
                ColumnType::Decimal => format!("CAST(${index} AS NUMERIC(12,2))"),
                ColumnType::Date => format!("CAST(${index} AS DATE)"),
                ColumnType::Time => format!("CAST(${index} AS TIME)"),
                ColumnType::Timestamp => format!("CAST(${index} AS TIMESTAMP)"),
            },
        }
    }

    /// Comma-separated placeholders numbered from `first_index`.
    pub fn placeholders(self, first_index: usize, types: &[ColumnType]) -> String {
        types
            .iter()
            .enumerate()
            .map(|(offset, ty)| self.placeholder(first_index + offset, *ty))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Select expression rendering `expr` as text.
    pub fn text(self, expr: &str) -> String {
        match self {
            Self::MySql => format!("CAST({expr} AS CHAR)"),
            Self::Postgres | Self::Sqlite => format!("CAST({expr} AS TEXT)"),
        }
    }

    /// Text-cast select list for `columns`.
    pub fn text_columns(self, columns: &[&str]) -> String {
        columns
            .iter()
            .map(|column| self.text(column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Catalog query returning the names of tables visible to the connection.
    pub fn table_names_sql(self) -> &'static str {
        match self {
            Self::MySql => {
                "SELECT CAST(table_name AS CHAR) FROM information_schema.tables \
                 WHERE table_schema = DATABASE()"
            }
            Self::Postgres => {
                "SELECT CAST(table_name AS TEXT) FROM information_schema.tables \
                 WHERE table_schema = current_schema()"
            }
            Self::Sqlite => "SELECT CAST(name AS TEXT) FROM sqlite_master WHERE type = 'table'",
        }
    }

    /// DDL script creating every table and index with `IF NOT EXISTS`.
    pub fn schema_script(self) -> &'static str {
        match self {
            Self::MySql => include_str!("schema/mysql.sql"),
            Self::Postgres => include_str!("schema/postgres.sql"),
            Self::Sqlite => include_str!("schema/sqlite.sql"),
        }
    }

    /// Individual statements of `schema_script`, comments stripped.
    pub fn schema_statements(self) -> Vec<String> {
        split_statements(self.schema_script())
    }

    /// Idempotent upsert of one `database_info` property (key, value).
    pub fn upsert_property_sql(self) -> String {
        let key = self.placeholder(1, ColumnType::Text);
        let value = self.placeholder(2, ColumnType::Text);
        match self {
            Self::MySql => format!(
                "INSERT INTO database_info (property_key, property_value) VALUES ({key}, {value}) \
                 ON DUPLICATE KEY UPDATE property_value = VALUES(property_value), \
                 updated_at = CURRENT_TIMESTAMP"
            ),
            Self::Postgres | Self::Sqlite => format!(
                "INSERT INTO database_info (property_key, property_value) VALUES ({key}, {value}) \
                 ON CONFLICT (property_key) DO UPDATE SET property_value = EXCLUDED.property_value, \
                 updated_at = CURRENT_TIMESTAMP"
            ),
        }
    }
}

fn split_statements(script: &str) -> Vec<String> {
    let without_comments = script
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    without_comments
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{ColumnType, SqlDialect};

    #[test]
    fn placeholders_follow_dialect_conventions() {
        let types = [ColumnType::Text, ColumnType::Date];
        assert_eq!(SqlDialect::MySql.placeholders(1, &types), "?, ?");
        assert_eq!(SqlDialect::Sqlite.placeholders(3, &types), "?3, ?4");
        assert_eq!(
            SqlDialect::Postgres.placeholders(1, &types),
            "$1, CAST($2 AS DATE)"
        );
    }

    #[test]
    fn text_cast_differs_for_mysql() {
        assert_eq!(SqlDialect::MySql.text("payment"), "CAST(payment AS CHAR)");
        assert_eq!(SqlDialect::Postgres.text("payment"), "CAST(payment AS TEXT)");
    }

    #[test]
    fn every_schema_script_creates_the_three_tables() {
        for dialect in [SqlDialect::MySql, SqlDialect::Postgres, SqlDialect::Sqlite] {
            let statements = dialect.schema_statements();
            for table in ["employees", "work_records", "database_info"] {
                assert!(
                    statements.iter().any(|statement| statement
                        .starts_with(&format!("CREATE TABLE IF NOT EXISTS {table}"))),
                    "{} script is missing {table}",
                    dialect.name()
                );
            }
            assert!(statements
                .iter()
                .all(|statement| statement.contains("IF NOT EXISTS")));
        }
    }

    #[test]
    fn mysql_declares_indexes_inline() {
        let statements = SqlDialect::MySql.schema_statements();
        assert_eq!(statements.len(), 3);
        assert!(SqlDialect::Postgres.schema_statements().len() > 3);
    }
}
