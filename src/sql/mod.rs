//! Schema-aware SQL statement builder.
//!
//! Pure functions that turn a [`SchemaDescriptor`](crate::models::SchemaDescriptor)
//! or plain table arguments into SQL text plus an ordered parameter list:
//! - `ddl`: schemas, tables, hypertables, indexes
//! - `dml`: SELECT / INSERT / UPDATE / DELETE with `$n` placeholders
//! - `plan`: complete table setup derived from a descriptor
//!
//! # Trust boundary
//!
//! Identifiers (schema, table, index and column names) are validated.
//! `WHERE`, `ORDER BY`, `RETURNING`, select-list and column-definition
//! fragments are inserted verbatim; keeping them free of untrusted input is
//! the caller's responsibility. Values always travel as bound parameters.

pub mod ddl;
pub mod dml;
pub mod plan;

pub use ddl::{create_hypertable, create_index, create_schema, create_table, drop_table};
pub use dml::{delete, insert, insert_many, select, update};
pub use plan::{TablePlan, insert_for, time_range_select};

use crate::error::{DbError, DbResult};
use crate::models::{SchemaDescriptor, SqlValue};
use std::fmt;

/// Non-fatal condition detected while building a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderWarning {
    /// UPDATE without WHERE clause
    UnboundedUpdate,
    /// DELETE without WHERE clause
    UnboundedDelete,
}

impl BuilderWarning {
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::UnboundedUpdate => "UPDATE without WHERE",
            Self::UnboundedDelete => "DELETE without WHERE",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnboundedUpdate => "This will update all rows in the table",
            Self::UnboundedDelete => "This will delete all rows from the table",
        }
    }
}

impl fmt::Display for BuilderWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation_name(), self.reason())
    }
}

/// SQL text with its positional parameters.
///
/// `$i` in the text always corresponds to `params()[i - 1]`. Fields are
/// private so the two halves cannot be edited independently.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<SqlValue>,
    warnings: Vec<BuilderWarning>,
}

impl Statement {
    pub(crate) fn new(sql: String, params: Vec<SqlValue>) -> Self {
        Self {
            sql,
            params,
            warnings: Vec::new(),
        }
    }

    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql.into(), Vec::new())
    }

    pub(crate) fn with_warning(mut self, warning: BuilderWarning) -> Self {
        self.warnings.push(warning);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn warnings(&self) -> &[BuilderWarning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Allocates `$n` placeholders and records the bound value in the same step,
/// so numbering and parameter order come from a single pass.
#[derive(Debug, Default)]
pub(crate) struct Placeholders {
    params: Vec<SqlValue>,
}

impl Placeholders {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Bind `value` and return its placeholder.
    pub(crate) fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    pub(crate) fn into_params(self) -> Vec<SqlValue> {
        self.params
    }
}

/// A possibly schema-qualified table reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRef<'a> {
    schema: Option<&'a str>,
    table: &'a str,
}

impl<'a> TableRef<'a> {
    pub fn new(table: &'a str) -> Self {
        Self {
            schema: None,
            table,
        }
    }

    pub fn qualified(schema: &'a str, table: &'a str) -> Self {
        Self {
            schema: Some(schema),
            table,
        }
    }

    /// Qualify with `schema` when given.
    pub fn in_schema(mut self, schema: Option<&'a str>) -> Self {
        self.schema = schema;
        self
    }

    /// Validated `table` or `schema.table` text.
    pub(crate) fn render(&self) -> DbResult<String> {
        validate_identifier("table_name", self.table)?;
        match self.schema {
            Some(schema) => {
                validate_identifier("schema_name", schema)?;
                Ok(format!("{}.{}", schema, self.table))
            }
            None => Ok(self.table.to_string()),
        }
    }
}

impl<'a> From<&'a str> for TableRef<'a> {
    fn from(table: &'a str) -> Self {
        Self::new(table)
    }
}

impl<'a> From<&'a SchemaDescriptor> for TableRef<'a> {
    fn from(descriptor: &'a SchemaDescriptor) -> Self {
        Self::qualified(descriptor.schema_name(), descriptor.table_name())
    }
}

/// Check that `value` is a plain SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(field: &str, value: &str) -> DbResult<()> {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return Err(DbError::validation(field, "identifier must not be empty"));
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(DbError::validation(
            field,
            format!("identifier '{}' must start with a letter or underscore", value),
        ));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(DbError::validation(
            field,
            format!("identifier '{}' contains invalid character '{}'", value, bad),
        ));
    }
    Ok(())
}

/// Treat blank optional fragments as absent.
pub(crate) fn clause(fragment: Option<&str>) -> Option<&str> {
    fragment.map(str::trim).filter(|s| !s.is_empty())
}

/// Build an ordered `Vec<(String, SqlValue)>` of column values.
///
/// ```
/// use pgscope::sql_values;
/// let values = sql_values! { "name" => "Widget", "price" => 9.99 };
/// assert_eq!(values[0].0, "name");
/// ```
#[macro_export]
macro_rules! sql_values {
    () => {
        ::std::vec::Vec::<(::std::string::String, $crate::models::SqlValue)>::new()
    };
    ($($column:expr => $value:expr),+ $(,)?) => {
        ::std::vec![$(
            (::std::string::String::from($column), $crate::models::SqlValue::from($value))
        ),+]
    };
}
