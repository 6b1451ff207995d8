//! Statements derived from a [`SchemaDescriptor`].

use super::{Placeholders, Statement, TableRef, ddl, dml, validate_identifier};
use crate::error::{DbError, DbResult};
use crate::models::{SchemaDescriptor, SqlValue};
use tracing::debug;

/// Table setup for a descriptor: schema, table, hypertable and time index.
#[derive(Debug, Clone)]
pub struct TablePlan<'a> {
    descriptor: &'a SchemaDescriptor,
    chunk_interval: Option<String>,
}

impl<'a> TablePlan<'a> {
    pub fn new(descriptor: &'a SchemaDescriptor) -> Self {
        Self {
            descriptor,
            chunk_interval: None,
        }
    }

    /// Chunk interval for the hypertable, e.g. `"1 day"`.
    pub fn chunk_interval(mut self, interval: impl Into<String>) -> Self {
        self.chunk_interval = Some(interval.into());
        self
    }

    pub fn descriptor(&self) -> &SchemaDescriptor {
        self.descriptor
    }

    /// Name of the secondary time index, `idx_<table>_<time>`.
    pub fn time_index_name(&self) -> Option<String> {
        self.descriptor
            .time_index()
            .map(|time| format!("idx_{}_{}", self.descriptor.table_name(), time))
    }

    /// DDL statements in execution order.
    ///
    /// The secondary time index is only emitted when there is a primary key
    /// that does not already cover the time column; TimescaleDB indexes the
    /// time column of a hypertable on its own otherwise.
    pub fn statements(&self) -> DbResult<Vec<String>> {
        let d = self.descriptor;
        let schema = d.schema_name();
        let table = d.table_name();

        let mut statements = vec![ddl::create_schema(schema, true)?];

        let columns = d
            .columns()
            .map(|(name, ty)| {
                validate_identifier("column_types", name)?;
                Ok(if d.is_required(name) {
                    format!("{} {} NOT NULL", name, ty)
                } else {
                    format!("{} {}", name, ty)
                })
            })
            .collect::<DbResult<Vec<String>>>()?;
        let constraints: Vec<String> = d
            .primary_keys()
            .map(|keys| {
                vec![format!(
                    "CONSTRAINT pk_{} PRIMARY KEY ({})",
                    table,
                    keys.join(", ")
                )]
            })
            .unwrap_or_default();
        statements.push(ddl::create_table(schema, table, &columns, &constraints)?);

        if let Some(time) = d.time_index() {
            statements.push(ddl::create_hypertable(
                schema,
                table,
                time,
                self.chunk_interval.as_deref(),
                true,
            )?);

            let covered = d
                .primary_keys()
                .is_none_or(|keys| keys.iter().any(|k| k == time));
            if !covered {
                let index_name = format!("idx_{}_{}", table, time);
                statements.push(ddl::create_index(
                    schema,
                    table,
                    &index_name,
                    &[time],
                    None,
                    false,
                )?);
            }
        }

        debug!(
            table = %d.qualified_name(),
            count = statements.len(),
            "Planned table statements"
        );
        Ok(statements)
    }
}

/// INSERT into the descriptor's table, rejecting columns it does not declare.
pub fn insert_for<I, K, V>(
    descriptor: &SchemaDescriptor,
    values: I,
    returning: Option<&str>,
) -> DbResult<Statement>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<SqlValue>,
{
    let values = values
        .into_iter()
        .map(|(column, value)| {
            let column = column.into();
            if !descriptor.has_column(&column) {
                return Err(DbError::validation(
                    "values",
                    format!(
                        "column '{}' is not declared on {}",
                        column,
                        descriptor.qualified_name()
                    ),
                ));
            }
            Ok((column, value.into()))
        })
        .collect::<DbResult<Vec<(String, SqlValue)>>>()?;
    dml::insert(descriptor, values, returning)
}

/// Newest-first SELECT over a time range.
///
/// `start`/`end` are bound as parameters against the time index (requires
/// one); `filters` add `column = $n` terms and must name declared columns.
pub fn time_range_select(
    descriptor: &SchemaDescriptor,
    start: Option<SqlValue>,
    end: Option<SqlValue>,
    filters: &[(&str, SqlValue)],
    limit: Option<u64>,
) -> DbResult<Statement> {
    let time = descriptor.time_index();
    if time.is_none() && (start.is_some() || end.is_some()) {
        return Err(DbError::validation(
            "time_index",
            format!(
                "{} has no time index to filter on",
                descriptor.qualified_name()
            ),
        ));
    }

    let mut placeholders = Placeholders::new();
    let mut conditions = Vec::new();
    if let Some(time) = time {
        if let Some(start) = start {
            conditions.push(format!("{} >= {}", time, placeholders.bind(start)));
        }
        if let Some(end) = end {
            conditions.push(format!("{} <= {}", time, placeholders.bind(end)));
        }
    }
    for (column, value) in filters {
        validate_identifier("filters", column)?;
        if !descriptor.has_column(column) {
            return Err(DbError::validation(
                "filters",
                format!(
                    "column '{}' is not declared on {}",
                    column,
                    descriptor.qualified_name()
                ),
            ));
        }
        conditions.push(format!("{} = {}", column, placeholders.bind(value.clone())));
    }

    let filter = conditions.join(" AND ");
    let order_by = time.map(|t| format!("{} DESC", t));
    let (sql, _) = dml::select(
        TableRef::from(descriptor),
        &[] as &[&str],
        Some(filter.as_str()),
        order_by.as_deref(),
        limit,
    )?
    .into_parts();
    Ok(Statement::new(sql, placeholders.into_params()))
}
