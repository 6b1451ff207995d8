//! DDL statements: schemas, tables, hypertables and indexes.
//!
//! DDL is never parameterized, so every function returns plain SQL text.

use super::{TableRef, validate_identifier};
use crate::error::{DbError, DbResult};

/// `CREATE SCHEMA [IF NOT EXISTS] <name>;`
pub fn create_schema(name: &str, if_not_exists: bool) -> DbResult<String> {
    validate_identifier("schema_name", name)?;
    Ok(format!(
        "CREATE SCHEMA {}{};",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        name
    ))
}

/// Multi-line `CREATE TABLE` listing `columns` then `constraints` verbatim.
///
/// Column and constraint fragments (`"id SERIAL PRIMARY KEY"`,
/// `"PRIMARY KEY (time, device_id)"`) are caller-trusted and never reordered.
pub fn create_table<C, K>(
    schema: &str,
    table: &str,
    columns: &[C],
    constraints: &[K],
) -> DbResult<String>
where
    C: AsRef<str>,
    K: AsRef<str>,
{
    let qualified = TableRef::qualified(schema, table).render()?;
    if columns.is_empty() {
        return Err(DbError::validation(
            "columns",
            "a table needs at least one column",
        ));
    }

    let mut lines = Vec::with_capacity(columns.len() + constraints.len());
    for (field, fragment) in columns
        .iter()
        .map(|c| ("columns", c.as_ref()))
        .chain(constraints.iter().map(|c| ("constraints", c.as_ref())))
    {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Err(DbError::validation(field, "fragment must not be empty"));
        }
        lines.push(format!("    {}", fragment));
    }

    Ok(format!(
        "CREATE TABLE {} (\n{}\n);",
        qualified,
        lines.join(",\n")
    ))
}

/// `SELECT create_hypertable(...)` for a TimescaleDB hypertable.
///
/// `interval` is rendered as an interval literal (`interval '1 day'`), not a
/// bound parameter.
pub fn create_hypertable(
    schema: &str,
    table: &str,
    time_column: &str,
    interval: Option<&str>,
    if_not_exists: bool,
) -> DbResult<String> {
    let qualified = TableRef::qualified(schema, table).render()?;
    validate_identifier("time_column", time_column)?;

    let mut sql = format!(
        "SELECT create_hypertable('{}', '{}', if_not_exists => {}",
        qualified,
        time_column,
        if if_not_exists { "TRUE" } else { "FALSE" }
    );
    if let Some(interval) = interval {
        let interval = interval.trim();
        if interval.is_empty() {
            return Err(DbError::validation("interval", "interval must not be empty"));
        }
        if interval.contains('\'') || interval.contains('\\') {
            return Err(DbError::validation(
                "interval",
                format!("interval '{}' contains a quote or backslash", interval),
            ));
        }
        sql.push_str(&format!(", chunk_time_interval => interval '{}'", interval));
    }
    sql.push_str(");");
    Ok(sql)
}

/// `CREATE [UNIQUE] INDEX <name> ON <schema>.<table> [USING <method>] (<columns>);`
pub fn create_index<C: AsRef<str>>(
    schema: &str,
    table: &str,
    index_name: &str,
    columns: &[C],
    method: Option<&str>,
    unique: bool,
) -> DbResult<String> {
    let qualified = TableRef::qualified(schema, table).render()?;
    validate_identifier("index_name", index_name)?;
    if columns.is_empty() {
        return Err(DbError::validation(
            "columns",
            "an index needs at least one column",
        ));
    }
    if columns.iter().any(|c| c.as_ref().trim().is_empty()) {
        return Err(DbError::validation("columns", "column must not be empty"));
    }

    let using = match method {
        Some(method) => {
            validate_identifier("method", method)?;
            format!("USING {} ", method)
        }
        None => String::new(),
    };
    let columns: Vec<&str> = columns.iter().map(|c| c.as_ref().trim()).collect();

    Ok(format!(
        "CREATE {}INDEX {} ON {} {}({});",
        if unique { "UNIQUE " } else { "" },
        index_name,
        qualified,
        using,
        columns.join(", ")
    ))
}

/// `DROP TABLE [IF EXISTS] <schema>.<table> CASCADE;`
pub fn drop_table(schema: &str, table: &str, if_exists: bool) -> DbResult<String> {
    let qualified = TableRef::qualified(schema, table).render()?;
    Ok(format!(
        "DROP TABLE {}{} CASCADE;",
        if if_exists { "IF EXISTS " } else { "" },
        qualified
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_CONSTRAINTS: &[&str] = &[];

    #[test]
    fn test_create_schema() {
        assert_eq!(
            create_schema("metrics", true).unwrap(),
            "CREATE SCHEMA IF NOT EXISTS metrics;"
        );
        assert_eq!(
            create_schema("metrics", false).unwrap(),
            "CREATE SCHEMA metrics;"
        );
        assert!(create_schema("", true).is_err());
    }

    #[test]
    fn test_create_table_preserves_order() {
        let sql = create_table(
            "public",
            "metrics",
            &["time TIMESTAMPTZ", "device_id VARCHAR(50)", "value DOUBLE PRECISION"],
            &["PRIMARY KEY (time, device_id)"],
        )
        .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE public.metrics (\n    time TIMESTAMPTZ,\n    device_id VARCHAR(50),\n    value DOUBLE PRECISION,\n    PRIMARY KEY (time, device_id)\n);"
        );
    }

    #[test]
    fn test_create_table_keeps_duplicates_verbatim() {
        let sql = create_table("s", "t", &["a INT", "a INT"], NO_CONSTRAINTS).unwrap();
        assert_eq!(sql.matches("a INT").count(), 2);
    }

    #[test]
    fn test_create_table_rejects_empty() {
        let empty: &[&str] = &[];
        assert_eq!(
            create_table("s", "t", empty, NO_CONSTRAINTS)
                .unwrap_err()
                .field(),
            Some("columns")
        );
        assert_eq!(
            create_table("s", "t", &["a INT"], &[" "]).unwrap_err().field(),
            Some("constraints")
        );
    }

    #[test]
    fn test_create_hypertable() {
        assert_eq!(
            create_hypertable("public", "metrics", "time", None, true).unwrap(),
            "SELECT create_hypertable('public.metrics', 'time', if_not_exists => TRUE);"
        );
        let sql = create_hypertable("public", "metrics", "time", Some("1 day"), false).unwrap();
        assert_eq!(
            sql,
            "SELECT create_hypertable('public.metrics', 'time', if_not_exists => FALSE, chunk_time_interval => interval '1 day');"
        );
    }

    #[test]
    fn test_create_hypertable_rejects_quoted_interval() {
        let err = create_hypertable("s", "t", "time", Some("1 day'); DROP TABLE x; --"), true)
            .unwrap_err();
        assert_eq!(err.field(), Some("interval"));
    }

    #[test]
    fn test_create_index() {
        assert_eq!(
            create_index("metrics", "obs", "idx_obs_t", &["t"], None, false).unwrap(),
            "CREATE INDEX idx_obs_t ON metrics.obs (t);"
        );
        assert_eq!(
            create_index("s", "t", "ux", &["a", "b DESC"], Some("btree"), true).unwrap(),
            "CREATE UNIQUE INDEX ux ON s.t USING btree (a, b DESC);"
        );
        assert_eq!(
            create_index("s", "t", "bad name", &["a"], None, false)
                .unwrap_err()
                .field(),
            Some("index_name")
        );
    }

    #[test]
    fn test_drop_table() {
        assert_eq!(
            drop_table("s", "t", true).unwrap(),
            "DROP TABLE IF EXISTS s.t CASCADE;"
        );
        assert_eq!(drop_table("s", "t", false).unwrap(), "DROP TABLE s.t CASCADE;");
    }
}
