//! Parameterized DML: SELECT, INSERT, UPDATE and DELETE.
//!
//! Values are bound as `$n` placeholders numbered from 1 in clause order.
//! Column names in value lists are validated identifiers; WHERE, ORDER BY,
//! RETURNING and select-list fragments are inserted verbatim.

use super::{BuilderWarning, Placeholders, Statement, TableRef, clause, validate_identifier};
use crate::error::{DbError, DbResult};
use crate::models::SqlValue;
use std::collections::HashSet;
use tracing::warn;

/// Collect `(column, value)` pairs, validating names and rejecting duplicates.
fn collect_values<I, K, V>(field: &str, values: I) -> DbResult<Vec<(String, SqlValue)>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<SqlValue>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (column, value) in values {
        let column = column.into();
        validate_identifier(field, &column)?;
        if !seen.insert(column.clone()) {
            return Err(DbError::validation(
                field,
                format!("column '{}' given more than once", column),
            ));
        }
        out.push((column, value.into()));
    }
    if out.is_empty() {
        return Err(DbError::validation(field, "at least one column value is required"));
    }
    Ok(out)
}

fn push_returning(sql: &mut String, returning: Option<&str>) {
    if let Some(returning) = clause(returning) {
        sql.push_str(" RETURNING ");
        sql.push_str(returning);
    }
}

/// `SELECT <columns|*> FROM <table> [WHERE ..] [ORDER BY ..] [LIMIT n];`
///
/// An empty `columns` slice selects `*`. The returned statement has no params.
pub fn select<'a, C: AsRef<str>>(
    table: impl Into<TableRef<'a>>,
    columns: &[C],
    filter: Option<&str>,
    order_by: Option<&str>,
    limit: Option<u64>,
) -> DbResult<Statement> {
    let table = table.into().render()?;
    if columns.iter().any(|c| c.as_ref().trim().is_empty()) {
        return Err(DbError::validation("columns", "column must not be empty"));
    }
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|c| c.as_ref().trim())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", projection, table);
    if let Some(filter) = clause(filter) {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    if let Some(order_by) = clause(order_by) {
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
    }
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    sql.push(';');
    Ok(Statement::raw(sql))
}

/// `INSERT INTO <table> (cols) VALUES ($1, ..) [RETURNING ..];`
pub fn insert<'a, I, K, V>(
    table: impl Into<TableRef<'a>>,
    values: I,
    returning: Option<&str>,
) -> DbResult<Statement>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<SqlValue>,
{
    let table = table.into().render()?;
    let values = collect_values("values", values)?;

    let mut placeholders = Placeholders::new();
    let mut columns = Vec::with_capacity(values.len());
    let mut slots = Vec::with_capacity(values.len());
    for (column, value) in values {
        columns.push(column);
        slots.push(placeholders.bind(value));
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        slots.join(", ")
    );
    push_returning(&mut sql, returning);
    sql.push(';');
    Ok(Statement::new(sql, placeholders.into_params()))
}

/// Multi-row INSERT. Every row must carry the same set of columns; the first
/// row fixes the column order and params are laid out row-major.
pub fn insert_many<'a, R, I, K, V>(
    table: impl Into<TableRef<'a>>,
    rows: R,
    returning: Option<&str>,
) -> DbResult<Statement>
where
    R: IntoIterator<Item = I>,
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<SqlValue>,
{
    let table = table.into().render()?;
    let mut rows = rows.into_iter();
    let Some(first) = rows.next() else {
        return Err(DbError::validation("values_list", "at least one row is required"));
    };
    let first = collect_values("values_list", first)?;
    let columns: Vec<String> = first.iter().map(|(c, _)| c.clone()).collect();

    let mut placeholders = Placeholders::new();
    let mut tuples = Vec::new();
    let mut bind_row = |row: Vec<(String, SqlValue)>| {
        let slots: Vec<String> = row.into_iter().map(|(_, v)| placeholders.bind(v)).collect();
        tuples.push(format!("({})", slots.join(", ")));
    };
    bind_row(first);

    for (index, row) in rows.enumerate() {
        let mut row = collect_values("values_list", row)?;
        if row.len() != columns.len() {
            return Err(DbError::validation(
                "values_list",
                format!(
                    "row {} has {} columns, expected {}",
                    index + 1,
                    row.len(),
                    columns.len()
                ),
            ));
        }
        let mut ordered = Vec::with_capacity(columns.len());
        for column in &columns {
            let Some(pos) = row.iter().position(|(c, _)| c == column) else {
                return Err(DbError::validation(
                    "values_list",
                    format!("row {} is missing column '{}'", index + 1, column),
                ));
            };
            ordered.push(row.swap_remove(pos));
        }
        bind_row(ordered);
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        tuples.join(", ")
    );
    push_returning(&mut sql, returning);
    sql.push(';');
    Ok(Statement::new(sql, placeholders.into_params()))
}

/// `UPDATE <table> SET a = $1, .. [WHERE ..] [RETURNING ..];`
///
/// Without a filter the statement is still built, carrying
/// [`BuilderWarning::UnboundedUpdate`].
pub fn update<'a, I, K, V>(
    table: impl Into<TableRef<'a>>,
    values: I,
    filter: Option<&str>,
    returning: Option<&str>,
) -> DbResult<Statement>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<SqlValue>,
{
    let table = table.into().render()?;
    let values = collect_values("values", values)?;

    let mut placeholders = Placeholders::new();
    let assignments: Vec<String> = values
        .into_iter()
        .map(|(column, value)| format!("{} = {}", column, placeholders.bind(value)))
        .collect();

    let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
    let filter = clause(filter);
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    push_returning(&mut sql, returning);
    sql.push(';');

    let statement = Statement::new(sql, placeholders.into_params());
    if filter.is_none() {
        let warning = BuilderWarning::UnboundedUpdate;
        warn!(table = %table, "{}", warning);
        return Ok(statement.with_warning(warning));
    }
    Ok(statement)
}

/// `DELETE FROM <table> [WHERE ..] [RETURNING ..];`
///
/// Without a filter the statement carries [`BuilderWarning::UnboundedDelete`].
pub fn delete<'a>(
    table: impl Into<TableRef<'a>>,
    filter: Option<&str>,
    returning: Option<&str>,
) -> DbResult<Statement> {
    let table = table.into().render()?;

    let mut sql = format!("DELETE FROM {}", table);
    let filter = clause(filter);
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    push_returning(&mut sql, returning);
    sql.push(';');

    let statement = Statement::raw(sql);
    if filter.is_none() {
        let warning = BuilderWarning::UnboundedDelete;
        warn!(table = %table, "{}", warning);
        return Ok(statement.with_warning(warning));
    }
    Ok(statement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_values;

    const ALL: &[&str] = &[];

    #[test]
    fn test_select_all() {
        let stmt = select("test_table", ALL, None, None, None).unwrap();
        assert_eq!(stmt.sql(), "SELECT * FROM test_table;");
        assert!(stmt.params().is_empty());
    }

    #[test]
    fn test_select_full() {
        let stmt = select(
            TableRef::qualified("shop", "products"),
            &["id", "name", "price", "category"],
            Some("price > 50 AND category = 'electronics'"),
            Some("price ASC"),
            Some(5),
        )
        .unwrap();
        assert_eq!(
            stmt.sql(),
            "SELECT id, name, price, category FROM shop.products WHERE price > 50 AND category = 'electronics' ORDER BY price ASC LIMIT 5;"
        );
    }

    #[test]
    fn test_select_blank_filter_is_omitted() {
        let stmt = select("t", ALL, Some("  "), None, None).unwrap();
        assert_eq!(stmt.sql(), "SELECT * FROM t;");
    }

    #[test]
    fn test_insert() {
        let stmt = insert("products", sql_values! { "name" => "Widget", "price" => 9.99 }, None)
            .unwrap();
        assert_eq!(stmt.sql(), "INSERT INTO products (name, price) VALUES ($1, $2);");
        assert_eq!(
            stmt.params(),
            &[SqlValue::Text("Widget".into()), SqlValue::Float(9.99)]
        );

        let stmt = insert(
            "products",
            sql_values! { "name" => "Widget", "price" => 9.99 },
            Some("id"),
        )
        .unwrap();
        assert_eq!(
            stmt.sql(),
            "INSERT INTO products (name, price) VALUES ($1, $2) RETURNING id;"
        );
    }

    #[test]
    fn test_insert_rejects_bad_columns() {
        let err = insert("t", sql_values! {}, None).unwrap_err();
        assert_eq!(err.field(), Some("values"));

        let err = insert("t", sql_values! { "a; --" => 1 }, None).unwrap_err();
        assert_eq!(err.field(), Some("values"));

        let err = insert("t", sql_values! { "a" => 1, "a" => 2 }, None).unwrap_err();
        assert_eq!(err.field(), Some("values"));
    }

    #[test]
    fn test_insert_many_row_major() {
        let rows = vec![
            sql_values! { "a" => 1, "b" => "x" },
            sql_values! { "b" => "y", "a" => 2 },
        ];
        let stmt = insert_many(TableRef::qualified("s", "t"), rows, Some("a")).unwrap();
        assert_eq!(
            stmt.sql(),
            "INSERT INTO s.t (a, b) VALUES ($1, $2), ($3, $4) RETURNING a;"
        );
        assert_eq!(
            stmt.params(),
            &[
                SqlValue::Int(1),
                SqlValue::Text("x".into()),
                SqlValue::Int(2),
                SqlValue::Text("y".into()),
            ]
        );
    }

    #[test]
    fn test_insert_many_rejects_mismatched_rows() {
        let empty: Vec<Vec<(String, SqlValue)>> = Vec::new();
        assert_eq!(
            insert_many("t", empty, None).unwrap_err().field(),
            Some("values_list")
        );

        let rows = vec![sql_values! { "a" => 1, "b" => 2 }, sql_values! { "a" => 3 }];
        assert_eq!(
            insert_many("t", rows, None).unwrap_err().field(),
            Some("values_list")
        );

        let rows = vec![sql_values! { "a" => 1, "b" => 2 }, sql_values! { "a" => 3, "c" => 4 }];
        assert!(insert_many("t", rows, None).is_err());
    }

    #[test]
    fn test_update() {
        let stmt = update(
            "products",
            sql_values! { "price" => 19.99, "stock" => 50 },
            Some("id = 3"),
            Some("id, price, stock"),
        )
        .unwrap();
        assert_eq!(
            stmt.sql(),
            "UPDATE products SET price = $1, stock = $2 WHERE id = 3 RETURNING id, price, stock;"
        );
        assert_eq!(stmt.params(), &[SqlValue::Float(19.99), SqlValue::Int(50)]);
        assert!(!stmt.has_warnings());
    }

    #[test]
    fn test_update_without_filter_warns() {
        let stmt = update("orders", sql_values! { "status" => "archived" }, None, None).unwrap();
        assert_eq!(stmt.sql(), "UPDATE orders SET status = $1;");
        assert_eq!(stmt.warnings(), &[BuilderWarning::UnboundedUpdate]);
    }

    #[test]
    fn test_delete() {
        let stmt = delete("temp_logs", None, None).unwrap();
        assert_eq!(stmt.sql(), "DELETE FROM temp_logs;");
        assert_eq!(stmt.warnings(), &[BuilderWarning::UnboundedDelete]);

        let stmt = delete(
            "orders",
            Some("status = 'cancelled'"),
            Some("id, customer_id"),
        )
        .unwrap();
        assert_eq!(
            stmt.sql(),
            "DELETE FROM orders WHERE status = 'cancelled' RETURNING id, customer_id;"
        );
        assert!(stmt.params().is_empty());
        assert!(!stmt.has_warnings());
    }
}
