//! Parameter binding for Postgres queries.

use crate::models::SqlValue;
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Json(v) => query.bind(Json(v)),
        SqlValue::Timestamp(v) => query.bind(*v),
        SqlValue::Uuid(v) => query.bind(*v),
    }
}

/// Build a query with every parameter bound in order.
pub(crate) fn bind_all<'q>(
    sql: &'q str,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    params.iter().fold(sqlx::query(sql), bind_postgres_param)
}
