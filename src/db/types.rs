//! Postgres row decoding.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Per-category decoders extract the value as JSON
//!
//! Decoding never fails a fetch: a value that cannot be read is logged and
//! reported as `null`.

use crate::models::Row;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for Postgres column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    Unknown,
}

/// Classify a Postgres type name (as reported by sqlx) into a category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    match type_name.to_ascii_lowercase().as_str() {
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "smallserial"
        | "serial" | "bigserial" | "oid" => TypeCategory::Integer,
        "float4" | "float8" | "real" | "double precision" | "float" => TypeCategory::Float,
        "numeric" | "decimal" => TypeCategory::Decimal,
        "bool" | "boolean" => TypeCategory::Boolean,
        "text" | "varchar" | "character varying" | "bpchar" | "char" | "name" | "citext" => {
            TypeCategory::Text
        }
        "bytea" => TypeCategory::Binary,
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "timestamptz" | "timestamp with time zone" => TypeCategory::TimestampTz,
        "timestamp" | "timestamp without time zone" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        "time" | "time without time zone" => TypeCategory::Time,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw NUMERIC value as the server's text representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Base64 text for binary column data.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    JsonValue::String(STANDARD.encode(bytes))
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> Row;

    /// Decode a single column by position.
    fn column_json(&self, idx: usize) -> JsonValue;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> Row {
        self.columns()
            .iter()
            .map(|col| (col.name().to_string(), self.column_json(col.ordinal())))
            .collect()
    }

    fn column_json(&self, idx: usize) -> JsonValue {
        let Some(col) = self.columns().get(idx) else {
            return JsonValue::Null;
        };
        let type_name = col.type_info().name();
        decode_column(self, idx, type_name, categorize_type(type_name))
    }
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str, category: TypeCategory) -> JsonValue {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    let decoded = match category {
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Float => decode_as::<f64, _>(row, idx, float_json)
            .or_else(|_| decode_as::<f32, _>(row, idx, |v| float_json(f64::from(v)))),
        TypeCategory::Decimal => decode_as::<RawDecimal, _>(row, idx, |v| JsonValue::String(v.0)),
        TypeCategory::Boolean => decode_as::<bool, _>(row, idx, JsonValue::Bool),
        TypeCategory::Binary => decode_as::<Vec<u8>, _>(row, idx, |v| encode_binary_value(&v)),
        TypeCategory::Json => decode_as::<JsonValue, _>(row, idx, |v| v),
        TypeCategory::Uuid => decode_as::<uuid::Uuid, _>(row, idx, |v| {
            JsonValue::String(v.hyphenated().to_string())
        }),
        TypeCategory::TimestampTz => {
            decode_as::<DateTime<Utc>, _>(row, idx, |v| JsonValue::String(v.to_rfc3339()))
        }
        TypeCategory::Timestamp => decode_as::<NaiveDateTime, _>(row, idx, display_json),
        TypeCategory::Date => decode_as::<NaiveDate, _>(row, idx, display_json),
        TypeCategory::Time => decode_as::<NaiveTime, _>(row, idx, display_json),
        TypeCategory::Text | TypeCategory::Unknown => {
            decode_as::<String, _>(row, idx, JsonValue::String)
        }
    };

    decoded.unwrap_or_else(|e| {
        tracing::debug!(column = idx, type_name, error = %e, "Column not decodable; using null");
        JsonValue::Null
    })
}

/// Decode column `idx` as a nullable `T` and map non-null values to JSON.
fn decode_as<'r, T, F>(row: &'r PgRow, idx: usize, to_json: F) -> Result<JsonValue, sqlx::Error>
where
    T: Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres>,
    F: FnOnce(T) -> JsonValue,
{
    Ok(row
        .try_get::<Option<T>, _>(idx)?
        .map(to_json)
        .unwrap_or(JsonValue::Null))
}

fn decode_integer(row: &PgRow, idx: usize) -> Result<JsonValue, sqlx::Error> {
    decode_as::<i64, _>(row, idx, JsonValue::from)
        .or_else(|_| decode_as::<i32, _>(row, idx, JsonValue::from))
        .or_else(|_| decode_as::<i16, _>(row, idx, JsonValue::from))
}

/// NaN and infinities have no JSON number form.
fn float_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn display_json<T: std::fmt::Display>(v: T) -> JsonValue {
    JsonValue::String(v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_numeric_types() {
        assert_eq!(categorize_type("INT4"), TypeCategory::Integer);
        assert_eq!(categorize_type("int8"), TypeCategory::Integer);
        assert_eq!(categorize_type("FLOAT4"), TypeCategory::Float);
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
        // geometric type names must not be mistaken for integers
        assert_eq!(categorize_type("POINT"), TypeCategory::Unknown);
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(categorize_type("TIMESTAMPTZ"), TypeCategory::TimestampTz);
        assert_eq!(categorize_type("TIMESTAMP"), TypeCategory::Timestamp);
        assert_eq!(categorize_type("DATE"), TypeCategory::Date);
        assert_eq!(categorize_type("TIME"), TypeCategory::Time);
        assert_eq!(categorize_type("INTERVAL"), TypeCategory::Unknown);
    }

    #[test]
    fn test_categorize_type_other() {
        assert_eq!(categorize_type("jsonb"), TypeCategory::Json);
        assert_eq!(categorize_type("UUID"), TypeCategory::Uuid);
        assert_eq!(categorize_type("BYTEA"), TypeCategory::Binary);
        assert_eq!(categorize_type("FLOAT8"), TypeCategory::Float);
        assert_eq!(categorize_type("BOOL"), TypeCategory::Boolean);
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
        assert_eq!(categorize_type("INET"), TypeCategory::Unknown);
    }

    #[test]
    fn test_json_helpers() {
        assert_eq!(encode_binary_value(b"pgscope"), JsonValue::from("cGdzY29wZQ=="));
        assert_eq!(float_json(1.5), JsonValue::from(1.5));
        assert_eq!(float_json(f64::NAN), JsonValue::from("NaN"));
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(display_json(date), JsonValue::from("2024-03-01"));
    }
}
