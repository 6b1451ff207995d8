//! Schema descriptor: the validated description of one table.
//!
//! A descriptor is built once, checked completely at construction, and is
//! immutable afterwards. Column order is preserved because it drives the
//! column order of generated DDL and INSERT statements.

use crate::error::{DbError, DbResult};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::fmt;

/// Immutable description of a table's namespace, columns and time/key metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    schema_name: String,
    table_name: String,
    /// Ordered (column name, type token) pairs; names are unique
    column_types: Vec<(String, String)>,
    time_index: Option<String>,
    primary_keys: Option<Vec<String>>,
}

impl SchemaDescriptor {
    /// Start building a descriptor for `schema_name.table_name`.
    pub fn builder(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> SchemaDescriptorBuilder {
        SchemaDescriptorBuilder {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            column_types: Vec::new(),
            time_index: None,
            primary_keys: None,
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// `schema_name.table_name`, always derived from the two parts.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.column_types
            .iter()
            .map(|(name, ty)| (name.as_str(), ty.as_str()))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.column_types.iter().map(|(name, _)| name.as_str())
    }

    pub fn column_type(&self, column: &str) -> Option<&str> {
        self.column_types
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, ty)| ty.as_str())
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_type(column).is_some()
    }

    pub fn time_index(&self) -> Option<&str> {
        self.time_index.as_deref()
    }

    pub fn primary_keys(&self) -> Option<&[String]> {
        self.primary_keys.as_deref()
    }

    /// Primary-key and time-index columns must not be NULL.
    pub fn is_required(&self, column: &str) -> bool {
        self.time_index.as_deref() == Some(column)
            || self
                .primary_keys
                .as_ref()
                .is_some_and(|keys| keys.iter().any(|k| k == column))
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.qualified_name())?;
        for (i, (name, ty)) in self.column_types.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", name, ty)?;
        }
        write!(f, ")")?;
        if let Some(time_index) = &self.time_index {
            write!(f, " time_index={}", time_index)?;
        }
        if let Some(keys) = &self.primary_keys {
            write!(f, " primary_keys=[{}]", keys.join(", "))?;
        }
        Ok(())
    }
}

/// Serializes as `{schema_name, table_name, column_types, time_index, primary_keys}`
/// with `column_types` as an ordered object.
impl Serialize for SchemaDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct ColumnTypes<'a>(&'a [(String, String)]);

        impl Serialize for ColumnTypes<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (name, ty) in self.0 {
                    map.serialize_entry(name, ty)?;
                }
                map.end()
            }
        }

        let mut state = serializer.serialize_struct("SchemaDescriptor", 5)?;
        state.serialize_field("schema_name", &self.schema_name)?;
        state.serialize_field("table_name", &self.table_name)?;
        state.serialize_field("column_types", &ColumnTypes(&self.column_types))?;
        state.serialize_field("time_index", &self.time_index)?;
        state.serialize_field("primary_keys", &self.primary_keys)?;
        state.end()
    }
}

/// Collects descriptor fields; nothing is checked until [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct SchemaDescriptorBuilder {
    schema_name: String,
    table_name: String,
    column_types: Vec<(String, String)>,
    time_index: Option<String>,
    primary_keys: Option<Vec<String>>,
}

impl SchemaDescriptorBuilder {
    /// Append a column. Order of calls is the column order.
    pub fn column(mut self, name: impl Into<String>, type_token: impl Into<String>) -> Self {
        self.column_types.push((name.into(), type_token.into()));
        self
    }

    pub fn columns<I, K, V>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.column_types
            .extend(columns.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn time_index(mut self, column: impl Into<String>) -> Self {
        self.time_index = Some(column.into());
        self
    }

    pub fn primary_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.primary_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Validate every field and produce the descriptor.
    pub fn build(self) -> DbResult<SchemaDescriptor> {
        if self.schema_name.trim().is_empty() {
            return Err(DbError::validation(
                "schema_name",
                "schema name must not be empty",
            ));
        }
        if self.table_name.trim().is_empty() {
            return Err(DbError::validation(
                "table_name",
                "table name must not be empty",
            ));
        }
        if self.column_types.is_empty() {
            return Err(DbError::validation(
                "column_types",
                "at least one column is required",
            ));
        }
        for (i, (name, ty)) in self.column_types.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(DbError::validation(
                    "column_types",
                    format!("column #{} has an empty name", i + 1),
                ));
            }
            if ty.trim().is_empty() {
                return Err(DbError::validation(
                    "column_types",
                    format!("column '{}' has an empty type", name),
                ));
            }
            if self.column_types[..i].iter().any(|(prev, _)| prev == name) {
                return Err(DbError::validation(
                    "column_types",
                    format!("column '{}' is declared twice", name),
                ));
            }
        }

        let known = |column: &str| self.column_types.iter().any(|(name, _)| name == column);

        if let Some(time_index) = &self.time_index {
            if !known(time_index) {
                return Err(DbError::validation(
                    "time_index",
                    format!("time index '{}' is not a declared column", time_index),
                ));
            }
        }
        if let Some(keys) = &self.primary_keys {
            if let Some(missing) = keys.iter().find(|k| !known(k)) {
                return Err(DbError::validation(
                    "primary_keys",
                    format!("primary key '{}' is not a declared column", missing),
                ));
            }
        }

        Ok(SchemaDescriptor {
            schema_name: self.schema_name,
            table_name: self.table_name,
            column_types: self.column_types,
            time_index: self.time_index,
            primary_keys: self.primary_keys.filter(|keys| !keys.is_empty()),
        })
    }
}
