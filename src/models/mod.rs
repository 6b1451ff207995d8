//! Data models for pgscope.
//!
//! This module re-exports all model types used throughout the crate.

pub mod schema;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use schema::{SchemaDescriptor, SchemaDescriptorBuilder};
pub use types::PgType;
pub use value::SqlValue;

/// A fetched row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;
