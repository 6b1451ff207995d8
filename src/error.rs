//! Error types for pgscope.
//!
//! Every fallible operation in the crate returns [`DbResult`]. The variants
//! separate problems detected before any I/O (validation) from lifecycle
//! misuse, registry misses, rolled-back transactions and driver failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Bad schema descriptor or statement builder argument. Never retried.
    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Operation attempted in the wrong pool lifecycle state.
    #[error("Pool '{pool}' is {state}: {message}")]
    PoolState {
        pool: String,
        state: String,
        message: String,
    },

    #[error("Registry lookup failed: {message}")]
    RegistryLookup { message: String },

    /// The transaction body failed and the transaction was rolled back.
    #[error("Transaction rolled back: {source}")]
    Transaction {
        #[source]
        source: Box<DbError>,
    },

    #[error("Driver error while {context}: {message}")]
    Driver {
        context: String,
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        retryable: bool,
    },
}

impl DbError {
    /// Create a validation error for a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a pool state error.
    pub fn pool_state(
        pool: impl Into<String>,
        state: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::PoolState {
            pool: pool.into(),
            state: state.into(),
            message: message.into(),
        }
    }

    /// Create a registry lookup error.
    pub fn registry_lookup(message: impl Into<String>) -> Self {
        Self::RegistryLookup {
            message: message.into(),
        }
    }

    /// No pool registered under `name`.
    pub fn pool_not_found(name: &str) -> Self {
        Self::registry_lookup(format!("no pool registered with name '{}'", name))
    }

    /// No current pool in scope.
    pub fn no_current_pool() -> Self {
        Self::registry_lookup("no current pool set")
    }

    /// Wrap the error that caused a rollback.
    pub fn transaction(source: DbError) -> Self {
        Self::Transaction {
            source: Box::new(source),
        }
    }

    /// Create a driver error with statement context.
    pub fn driver(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Driver {
            context: context.into(),
            message: message.into(),
            sql_state: None,
            retryable: false,
        }
    }

    /// A statement that did not finish within its per-call timeout.
    pub fn timeout(context: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Driver {
            context: context.into(),
            message: format!("timed out after {:?}", after),
            sql_state: None,
            retryable: true,
        }
    }

    /// Replace the context of a driver error, leaving other variants untouched.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        match self {
            Self::Driver {
                message,
                sql_state,
                retryable,
                ..
            } => Self::Driver {
                context: context.into(),
                message,
                sql_state,
                retryable,
            },
            other => other,
        }
    }

    /// The offending field of a validation error.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Driver { sql_state, .. } => sql_state.as_deref(),
            Self::Transaction { source } => source.sql_state(),
            _ => None,
        }
    }

    /// Unwrap nested transaction errors down to the original cause.
    pub fn root_cause(&self) -> &DbError {
        match self {
            Self::Transaction { source } => source.root_cause(),
            other => other,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Driver { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let (message, sql_state, retryable) = match &err {
            sqlx::Error::Database(db_err) => (
                db_err.message().to_string(),
                db_err.code().map(|c| c.to_string()),
                false,
            ),
            sqlx::Error::PoolTimedOut => {
                ("connection pool acquire timed out".to_string(), None, true)
            }
            sqlx::Error::PoolClosed => ("connection pool is closed".to_string(), None, false),
            sqlx::Error::Io(io_err) => (format!("I/O error: {}", io_err), None, true),
            sqlx::Error::Tls(tls_err) => (format!("TLS error: {}", tls_err), None, false),
            sqlx::Error::Protocol(msg) => (format!("Protocol error: {}", msg), None, false),
            sqlx::Error::Configuration(msg) => {
                (format!("Configuration error: {}", msg), None, false)
            }
            sqlx::Error::ColumnDecode { index, source } => (
                format!("Failed to decode column {}: {}", index, source),
                None,
                false,
            ),
            sqlx::Error::WorkerCrashed => ("database worker crashed".to_string(), None, true),
            other => (other.to_string(), None, false),
        };
        Self::Driver {
            context: "talking to the database".to_string(),
            message,
            sql_state,
            retryable,
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
