//! Store error taxonomy.
//!
//! [`StoreError`] is the single error type returned by every
//! [`crate::persistence::StoreClient`] operation. Each variant carries the
//! operation or table it came from so callers can log it without
//! re-wrapping.

/// SQLSTATE raised by `CREATE DATABASE` when the database already exists.
pub const DUPLICATE_DATABASE: &str = "42P04";

/// SQLSTATE raised when an insert violates a unique constraint.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Errors produced by the persistence client.
///
/// | Variant         | Typical cause                                 | Recoverable |
/// |-----------------|-----------------------------------------------|-------------|
/// | `Configuration` | missing or malformed environment variable     | no          |
/// | `Connection`    | server unreachable, bad credentials           | transport   |
/// | `Schema`        | namespace/table creation failed, shape drift  | no          |
/// | `NotFound`      | single-row lookup matched nothing             | yes         |
/// | `Constraint`    | unique key already taken                      | yes         |
/// | `Query`         | any other database-reported failure           | depends     |
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A configuration value is missing or invalid.
    #[error("invalid configuration for {key}: {reason}")]
    Configuration {
        /// Environment variable name.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The database server could not be reached or the database could not
    /// be ensured.
    #[error("connection error: {context}: {source}")]
    Connection {
        /// Step that failed (e.g. `"create database"`).
        context: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// Namespace or table setup failed.
    #[error("schema error on {table}: {reason}")]
    Schema {
        /// Qualified table (or namespace) name.
        table: String,
        /// Failure description.
        reason: String,
    },

    /// A single-row read found nothing.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity kind (e.g. `"status page"`).
        entity: &'static str,
        /// Lookup key that matched nothing.
        key: String,
    },

    /// A unique-key constraint was violated.
    #[error("constraint violation during {operation}: {source}")]
    Constraint {
        /// Operation that failed (e.g. `"insert status_page"`).
        operation: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// Any other database failure.
    #[error("query failed during {operation}: {source}")]
    Query {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    /// Builds a [`StoreError::Configuration`].
    #[must_use]
    pub fn configuration(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`StoreError::Schema`].
    #[must_use]
    pub fn schema(table: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Schema {
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    /// Classifies a driver error raised while running `operation`.
    ///
    /// Unique violations become [`StoreError::Constraint`]; everything else
    /// becomes [`StoreError::Query`].
    #[must_use]
    pub fn from_query(operation: &'static str, source: sqlx::Error) -> Self {
        if sqlstate(&source).as_deref() == Some(UNIQUE_VIOLATION) {
            Self::Constraint { operation, source }
        } else {
            Self::Query { operation, source }
        }
    }

    /// Returns `true` if retrying the operation later may succeed.
    ///
    /// Only transport failures (IO, TLS, pool timeouts) qualify; rejected
    /// credentials or a denied `CREATE DATABASE` do not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { source, .. } | Self::Query { source, .. } => matches!(
                source,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_)
            ),
            Self::Configuration { .. }
            | Self::Schema { .. }
            | Self::NotFound { .. }
            | Self::Constraint { .. } => false,
        }
    }

    /// Returns `true` for [`StoreError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for [`StoreError::Constraint`].
    #[must_use]
    pub const fn is_constraint(&self) -> bool {
        matches!(self, Self::Constraint { .. })
    }
}

/// Extracts the SQLSTATE code of a database-reported error.
#[must_use]
pub fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

/// Returns `true` if `err` is the "database already exists" failure of
/// `CREATE DATABASE`.
#[must_use]
pub fn is_duplicate_database(err: &sqlx::Error) -> bool {
    sqlstate(err).as_deref() == Some(DUPLICATE_DATABASE)
}
