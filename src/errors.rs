use thiserror::Error;

/// Error type for graphsql operations.
///
/// Pre-flight failures (`Validation`, `InvalidSpec`, `UninitializedHook`) are
/// raised before any statement reaches the backing store. Post-flight failures
/// (`Constraint`, `NotFound` on updates, `QueryError`) are classified from
/// backend results.
#[derive(Debug, Error)]
pub enum GraphSqlError {
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("query error: {0}")]
    QueryError(String),
    #[error("transaction error: {0}")]
    TransactionError(String),
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not singular: {0}")]
    NotSingular(String),
    #[error("validation error on {name:?}: {message}")]
    Validation { name: String, message: String },
    #[error("constraint failed: {0}")]
    Constraint(String),
    #[error("edge {0:?} was not loaded")]
    NotLoaded(String),
    #[error("uninitialized hook for {0} (hook registered without an implementation)")]
    UninitializedHook(String),
    #[error("inconsistent result: {0}")]
    Inconsistent(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GraphSqlError {
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        GraphSqlError::ConnectionError(msg.into())
    }

    pub fn query<T: Into<String>>(msg: T) -> Self {
        GraphSqlError::QueryError(msg.into())
    }

    pub fn transaction<T: Into<String>>(msg: T) -> Self {
        GraphSqlError::TransactionError(msg.into())
    }

    pub fn invalid_spec<T: Into<String>>(msg: T) -> Self {
        GraphSqlError::InvalidSpec(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        GraphSqlError::NotFound(msg.into())
    }

    pub fn not_singular<T: Into<String>>(msg: T) -> Self {
        GraphSqlError::NotSingular(msg.into())
    }

    pub fn validation<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        GraphSqlError::Validation {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn constraint<T: Into<String>>(msg: T) -> Self {
        GraphSqlError::Constraint(msg.into())
    }

    pub fn not_loaded<T: Into<String>>(edge: T) -> Self {
        GraphSqlError::NotLoaded(edge.into())
    }

    pub fn uninitialized_hook<T: Into<String>>(target: T) -> Self {
        GraphSqlError::UninitializedHook(target.into())
    }

    pub fn inconsistent<T: Into<String>>(msg: T) -> Self {
        GraphSqlError::Inconsistent(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        GraphSqlError::Serialization(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphSqlError::NotFound(_))
    }

    pub fn is_not_singular(&self) -> bool {
        matches!(self, GraphSqlError::NotSingular(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, GraphSqlError::Validation { .. })
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, GraphSqlError::Constraint(_))
    }

    pub fn is_not_loaded(&self) -> bool {
        matches!(self, GraphSqlError::NotLoaded(_))
    }
}

/// Backend messages that identify a uniqueness, foreign-key or check
/// violation, across SQLite, PostgreSQL and MySQL.
const CONSTRAINT_MARKERS: &[&str] = &[
    // SQLite
    "UNIQUE constraint failed",
    "FOREIGN KEY constraint failed",
    "NOT NULL constraint failed",
    "CHECK constraint failed",
    "PRIMARY KEY must be unique",
    // PostgreSQL
    "violates unique constraint",
    "violates foreign key constraint",
    "violates not-null constraint",
    "violates check constraint",
    // MySQL
    "Error 1062",
    "Error 1451",
    "Error 1452",
    "Error 1048",
    "Duplicate entry",
];

/// Normalizes a raw backend error message into the shared taxonomy.
pub fn classify_backend_message(msg: impl Into<String>) -> GraphSqlError {
    let msg = msg.into();
    if CONSTRAINT_MARKERS.iter().any(|marker| msg.contains(marker)) {
        GraphSqlError::Constraint(msg)
    } else {
        GraphSqlError::QueryError(msg)
    }
}
