//! Error types for pgmodel

use thiserror::Error;

/// Result type alias for pgmodel operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for schema building, statement building and execution
#[derive(Debug, Error)]
pub enum OrmError {
    /// Invalid model or field declaration
    #[error("Schema error: {0}")]
    Schema(String),

    /// A single record failed field validation
    #[error("Validation error on field '{field}' ({label}): {message}")]
    Validation {
        field: String,
        label: String,
        message: String,
    },

    /// One row of a bulk operation failed field validation
    #[error("Validation error in row {index} on field '{field}' ({label}): {message}")]
    ValidationBatch {
        index: usize,
        field: String,
        label: String,
        message: String,
    },

    /// The statement could not be built
    #[error("SQL build error: {0}")]
    SqlBuild(String),

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// No row matched
    #[error("Not found: {0}")]
    NotFound(String),

    /// More rows matched than expected
    #[error("Too many rows: expected {expected}, got {got}")]
    TooManyRows { expected: usize, got: usize },

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// A database value could not be loaded through its field
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Create a SQL build error
    pub fn sql_build(message: impl Into<String>) -> Self {
        Self::SqlBuild(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a too-many-rows error
    pub fn too_many_rows(expected: usize, got: usize) -> Self {
        Self::TooManyRows { expected, got }
    }

    /// Attach a row index to a single-record validation error.
    ///
    /// Other variants are returned unchanged.
    pub fn at_row(self, index: usize) -> Self {
        match self {
            Self::Validation {
                field,
                label,
                message,
            } => Self::ValidationBatch {
                index,
                field,
                label,
                message,
            },
            other => other,
        }
    }

    /// Check if this is a validation error (single or batch)
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::ValidationBatch { .. })
    }

    /// Check if this is a SQL build error
    pub fn is_sql_build(&self) -> bool {
        matches!(self, Self::SqlBuild(_))
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Re-create an error recorded while building a statement.
    ///
    /// Builders keep the first chain error and report it from every
    /// `statement()` call, so it must be reproducible.
    pub(crate) fn replay(&self) -> Self {
        match self {
            Self::Schema(m) => Self::Schema(m.clone()),
            Self::Validation {
                field,
                label,
                message,
            } => Self::Validation {
                field: field.clone(),
                label: label.clone(),
                message: message.clone(),
            },
            Self::ValidationBatch {
                index,
                field,
                label,
                message,
            } => Self::ValidationBatch {
                index: *index,
                field: field.clone(),
                label: label.clone(),
                message: message.clone(),
            },
            Self::SqlBuild(m) => Self::SqlBuild(m.clone()),
            Self::Decode { column, message } => Self::Decode {
                column: column.clone(),
                message: message.clone(),
            },
            other => Self::Other(other.to_string()),
        }
    }

    /// Parse a tokio_postgres error into a more specific OrmError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{}: {}", constraint, message)),
                "23503" => {
                    return Self::ForeignKeyViolation(format!("{}: {}", constraint, message));
                }
                "23514" => return Self::CheckViolation(format!("{}: {}", constraint, message)),
                _ => {}
            }
        }
        Self::Query(err)
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
