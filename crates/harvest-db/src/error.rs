//! # Database Error Types
//!
//! Error types for database operations and workflows.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        Business rule (CoreError)           │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  DbError (this module) ◄──────────────────┘                            │
//! │       │  categorised: not found / duplicate / FK / CHECK / conflict     │
//! │       ▼                                                                 │
//! │  ApiError (apps/api) → HTTP status + { "error": ... }                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use harvest_core::import::ImportError;
use harvest_core::{CoreError, ValidationError};
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - ID doesn't exist
    /// - Provider reference unknown to the webhook
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Duplicate SKU
    /// - Second invoice for the same order
    /// - Role already assigned
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// CHECK constraint violation (e.g. a batch would go negative).
    #[error("Constraint violation: {message}")]
    CheckViolation { message: String },

    /// A guarded update matched no row because state changed underneath.
    ///
    /// ## When This Occurs
    /// - Two cashiers sell the last unit of a batch at the same time
    /// - Order paid by the webhook while being cancelled
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Another writer held the database past the busy timeout.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Business rule violation raised inside a workflow.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Unreadable CSV export.
    #[error(transparent)]
    Import(#[from] ImportError),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DbError::Conflict(message.into())
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Core(CoreError::Validation(err))
    }
}

/// Convert sqlx errors to DbError.
///
/// Sorts driver errors into the categories the HTTP layer answers with.
///
/// SQLite reports constraint failures only as text:
/// `UNIQUE constraint failed: products.sku`, `FOREIGN KEY constraint failed`,
/// `CHECK constraint failed: quantity >= 0`.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Row".to_string(),
                id: "(query)".to_string(),
            },
            sqlx::Error::Database(db_err) => classify_constraint(db_err.message()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("database closed".to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

fn classify_constraint(message: &str) -> DbError {
    if let Some(columns) = message.strip_prefix("UNIQUE constraint failed: ") {
        // "products.sku" or "user_roles.user_id, user_roles.role"
        let field = columns
            .split(", ")
            .map(|c| c.rsplit('.').next().unwrap_or(c))
            .collect::<Vec<_>>()
            .join("+");
        return DbError::UniqueViolation {
            field,
            value: "(existing row)".to_string(),
        };
    }
    if message.starts_with("FOREIGN KEY constraint failed") {
        return DbError::ForeignKeyViolation {
            message: message.to_string(),
        };
    }
    if message.starts_with("CHECK constraint failed") {
        return DbError::CheckViolation {
            message: message.to_string(),
        };
    }
    // SQLITE_BUSY / SQLITE_LOCKED once the busy timeout has run out
    if message.contains("database is locked") || message.contains("database table is locked") {
        return DbError::Busy(message.to_string());
    }
    DbError::QueryFailed(message.to_string())
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
