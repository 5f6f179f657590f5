//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)      Row image fails to decode             │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  EngineError (tavola-engine) ← What callers match on                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tavola_core::ValidationError;
use thiserror::Error;

/// Database operation errors.
///
/// These errors wrap sqlx errors and provide additional context
/// for debugging and user feedback.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `fetch_optional` returns no rows
    /// - ID doesn't exist, or belongs to another shop
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Duplicate table label within a shop
    /// - Two writers racing for the same order number
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Order placed against a table of a shop that doesn't exist
    /// - Recipe referencing a missing inventory item
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A row's `sync_version` changed between read and write.
    #[error("{entity} {id} changed concurrently (expected version {expected})")]
    StaleVersion {
        entity: String,
        id: String,
        expected: i64,
    },

    /// A stored row did not decode into its domain type.
    ///
    /// ## When This Occurs
    /// - Unknown status string in a status column
    /// - Malformed JSON in `line_items`, `breakdown` or a change-log image
    #[error("Corrupt {entity} row: {reason}")]
    Corrupt { entity: String, reason: String },

    /// Input rejected before it reached SQL.
    #[error("Invalid input: {0}")]
    Invalid(#[from] ValidationError),

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file doesn't exist and can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed to begin or commit.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Another writer held the database lock past the busy timeout.
    ///
    /// ## When This Occurs
    /// - A long write transaction on another connection
    /// - A second process writing the same file
    #[error("Database busy: {0}")]
    Busy(String),

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

    /// Creates a Corrupt error for a row that failed validation.
    pub fn corrupt(entity: impl Into<String>, reason: impl ToString) -> Self {
        DbError::Corrupt {
            entity: entity.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same operation might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DbError::StaleVersion { .. }
                | DbError::Busy(_)
                | DbError::TransactionFailed(_)
                | DbError::PoolExhausted
                | DbError::ConnectionFailed(_)
        )
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type,
///                                busy/locked codes → DbError::Busy
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                // SQLITE_BUSY, SQLITE_LOCKED and SQLITE_BUSY_SNAPSHOT
                let busy = matches!(db_err.code().as_deref(), Some("5" | "6" | "517"));

                // SQLite error codes for constraints:
                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if busy || msg.contains("database is locked") {
                    DbError::Busy(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            sqlx::Error::ColumnDecode { index, source } => {
                DbError::corrupt("column", format!("{}: {}", index, source))
            }

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers() {
        assert_eq!(
            DbError::not_found("Order", "ord-1").to_string(),
            "Order not found: ord-1"
        );
        assert!(matches!(
            DbError::corrupt("orders", "bad status"),
            DbError::Corrupt { .. }
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(DbError::PoolExhausted.is_retryable());
        assert!(DbError::Busy("database is locked".into()).is_retryable());
        assert!(DbError::StaleVersion {
            entity: "Order".into(),
            id: "o".into(),
            expected: 3
        }
        .is_retryable());
        assert!(!DbError::not_found("Order", "o").is_retryable());
        assert!(!DbError::corrupt("orders", "x").is_retryable());
    }
}
