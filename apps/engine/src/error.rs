//! # Engine Error Type
//!
//! The error taxonomy callers of the engine match on.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in Tavola                                 │
//! │                                                                         │
//! │  Command (advance, join, bill, ...)                                     │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  Result<T, EngineError>                                          │  │
//! │  │         │                                                        │  │
//! │  │  Rule broken? ──── CoreError::InvalidTransition ────┐            │  │
//! │  │         │                                           │            │  │
//! │  │  Store failed? ─── DbError::StaleVersion / Busy ────┤            │  │
//! │  │         │                                           ▼            │  │
//! │  │         │                                     EngineError ──────►│  │
//! │  │  Success ───────────────────────────────────────────────────────►│  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  Retryable:  PersistenceFailure, ConcurrencyConflict                    │
//! │  Final:      everything else (domain errors are never retried)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Serialization
//! Observers receive failures as JSON:
//! ```json
//! {
//!   "code": "INVALID_OTP",
//!   "message": "Invalid OTP for table 4f1c..."
//! }
//! ```

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::error;

use tavola_core::CoreError;
use tavola_db::DbError;
use tavola_sync::SyncError;

/// Errors returned by engine commands.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested status change is not allowed from the current state.
    #[error("{0}")]
    InvalidTransition(String),

    /// Table admission code did not match (or none was configured).
    #[error("Invalid OTP for table {table_id}")]
    InvalidOtp { table_id: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The row changed between read and write.
    #[error("Concurrent update: {0}")]
    ConcurrencyConflict(String),

    /// The store failed. The operation was rolled back.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The customer session is not seated at the table.
    #[error("Session {session_id} is not active at table {table_id}")]
    SessionInvalid {
        table_id: String,
        session_id: String,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Machine-readable code for each error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidTransition,
    InvalidOtp,
    NotFound,
    ConcurrencyConflict,
    PersistenceFailure,
    ValidationError,
    SessionInvalid,
    Forbidden,
    ConfigError,
}

impl EngineError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::InvalidTransition(_) => ErrorCode::InvalidTransition,
            EngineError::InvalidOtp { .. } => ErrorCode::InvalidOtp,
            EngineError::NotFound { .. } => ErrorCode::NotFound,
            EngineError::ConcurrencyConflict(_) => ErrorCode::ConcurrencyConflict,
            EngineError::PersistenceFailure(_) => ErrorCode::PersistenceFailure,
            EngineError::Validation(_) => ErrorCode::ValidationError,
            EngineError::SessionInvalid { .. } => ErrorCode::SessionInvalid,
            EngineError::Forbidden(_) => ErrorCode::Forbidden,
            EngineError::Config(_) => ErrorCode::ConfigError,
        }
    }

    /// Whether the caller may retry the same command.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::PersistenceFailure(_) | EngineError::ConcurrencyConflict(_)
        )
    }
}

impl Serialize for EngineError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("EngineError", 2)?;
        state.serialize_field("code", &self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Converts database errors to engine errors.
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            DbError::StaleVersion { .. } | DbError::Busy(_) => {
                EngineError::ConcurrencyConflict(err.to_string())
            }
            DbError::Invalid(e) => EngineError::Validation(e.to_string()),
            DbError::Corrupt { .. } => {
                error!(error = %err, "Stored row failed validation");
                EngineError::PersistenceFailure(err.to_string())
            }
            other => {
                error!(error = %other, "Database operation failed");
                EngineError::PersistenceFailure(other.to_string())
            }
        }
    }
}

/// Converts core rule violations to engine errors.
impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidTransition { .. } => EngineError::InvalidTransition(err.to_string()),
            CoreError::InvalidOtp { table_id } => EngineError::InvalidOtp { table_id },
            CoreError::SessionInvalid {
                table_id,
                session_id,
            } => EngineError::SessionInvalid {
                table_id,
                session_id,
            },
            CoreError::Forbidden { .. } => EngineError::Forbidden(err.to_string()),
            CoreError::QuantityTooLarge { .. }
            | CoreError::ItemUnavailable { .. }
            | CoreError::NegativeStock { .. } => EngineError::Validation(err.to_string()),
            CoreError::Validation(e) => EngineError::Validation(e.to_string()),
        }
    }
}

impl From<tavola_core::ValidationError> for EngineError {
    fn from(err: tavola_core::ValidationError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<SyncError> for EngineError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::InvalidConfig(msg) => EngineError::Config(msg),
            other => EngineError::PersistenceFailure(other.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Result alias for engine commands.
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tavola_core::{OrderStatus, ValidationError};

    #[test]
    fn test_stale_version_is_retryable_conflict() {
        let err: EngineError = DbError::StaleVersion {
            entity: "Order".into(),
            id: "ord-1".into(),
            expected: 3,
        }
        .into();
        assert_eq!(err.code(), ErrorCode::ConcurrencyConflict);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_domain_errors_are_not_retryable() {
        let err: EngineError = CoreError::InvalidTransition {
            order_id: "ord-1".into(),
            from: OrderStatus::Served,
            action: "advance",
        }
        .into();
        assert_eq!(err.code(), ErrorCode::InvalidTransition);
        assert!(!err.is_retryable());

        let err: EngineError = CoreError::InvalidOtp {
            table_id: "t-1".into(),
        }
        .into();
        assert!(matches!(err, EngineError::InvalidOtp { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_db_mapping() {
        let err: EngineError = DbError::not_found("Table", "t-9").into();
        assert_eq!(err.to_string(), "Table not found: t-9");

        let err: EngineError = DbError::TransactionFailed("disk I/O error".into()).into();
        assert_eq!(err.code(), ErrorCode::PersistenceFailure);
        assert!(err.is_retryable());

        let err: EngineError = DbError::Busy("database is locked".into()).into();
        assert_eq!(err.code(), ErrorCode::ConcurrencyConflict);

        let err: EngineError = DbError::Invalid(ValidationError::Required {
            field: "label".into(),
        })
        .into();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_serializes_code_and_message() {
        let err = EngineError::InvalidOtp {
            table_id: "t-1".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "INVALID_OTP");
        assert_eq!(json["message"], "Invalid OTP for table t-1");
    }
}
