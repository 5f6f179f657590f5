//! # Sync Error Types
//!
//! Error types for the relay and the bus.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Database     │  │      Channels           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  DatabaseError  │  │  ChannelError           │ │
//! │  │                 │  │  (retryable)    │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid relay or bus configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Reading or marking the change log failed.
    #[error("Database error: {message}")]
    DatabaseError { message: String, retryable: bool },

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The relay is shutting down.
    #[error("Relay is shutting down")]
    ShuttingDown,
}

impl From<tavola_db::DbError> for SyncError {
    fn from(err: tavola_db::DbError) -> Self {
        SyncError::DatabaseError {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl SyncError {
    /// Returns true if the next relay tick may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::DatabaseError { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavola_db::DbError;

    #[test]
    fn test_retryable_follows_db_error() {
        let busy: SyncError = DbError::TransactionFailed("database is locked".into()).into();
        assert!(busy.is_retryable());

        let missing: SyncError = DbError::not_found("Order", "o-1").into();
        assert!(!missing.is_retryable());

        assert!(!SyncError::ShuttingDown.is_retryable());
        assert!(!SyncError::InvalidConfig("batch_size = 0".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::ChannelError("relay shutdown channel closed".into());
        assert!(err.to_string().contains("relay shutdown"));
    }
}
