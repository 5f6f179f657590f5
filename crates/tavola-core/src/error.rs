//! # Error Types
//!
//! Domain-specific error types for tavola-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tavola-core errors (this file)                                        │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tavola-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tavola-engine errors (app)                                            │
//! │  └── EngineError      - What callers see                               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → Caller              │
//! │                          DbError ────┘                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::OrderStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// None of these are retryable: repeating the same call against the same
/// state fails the same way.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An order status move that the lifecycle does not allow.
    ///
    /// ## When This Occurs
    /// - Advancing an order that is already served, billed or cancelled
    /// - Cancelling once the food is ready
    /// - Retreating from queued or from served onwards
    /// - Billing an order that has not been served
    #[error("Order {order_id} cannot {action} from {from}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        action: &'static str,
    },

    /// The supplied admission code does not match.
    #[error("Invalid OTP for table {table_id}")]
    InvalidOtp { table_id: String },

    /// A customer session is not (or no longer) seated at the table.
    ///
    /// ## When This Occurs
    /// - The table was cleared after the customer joined
    /// - A stale device tries to order against a different table
    #[error("Session {session_id} is not active at table {table_id}")]
    SessionInvalid {
        table_id: String,
        session_id: String,
    },

    /// The actor's role does not grant the operation.
    #[error("{actor} is not allowed to {action}")]
    Forbidden { actor: String, action: &'static str },

    /// Item quantity exceeds the shop or item limit.
    #[error("Quantity {requested} of {item} exceeds maximum allowed ({max})")]
    QuantityTooLarge {
        item: String,
        requested: i64,
        max: i64,
    },

    /// Menu item is switched off or sold out.
    #[error("{item} is currently unavailable")]
    ItemUnavailable { item: String },

    /// A manual adjustment would take stock below zero.
    ///
    /// ## User Workflow
    /// ```text
    /// Stock: 2.000 kg
    ///      │
    ///      ▼
    /// Wastage −3.000 kg
    ///      │
    ///      ▼
    /// NegativeStock { item: "Paneer", current: "2.000", delta: "-3.000" }
    ///      │
    ///      ▼
    /// UI shows: "Paneer only has 2.000 in stock"
    /// ```
    #[error("Adjustment of {delta} would make {item} negative (current {current})")]
    NegativeStock {
        item: String,
        current: String,
        delta: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, malformed JSON column).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
