//! # Validation Module
//!
//! Input validation for everything a customer or staff member types in.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Client                                                       │
//! │  ├── Basic format checks (empty, length)                               │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Engine command (Rust)                                        │
//! │  ├── Type validation (deserialization)                                 │
//! │  └── THIS MODULE: field rules                                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tavola_core::validation::{validate_display_name, validate_item_quantity};
//!
//! assert_eq!(validate_display_name("  Asha ").unwrap(), "Asha");
//! assert!(validate_item_quantity(3).is_ok());
//! ```

use crate::error::ValidationError;
use crate::{MAX_DISPLAY_NAME_LEN, OTP_LENGTH};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a customer display name and returns it trimmed.
///
/// ## Rules
/// - Must not be blank
/// - At most 50 characters after trimming
///
/// ## Example
/// ```rust
/// use tavola_core::validation::validate_display_name;
///
/// assert!(validate_display_name("Ravi").is_ok());
/// assert!(validate_display_name("   ").is_err());
/// assert!(validate_display_name(&"x".repeat(51)).is_err());
/// ```
pub fn validate_display_name(name: &str) -> ValidationResult<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "display_name".to_string(),
        });
    }

    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "display_name".to_string(),
            max: MAX_DISPLAY_NAME_LEN,
        });
    }

    Ok(name.to_string())
}

/// Validates the reason given for cancelling an order.
///
/// ## Rules
/// - Must not be blank
/// - At most 200 characters
pub fn validate_cancel_reason(reason: &str) -> ValidationResult<String> {
    let reason = reason.trim();

    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }

    if reason.chars().count() > 200 {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: 200,
        });
    }

    Ok(reason.to_string())
}

/// Validates an admission code shape: exactly [`OTP_LENGTH`] ASCII digits.
///
/// Used when a shop sets its own code. Comparison against the stored code
/// happens in [`crate::session`].
pub fn validate_otp_format(otp: &str) -> ValidationResult<()> {
    let otp = otp.trim();

    if otp.len() != OTP_LENGTH || !otp.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "otp".to_string(),
            reason: format!("must be {} digits", OTP_LENGTH),
        });
    }

    Ok(())
}

/// Validates free-text notes on a stock adjustment.
pub fn validate_notes(notes: &str) -> ValidationResult<()> {
    if notes.chars().count() > 500 {
        return Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: 500,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates that a line item quantity is positive.
///
/// The upper bound depends on the menu item and the shop, so it is
/// checked where both are known (`QuantityTooLarge` at placement).
///
/// ## User Workflow
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Customer: Add to order                                                 │
/// │                                                                         │
/// │  Taps "-" down to 0                                                     │
/// │       │                                                                 │
/// │       ▼                                                                 │
/// │  validate_item_quantity(0) ← THIS FUNCTION                              │
/// │       │                                                                 │
/// │       ├── qty <= 0? → Error: "quantity must be positive"                │
/// │       └── OK → item and shop caps, then place_order                     │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub fn validate_item_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    Ok(())
}

/// Validates a rate in basis points (0% to 100%).
pub fn validate_rate_bps(field: &str, bps: u32) -> ValidationResult<()> {
    if bps > 10000 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: 10000,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_display_name() {
        assert_eq!(validate_display_name("  Meera  ").unwrap(), "Meera");
        assert!(validate_display_name(&"a".repeat(50)).is_ok());

        assert!(validate_display_name("").is_err());
        assert!(validate_display_name("\t ").is_err());
        assert!(validate_display_name(&"a".repeat(51)).is_err());
    }

    #[test]
    fn test_validate_cancel_reason() {
        assert_eq!(validate_cancel_reason(" out of stock ").unwrap(), "out of stock");
        assert!(validate_cancel_reason("").is_err());
        assert!(validate_cancel_reason("   ").is_err());
    }

    #[test]
    fn test_validate_otp_format() {
        assert!(validate_otp_format("0420").is_ok());
        assert!(validate_otp_format("042").is_err());
        assert!(validate_otp_format("04a0").is_err());
        assert!(validate_otp_format("04200").is_err());
    }

    #[test]
    fn test_validate_item_quantity() {
        assert!(validate_item_quantity(1).is_ok());
        assert!(validate_item_quantity(500).is_ok());

        assert!(validate_item_quantity(0).is_err());
        assert!(validate_item_quantity(-2).is_err());
    }

    #[test]
    fn test_validate_rate_bps() {
        assert!(validate_rate_bps("tax_rate", 0).is_ok());
        assert!(validate_rate_bps("tax_rate", 1800).is_ok());
        assert!(validate_rate_bps("tax_rate", 10001).is_err());
    }
}
