//! # Table Sessions
//!
//! Admission and membership rules for customers seated at a table.
//!
//! ## Join Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Join a Table                                   │
//! │                                                                         │
//! │  Customer scans QR ──► JoinRequest { otp, display_name, previous? }    │
//! │                               │                                         │
//! │           previous session still seated? ── yes ──► re-join (no write) │
//! │                               │ no                                      │
//! │                               ▼                                         │
//! │  otp_enabled? ── no ───────────────────────────────┐                    │
//! │       │ yes                                        │                    │
//! │       ▼                                            ▼                    │
//! │  per_table_otp ? table code : shop code     append ActiveSession       │
//! │       │                                     status = occupied          │
//! │  mismatch ──► InvalidOtp (nothing written)                             │
//! │                                                                         │
//! │  clear(table) ──► sessions = [], status = empty (one update)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sessions are invalidated only by `clear`. A device learns about it by
//! re-validating (pull), or through a table change notification if it is
//! subscribed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::types::{ActiveSession, DiningTable, ShopSettings, TableStatus};
use crate::validation::validate_display_name;
use crate::OTP_LENGTH;

// =============================================================================
// Requests
// =============================================================================

/// What a customer device sends to join a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct JoinRequest {
    pub otp: Option<String>,
    pub display_name: String,
    /// Session id the device held before (page reload, app restart).
    pub previous_session_id: Option<String>,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct JoinOutcome {
    pub table_id: String,
    pub session: ActiveSession,
    /// True when an existing session was reused and nothing was written.
    pub rejoined: bool,
}

// =============================================================================
// OTP
// =============================================================================

/// Checks a supplied admission code.
///
/// ## Rules
/// - Verification disabled: always passes
/// - Per-table codes: compared with `table_code`
/// - Otherwise: compared with the shop-wide code
/// - A missing supplied code, or no code configured, fails
pub fn verify_otp(
    settings: &ShopSettings,
    table_id: &str,
    table_code: Option<&str>,
    supplied: Option<&str>,
) -> CoreResult<()> {
    if !settings.otp_enabled {
        return Ok(());
    }

    let expected = if settings.per_table_otp {
        table_code
    } else {
        settings.shop_otp.as_deref()
    };

    match (expected.map(str::trim), supplied.map(str::trim)) {
        (Some(expected), Some(supplied)) if !expected.is_empty() && expected == supplied => Ok(()),
        _ => Err(CoreError::InvalidOtp {
            table_id: table_id.to_string(),
        }),
    }
}

/// Generates a fresh numeric admission code.
pub fn generate_otp() -> String {
    let modulus = 10u128.pow(OTP_LENGTH as u32);
    let n = Uuid::new_v4().as_u128() % modulus;
    format!("{:0width$}", n, width = OTP_LENGTH)
}

/// Generates a new customer session id.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Membership
// =============================================================================

/// Finds a seated session by id.
pub fn find_session<'a>(table: &'a DiningTable, session_id: &str) -> Option<&'a ActiveSession> {
    table
        .active_sessions
        .iter()
        .find(|s| s.session_id == session_id)
}

/// True iff the session is seated and the table is occupied.
pub fn is_session_valid(table: &DiningTable, session_id: &str) -> bool {
    table.status == TableStatus::Occupied && find_session(table, session_id).is_some()
}

/// Appends a new session and marks the table occupied.
///
/// Other seated sessions are untouched; group ordering keeps join order.
pub fn join(
    table: &mut DiningTable,
    session_id: String,
    display_name: &str,
    now: DateTime<Utc>,
) -> CoreResult<ActiveSession> {
    let display_name = validate_display_name(display_name)?;
    let session = ActiveSession {
        session_id,
        display_name,
        joined_at: now,
    };
    table.active_sessions.push(session.clone());
    table.status = TableStatus::Occupied;
    table.updated_at = now;
    Ok(session)
}

/// Empties the table. Returns the sessions that were removed.
pub fn clear(table: &mut DiningTable, now: DateTime<Utc>) -> Vec<ActiveSession> {
    table.status = TableStatus::Empty;
    table.updated_at = now;
    std::mem::take(&mut table.active_sessions)
}

/// Ensures a customer session may act at the table.
pub fn require_session(table: &DiningTable, session_id: &str) -> CoreResult<()> {
    if is_session_valid(table, session_id) {
        Ok(())
    } else {
        Err(CoreError::SessionInvalid {
            table_id: table.id.clone(),
            session_id: session_id.to_string(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
