//! # Order Flow
//!
//! Pure transition rules for the order lifecycle. The engine reads the
//! order inside a transaction, asks this module whether the move is legal,
//! and only then writes.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Order Status Machine                             │
//! │                                                                         │
//! │   advance      advance       advance      bill                          │
//! │  ┌──────┐   ┌───────────┐   ┌───────┐   ┌────────┐   ┌────────┐         │
//! │  │queued│──►│ preparing │──►│ ready │──►│ served │──►│ billed │         │
//! │  └──┬───┘◄──└─────┬─────┘◄──└───────┘   └────────┘   └────────┘         │
//! │     │   retreat   │   retreat                                           │
//! │     │  cancel     │ cancel                                              │
//! │     ▼             ▼                                                     │
//! │  ┌───────────────────┐                                                  │
//! │  │     cancelled     │                                                  │
//! │  └───────────────────┘                                                  │
//! │                                                                         │
//! │  Stock-affecting state (served or billed) triggers deduction once.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{Actor, Order, OrderStatus};
use crate::validation::validate_cancel_reason;

// =============================================================================
// Status Rules
// =============================================================================

impl OrderStatus {
    /// The state `advance` moves to, if any.
    ///
    /// `served → billed` is not an advance: billing goes through `bill`.
    pub const fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Queued => Some(OrderStatus::Preparing),
            OrderStatus::Preparing => Some(OrderStatus::Ready),
            OrderStatus::Ready => Some(OrderStatus::Served),
            OrderStatus::Served | OrderStatus::Billed | OrderStatus::Cancelled => None,
        }
    }

    /// The state `retreat` moves back to, if any.
    pub const fn previous(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Preparing => Some(OrderStatus::Queued),
            OrderStatus::Ready => Some(OrderStatus::Preparing),
            _ => None,
        }
    }

    pub const fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Queued | OrderStatus::Preparing)
    }

    /// Still being worked on by the kitchen.
    pub const fn is_in_kitchen(&self) -> bool {
        matches!(
            self,
            OrderStatus::Queued | OrderStatus::Preparing | OrderStatus::Ready
        )
    }

    /// Keeps its table occupied (anything not yet billed or cancelled).
    pub const fn is_open(&self) -> bool {
        !matches!(self, OrderStatus::Billed | OrderStatus::Cancelled)
    }
}

// =============================================================================
// Stock Trigger & Concurrency Policy
// =============================================================================

/// Which status triggers inventory deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockAffectingStatus {
    #[default]
    Served,
    Billed,
}

impl StockAffectingStatus {
    pub const fn status(&self) -> OrderStatus {
        match self {
            StockAffectingStatus::Served => OrderStatus::Served,
            StockAffectingStatus::Billed => OrderStatus::Billed,
        }
    }

    /// Whether a move into `to` is the one that should deduct.
    pub fn triggers_on(&self, to: OrderStatus) -> bool {
        self.status() == to
    }
}

impl FromStr for StockAffectingStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "served" => Ok(StockAffectingStatus::Served),
            "billed" => Ok(StockAffectingStatus::Billed),
            _ => Err(ValidationError::NotAllowed {
                field: "stock_affecting_status".to_string(),
                allowed: vec!["served".to_string(), "billed".to_string()],
            }),
        }
    }
}

impl fmt::Display for StockAffectingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}

/// How concurrent writers to the same order are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// The later commit wins; no version comparison.
    #[default]
    LastWriteWins,
    /// Writes compare the `sync_version` they read and fail on mismatch.
    VersionChecked,
}

impl FromStr for ConcurrencyPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last_write_wins" => Ok(ConcurrencyPolicy::LastWriteWins),
            "version_checked" => Ok(ConcurrencyPolicy::VersionChecked),
            _ => Err(ValidationError::NotAllowed {
                field: "concurrency".to_string(),
                allowed: vec!["last_write_wins".to_string(), "version_checked".to_string()],
            }),
        }
    }
}

// =============================================================================
// Transition Checks
// =============================================================================

fn invalid(order: &Order, action: &'static str) -> CoreError {
    CoreError::InvalidTransition {
        order_id: order.id.clone(),
        from: order.status,
        action,
    }
}

/// Checks an `advance` and returns the target status.
///
/// An actor without kitchen capability is reported as an invalid
/// transition, the same as advancing a finished order.
pub fn check_advance(order: &Order, actor: &Actor) -> CoreResult<OrderStatus> {
    if !actor.can_work_kitchen() {
        return Err(invalid(order, "advance"));
    }
    order.status.next().ok_or_else(|| invalid(order, "advance"))
}

/// Checks a `retreat` and returns the target status.
pub fn check_retreat(order: &Order, actor: &Actor) -> CoreResult<OrderStatus> {
    if !actor.can_work_kitchen() {
        return Err(CoreError::Forbidden {
            actor: actor.name.clone(),
            action: "retreat orders",
        });
    }
    order.status.previous().ok_or_else(|| invalid(order, "retreat"))
}

/// Checks a `cancel` and returns the trimmed reason.
pub fn check_cancel(order: &Order, actor: &Actor, reason: &str) -> CoreResult<String> {
    if !actor.is_staff() {
        return Err(CoreError::Forbidden {
            actor: actor.name.clone(),
            action: "cancel orders",
        });
    }
    let reason = validate_cancel_reason(reason)?;
    if !order.status.can_cancel() {
        return Err(invalid(order, "cancel"));
    }
    Ok(reason)
}

/// Checks a `bill` (`served → billed`).
pub fn check_bill(order: &Order, actor: &Actor) -> CoreResult<()> {
    if !actor.can_bill() {
        return Err(CoreError::Forbidden {
            actor: actor.name.clone(),
            action: "bill orders",
        });
    }
    if order.status != OrderStatus::Served {
        return Err(invalid(order, "bill"));
    }
    Ok(())
}

/// Applies a checked move: status, `updated_at` and the milestone stamp.
///
/// Retreating does not clear an earlier `ready_at`; the stamp records the
/// last time the order became ready.
pub fn apply_transition(order: &mut Order, to: OrderStatus, now: DateTime<Utc>) {
    order.status = to;
    order.updated_at = now;
    match to {
        OrderStatus::Ready => order.ready_at = Some(now),
        OrderStatus::Served => order.served_at = Some(now),
        OrderStatus::Billed => order.billed_at = Some(now),
        _ => {}
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
