//! # tavola-core: Pure Business Logic for Tavola
//!
//! This crate holds the order lifecycle, table session and billing rules as
//! pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tavola Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │        Observers (customer device, KDS, admin dashboard)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ commands / change events               │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │       tavola-engine (orders, tables, inventory commands)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tavola-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │  ┌─────────┐ ┌──────────┐ ┌─────────┐ ┌───────────┐ ┌────────┐ │   │
//! │  │  │  money  │ │ billing  │ │order_   │ │  session  │ │inventory│ │   │
//! │  │  │  Money  │ │Breakdown │ │flow     │ │ OTP, join │ │ plans   │ │   │
//! │  │  └─────────┘ └──────────┘ └─────────┘ └───────────┘ └────────┘ │   │
//! │  │  ┌─────────┐ ┌──────────┐ ┌────────────┐                        │   │
//! │  │  │  types  │ │  change  │ │ optimistic │                        │   │
//! │  │  └─────────┘ └──────────┘ └────────────┘                        │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          tavola-db (SQLite)  •  tavola-sync (change bus)        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Order, DiningTable, InventoryItem, ...)
//! - [`money`] - Integer money, rates and fixed-point quantities
//! - [`billing`] - Breakdown calculator and the legacy fallback
//! - [`order_flow`] - Status transition rules
//! - [`session`] - OTP and table membership rules
//! - [`inventory`] - Deduction planning and manual adjustment checks
//! - [`change`] - Change events, row images and subscription filters
//! - [`optimistic`] - `{confirmed, pending}` view state
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use tavola_core::billing::{calculate, BillingPolicy};
//! use tavola_core::money::{Money, Rate};
//! use tavola_core::types::LineItem;
//!
//! let items = vec![LineItem {
//!     menu_item_id: None,
//!     name: "Filter Coffee".into(),
//!     unit_price: Money::from_cents(11000),
//!     quantity: 1,
//!     note: None,
//! }];
//! let policy = BillingPolicy {
//!     tax_rate: Rate::from_percent(10),
//!     service_charge_rate: Rate::zero(),
//!     tax_included_in_price: true,
//! };
//!
//! let bill = calculate(&items, &policy);
//! assert_eq!(bill.subtotal.cents(), 10000);
//! assert_eq!(bill.tax.cents(), 1000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod billing;
pub mod change;
pub mod error;
pub mod inventory;
pub mod money;
pub mod optimistic;
pub mod order_flow;
pub mod session;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use billing::{BillingBreakdown, BillingPolicy, Charge, OrderCharges};
pub use change::{ChangeEvent, ChangeFilter, ChangeOperation, ChangeTable, RowImage};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{Money, Quantity, Rate};
pub use order_flow::{ConcurrencyPolicy, StockAffectingStatus};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Shop-wide per-line quantity cap for a freshly created shop.
///
/// Prevents accidental over-ordering from a customer device (typing 100
/// instead of 10). Individual menu items may set their own cap.
pub const DEFAULT_MAX_ITEM_QUANTITY: i64 = 10;

/// Longest display name a customer can join a table with.
pub const MAX_DISPLAY_NAME_LEN: usize = 50;

/// Digits in a table admission code.
pub const OTP_LENGTH: usize = 4;

/// Notes recorded on manual adjustments entered without any.
pub const EOD_RECONCILIATION_NOTES: &str = "EOD Reconciliation";
