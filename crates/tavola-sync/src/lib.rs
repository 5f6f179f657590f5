//! # tavola-sync: Change Fan-out for Tavola
//!
//! Keeps the customer device, the kitchen display and the admin dashboard
//! eventually consistent with the database, with no central lock and no
//! authoritative in-process state.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Change Fan-out                                   │
//! │                                                                         │
//! │  Engine transaction ──▶ change_log row (same commit)                   │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 OutboxRelay (single task)                        │  │
//! │  │  seq order = commit order                                        │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 ChangeBus                                        │  │
//! │  │  (table, shop) or (table, row) filters, bounded per subscriber   │  │
//! │  └───────┬─────────────────────┬───────────────────────┬────────────┘  │
//! │          ▼                     ▼                       ▼               │
//! │  ┌────────────────┐   ┌────────────────┐   ┌────────────────────────┐  │
//! │  │  OrderBoard    │   │ SessionWatch   │   │ any other Subscription │  │
//! │  │  (KDS)         │   │ (customer)     │   │ (dashboard, printer)   │  │
//! │  └────────────────┘   └────────────────┘   └────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-most-once per subscriber. A subscriber that falls behind
//! gets a `Resync` and re-fetches.
//!
//! ## Module Organization
//! - [`bus`] - `ChangeBus`, `Subscription`, `Delivery`
//! - [`relay`] - `OutboxRelay` poll loop
//! - [`observer`] - `OrderBoard` and `SessionWatch`
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tavola_sync::{ChangeBus, OutboxRelay, RelayConfig, OrderBoard};
//!
//! let bus = ChangeBus::new(256);
//! let relay = Arc::new(OutboxRelay::new(db.clone(), bus.clone(), RelayConfig::default()).await?);
//! let (_task, relay_handle) = relay.spawn();
//!
//! let mut board = OrderBoard::new("shop-1", db.orders().list_active("shop-1").await?);
//! let mut sub = bus.subscribe(board.filter());
//! while let Some(delivery) = sub.recv().await {
//!     board.apply(&delivery);
//!     if board.needs_refetch() {
//!         board.refetch(db.orders().list_active("shop-1").await?);
//!     }
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bus;
pub mod error;
pub mod observer;
pub mod relay;

// =============================================================================
// Re-exports
// =============================================================================

pub use bus::{ChangeBus, Delivery, Subscription, DEFAULT_CAPACITY};
pub use error::{SyncError, SyncResult};
pub use observer::{OrderBoard, SessionState, SessionWatch};
pub use relay::{OutboxRelay, RelayConfig, RelayHandle};
