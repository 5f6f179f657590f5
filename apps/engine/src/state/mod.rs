//! # Client State
//!
//! State a device keeps between commands, kept in step with the change bus.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Client State                                         │
//! │                                                                         │
//! │  ┌──────────────────────┐            ┌──────────────────────┐          │
//! │  │   CustomerContext    │            │    KitchenBoard      │          │
//! │  │                      │            │                      │          │
//! │  │  seated session      │            │  open orders         │          │
//! │  │  SessionWatch        │            │  OrderBoard          │          │
//! │  │  row subscription    │            │  shop subscription   │          │
//! │  │  (one table)         │            │  (orders)            │          │
//! │  └──────────┬───────────┘            └──────────┬───────────┘          │
//! │             │ poll()                            │ poll()               │
//! │             ▼                                   ▼                      │
//! │        ChangeBus deliveries ◀──── OutboxRelay ◀──── change_log         │
//! │                                                                         │
//! │  Each holds its own Subscription: not shared between tasks.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod customer;
mod kitchen;

pub use customer::CustomerContext;
pub use kitchen::KitchenBoard;
