//! # Observers
//!
//! Client-side state kept in step with the bus: the kitchen display's
//! order board and a seated customer's session watch.
//!
//! ## Observer Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  initial fetch ──▶ observer ◀── subscription.recv()                    │
//! │                       │                                                 │
//! │                       ├─ Change: newer version → replace confirmed     │
//! │                       │           older version → ignore               │
//! │                       │                                                 │
//! │                       └─ Resync: needs_refetch = true                  │
//! │                                   caller re-fetches, calls refetch()   │
//! │                                                                         │
//! │  Local actions (tap "advance" on the KDS):                             │
//! │    begin(order, next) → render pending → ack or fail                   │
//! │    a later change event confirms or contradicts the pending value      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use tracing::{debug, warn};

use tavola_core::optimistic::{Optimistic, Reconciled};
use tavola_core::session::is_session_valid;
use tavola_core::{ChangeFilter, ChangeTable, DiningTable, Order, OrderStatus};

use crate::bus::Delivery;

// =============================================================================
// Order Board (kitchen display)
// =============================================================================

#[derive(Debug, Clone)]
struct BoardEntry {
    order: Order,
    status: Optimistic<OrderStatus>,
}

/// Open orders of one shop, as the kitchen display shows them.
#[derive(Debug, Clone)]
pub struct OrderBoard {
    shop_id: String,
    entries: BTreeMap<String, BoardEntry>,
    needs_refetch: bool,
}

impl OrderBoard {
    /// Builds the board from an initial fetch of open orders.
    pub fn new(shop_id: impl Into<String>, orders: Vec<Order>) -> Self {
        let mut board = OrderBoard {
            shop_id: shop_id.into(),
            entries: BTreeMap::new(),
            needs_refetch: false,
        };
        board.refetch(orders);
        board
    }

    /// The subscription this board consumes.
    pub fn filter(&self) -> ChangeFilter {
        ChangeFilter::shop(ChangeTable::Orders, self.shop_id.clone())
    }

    /// Replaces everything with authoritative state. Pending values are
    /// dropped: server state wins.
    pub fn refetch(&mut self, orders: Vec<Order>) {
        self.entries = orders
            .into_iter()
            .filter(|o| o.status.is_open())
            .map(|order| {
                let status = Optimistic::new(order.status);
                (order.id.clone(), BoardEntry { order, status })
            })
            .collect();
        self.needs_refetch = false;
    }

    pub fn needs_refetch(&self) -> bool {
        self.needs_refetch
    }

    /// Shows a status locally ahead of the write. False if the order is not
    /// on the board.
    pub fn begin(&mut self, order_id: &str, status: OrderStatus) -> bool {
        match self.entries.get_mut(order_id) {
            Some(entry) => {
                entry.status.begin(status);
                true
            }
            None => false,
        }
    }

    /// The write for `order_id` succeeded.
    pub fn acknowledge(&mut self, order_id: &str) {
        if let Some(entry) = self.entries.get_mut(order_id) {
            entry.status.acknowledge();
        }
    }

    /// The write for `order_id` failed: roll back and ask for a re-fetch.
    pub fn fail(&mut self, order_id: &str) {
        if let Some(entry) = self.entries.get_mut(order_id) {
            entry.status.fail();
            self.needs_refetch = true;
        }
    }

    /// Applies one delivery. Returns how a pending value was resolved, if
    /// the delivery touched an order on the board.
    pub fn apply(&mut self, delivery: &Delivery) -> Option<Reconciled<OrderStatus>> {
        let event = match delivery {
            Delivery::Resync { missed } => {
                warn!(shop_id = %self.shop_id, missed, "Order board lagged, re-fetch needed");
                self.needs_refetch = true;
                return None;
            }
            Delivery::Change(event) => event,
        };

        let order = event.new_row.as_ref().and_then(|row| row.as_order())?;
        if order.shop_id != self.shop_id {
            return None;
        }

        if let Some(entry) = self.entries.get(&order.id) {
            if order.sync_version <= entry.order.sync_version {
                debug!(order_id = %order.id, version = order.sync_version, "Ignoring stale order image");
                return None;
            }
        }

        if !order.status.is_open() {
            let removed = self.entries.remove(&order.id)?;
            let mut status = removed.status;
            return Some(status.reconcile(order.status));
        }

        match self.entries.get_mut(&order.id) {
            Some(entry) => {
                entry.order = order.clone();
                Some(entry.status.reconcile(order.status))
            }
            None => {
                self.entries.insert(
                    order.id.clone(),
                    BoardEntry {
                        order: order.clone(),
                        status: Optimistic::new(order.status),
                    },
                );
                Some(Reconciled::Applied)
            }
        }
    }

    /// Orders with the status to render, oldest ticket first.
    pub fn view(&self) -> Vec<(&Order, OrderStatus)> {
        let mut rows: Vec<(&Order, OrderStatus)> = self
            .entries
            .values()
            .map(|e| (&e.order, *e.status.view()))
            .collect();
        rows.sort_by_key(|(order, _)| order.order_number);
        rows
    }

    /// Open orders currently shown in `status`.
    pub fn column(&self, status: OrderStatus) -> Vec<&Order> {
        self.view()
            .into_iter()
            .filter(|(_, s)| *s == status)
            .map(|(order, _)| order)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Session Watch (customer device)
// =============================================================================

/// What the customer device should do after a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Still seated.
    Valid,
    /// The table was cleared (or the session removed): leave the table view.
    Invalidated,
    /// Events were missed; call `validate_session` before trusting state.
    Unknown,
}

/// Tracks whether a customer's session is still valid at its table.
///
/// Only pushed table changes move it to `Invalidated`; a device that misses
/// them (offline, lagged) learns through `Unknown` and a pull check.
#[derive(Debug, Clone)]
pub struct SessionWatch {
    table_id: String,
    session_id: String,
    state: SessionState,
    last_version: i64,
}

impl SessionWatch {
    pub fn new(table: &DiningTable, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let state = if is_session_valid(table, &session_id) {
            SessionState::Valid
        } else {
            SessionState::Invalidated
        };
        SessionWatch {
            table_id: table.id.clone(),
            session_id,
            state,
            last_version: table.sync_version,
        }
    }

    pub fn filter(&self) -> ChangeFilter {
        ChangeFilter::row(ChangeTable::Tables, self.table_id.clone())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Applies one delivery and returns the resulting state.
    pub fn apply(&mut self, delivery: &Delivery) -> SessionState {
        match delivery {
            Delivery::Resync { .. } => {
                if self.state == SessionState::Valid {
                    self.state = SessionState::Unknown;
                }
            }
            Delivery::Change(event) => {
                let table = event.new_row.as_ref().and_then(|row| row.as_table());
                if let Some(table) = table.filter(|t| t.id == self.table_id) {
                    if table.sync_version > self.last_version {
                        self.last_version = table.sync_version;
                        self.observe(table);
                    }
                }
            }
        }
        self.state
    }

    /// Result of a pull check (`validate_session`).
    pub fn confirm(&mut self, valid: bool) -> SessionState {
        self.state = if valid {
            SessionState::Valid
        } else {
            SessionState::Invalidated
        };
        self.state
    }

    fn observe(&mut self, table: &DiningTable) {
        let valid = is_session_valid(table, &self.session_id);
        let next = if valid {
            SessionState::Valid
        } else {
            SessionState::Invalidated
        };
        if next != self.state {
            debug!(
                table_id = %self.table_id,
                session_id = %self.session_id,
                state = ?next,
                "Session state changed"
            );
        }
        self.state = next;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
