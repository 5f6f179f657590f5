//! # Optimistic View State
//!
//! A `{confirmed, pending}` pair for observers that show a local change
//! before the server acknowledges it.
//!
//! ```text
//!   begin(v)          ack()              fail()
//! confirmed ──► confirmed + pending ──► confirmed := pending
//!                        │
//!                        └──────────────► pending dropped, re-fetch
//!
//!   reconcile(server): confirmed := server,
//!                      pending == server ? Confirmed : Contradicted
//! ```
//!
//! Server state always wins.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimistic<T> {
    confirmed: T,
    pending: Option<T>,
}

/// What a change notification did to a pending local mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled<T> {
    /// Nothing was pending.
    Applied,
    /// The server reached the value shown locally.
    Confirmed,
    /// The server disagrees; the local value was dropped.
    Contradicted { discarded: T },
}

impl<T: Clone + PartialEq> Optimistic<T> {
    pub fn new(confirmed: T) -> Self {
        Optimistic {
            confirmed,
            pending: None,
        }
    }

    /// The value to render: pending if there is one.
    pub fn view(&self) -> &T {
        self.pending.as_ref().unwrap_or(&self.confirmed)
    }

    pub fn confirmed(&self) -> &T {
        &self.confirmed
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Shows `value` locally ahead of the write. Replaces any earlier pending value.
    pub fn begin(&mut self, value: T) {
        self.pending = Some(value);
    }

    /// The write succeeded: pending becomes confirmed.
    pub fn acknowledge(&mut self) {
        if let Some(value) = self.pending.take() {
            self.confirmed = value;
        }
    }

    /// The write failed: roll back to the confirmed value.
    ///
    /// Returns the discarded value. The caller should re-fetch, since the
    /// confirmed value may itself be stale.
    pub fn fail(&mut self) -> Option<T> {
        self.pending.take()
    }

    /// Applies an authoritative value from a change notification.
    pub fn reconcile(&mut self, server: T) -> Reconciled<T> {
        let outcome = match self.pending.take() {
            None => Reconciled::Applied,
            Some(local) if local == server => Reconciled::Confirmed,
            Some(local) => Reconciled::Contradicted { discarded: local },
        };
        self.confirmed = server;
        outcome
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderStatus;

    #[test]
    fn test_begin_shows_pending() {
        let mut s = Optimistic::new(OrderStatus::Queued);
        s.begin(OrderStatus::Preparing);
        assert_eq!(*s.view(), OrderStatus::Preparing);
        assert_eq!(*s.confirmed(), OrderStatus::Queued);
    }

    #[test]
    fn test_fail_restores_confirmed() {
        let mut s = Optimistic::new(OrderStatus::Queued);
        s.begin(OrderStatus::Preparing);
        assert_eq!(s.fail(), Some(OrderStatus::Preparing));
        assert_eq!(*s.view(), OrderStatus::Queued);
        assert!(!s.is_pending());
    }

    #[test]
    fn test_acknowledge_commits() {
        let mut s = Optimistic::new(OrderStatus::Queued);
        s.begin(OrderStatus::Preparing);
        s.acknowledge();
        assert_eq!(*s.confirmed(), OrderStatus::Preparing);
        assert!(!s.is_pending());
    }

    #[test]
    fn test_reconcile_confirms_matching_pending() {
        let mut s = Optimistic::new(OrderStatus::Queued);
        s.begin(OrderStatus::Preparing);
        assert_eq!(s.reconcile(OrderStatus::Preparing), Reconciled::Confirmed);
        assert_eq!(*s.view(), OrderStatus::Preparing);
    }

    #[test]
    fn test_reconcile_server_wins() {
        let mut s = Optimistic::new(OrderStatus::Queued);
        s.begin(OrderStatus::Preparing);
        assert_eq!(
            s.reconcile(OrderStatus::Cancelled),
            Reconciled::Contradicted {
                discarded: OrderStatus::Preparing
            }
        );
        assert_eq!(*s.view(), OrderStatus::Cancelled);
    }

    #[test]
    fn test_reconcile_without_pending() {
        let mut s = Optimistic::new(OrderStatus::Ready);
        assert_eq!(s.reconcile(OrderStatus::Served), Reconciled::Applied);
        assert_eq!(*s.view(), OrderStatus::Served);
    }
}
