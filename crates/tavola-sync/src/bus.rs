//! # Change Bus
//!
//! In-process fan-out of committed changes to filtered subscribers.
//!
//! ## Delivery Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ChangeBus                                       │
//! │                                                                         │
//! │  publish(event)                                                        │
//! │       │                                                                 │
//! │       ├── filter(orders, shop=s1) ──▶ [■■■□□] ──▶ KDS board            │
//! │       ├── filter(tables, row=t4)  ──▶ [■□□□□] ──▶ customer device      │
//! │       └── filter(orders, shop=s2) ──✗ (not matched)                    │
//! │                                                                         │
//! │  Each subscriber has its own bounded queue.                            │
//! │                                                                         │
//! │  Queue full:  event dropped for that subscriber, missed += 1           │
//! │  Next chance: Resync { missed } is delivered first; the subscriber     │
//! │               re-fetches authoritative state                           │
//! │  Receiver gone: entry removed on the next publish (or on drop)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Publishing never blocks. A slow observer cannot stall the relay or
//! any other observer.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use tavola_core::{ChangeEvent, ChangeFilter};

/// Default per-subscriber queue length.
pub const DEFAULT_CAPACITY: usize = 256;

// =============================================================================
// Delivery
// =============================================================================

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delivery {
    /// A committed change matching the subscription filter.
    Change(Arc<ChangeEvent>),
    /// Events were dropped because the queue was full. Local state may be
    /// stale; re-fetch before trusting it again.
    Resync { missed: u64 },
}

// =============================================================================
// Registry
// =============================================================================

struct Entry {
    filter: ChangeFilter,
    tx: mpsc::Sender<Delivery>,
    missed: u64,
}

impl Entry {
    /// Tries to hand over a pending resync notice. Returns false if the
    /// queue is still full.
    fn flush_missed(&mut self) -> Result<bool, ()> {
        if self.missed == 0 {
            return Ok(true);
        }
        match self.tx.try_send(Delivery::Resync {
            missed: self.missed,
        }) {
            Ok(()) => {
                self.missed = 0;
                Ok(true)
            }
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(()),
        }
    }
}

struct BusInner {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Entry>>,
}

impl BusInner {
    fn registry(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        // no code path panics while holding the lock
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        if self.registry().remove(&id).is_some() {
            debug!(subscription_id = id, "Subscription removed");
        }
    }
}

/// Cloneable handle to the bus; every clone shares one registry.
#[derive(Clone)]
pub struct ChangeBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("capacity", &self.inner.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        ChangeBus::new(DEFAULT_CAPACITY)
    }
}

impl ChangeBus {
    /// Creates a bus whose subscribers each buffer up to `capacity` deliveries.
    pub fn new(capacity: usize) -> Self {
        ChangeBus {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a filtered subscription.
    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        debug!(subscription_id = id, table = %filter.table, scope = ?filter.scope, "Subscribed");
        self.inner.registry().insert(
            id,
            Entry {
                filter,
                tx,
                missed: 0,
            },
        );

        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers an event to every matching subscriber.
    ///
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut closed = Vec::new();
        let mut registry = self.inner.registry();

        for (id, entry) in registry.iter_mut() {
            if !entry.filter.matches(&event) {
                continue;
            }

            match entry.flush_missed() {
                Err(()) => {
                    closed.push(*id);
                    continue;
                }
                Ok(false) => {
                    entry.missed += 1;
                    continue;
                }
                Ok(true) => {}
            }

            match entry.tx.try_send(Delivery::Change(Arc::clone(&event))) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    entry.missed += 1;
                    warn!(
                        subscription_id = *id,
                        seq = event.seq,
                        table = %event.table,
                        "Subscriber queue full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            registry.remove(&id);
            warn!(subscription_id = id, "Dropped closed subscription");
        }

        delivered
    }

    /// Hands pending resync notices to lagging subscribers that have room
    /// again. The relay calls this after each batch so a subscriber that
    /// lagged on the last event of a burst still hears about it.
    pub fn flush(&self) {
        let mut registry = self.inner.registry();
        registry.retain(|_, entry| entry.flush_missed().is_ok());
    }

    /// Live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().len()
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Receiving end of a subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Delivery>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next delivery. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Takes a delivery if one is queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    /// Drains everything currently queued.
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Some(delivery) = self.try_recv() {
            out.push(delivery);
        }
        out
    }

    /// Explicit form of dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tavola_core::{ChangeOperation, ChangeTable};

    fn event(seq: i64, table: ChangeTable, shop: &str, row: &str) -> ChangeEvent {
        ChangeEvent {
            seq,
            shop_id: shop.to_string(),
            table,
            row_id: row.to_string(),
            operation: ChangeOperation::Update,
            new_row: None,
            old_row: None,
            committed_at: Utc::now(),
        }
    }

    fn seqs(deliveries: &[Delivery]) -> Vec<i64> {
        deliveries
            .iter()
            .filter_map(|d| match d {
                Delivery::Change(e) => Some(e.seq),
                Delivery::Resync { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_filters_route_events() {
        let bus = ChangeBus::new(8);
        let mut kds = bus.subscribe(ChangeFilter::shop(ChangeTable::Orders, "s1"));
        let mut seat = bus.subscribe(ChangeFilter::row(ChangeTable::Tables, "t4"));

        bus.publish(event(1, ChangeTable::Orders, "s1", "o1"));
        bus.publish(event(2, ChangeTable::Orders, "s2", "o2"));
        bus.publish(event(3, ChangeTable::Tables, "s1", "t4"));
        bus.publish(event(4, ChangeTable::Tables, "s1", "t5"));

        assert_eq!(seqs(&kds.drain()), vec![1]);
        assert_eq!(seqs(&seat.drain()), vec![3]);
    }

    #[tokio::test]
    async fn test_order_is_preserved() {
        let bus = ChangeBus::new(16);
        let mut sub = bus.subscribe(ChangeFilter::row(ChangeTable::Orders, "o1"));
        for seq in 1..=5 {
            bus.publish(event(seq, ChangeTable::Orders, "s1", "o1"));
        }
        assert_eq!(seqs(&sub.drain()), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_overflow_sends_resync() {
        let bus = ChangeBus::new(2);
        let mut sub = bus.subscribe(ChangeFilter::shop(ChangeTable::Orders, "s1"));

        for seq in 1..=5 {
            bus.publish(event(seq, ChangeTable::Orders, "s1", "o1"));
        }
        // 1 and 2 fit; 3..5 were dropped
        let first = sub.drain();
        assert_eq!(seqs(&first), vec![1, 2]);

        bus.publish(event(6, ChangeTable::Orders, "s1", "o1"));
        let next = sub.drain();
        assert_eq!(next[0], Delivery::Resync { missed: 3 });
        assert_eq!(seqs(&next), vec![6]);
    }

    #[tokio::test]
    async fn test_flush_delivers_pending_resync() {
        let bus = ChangeBus::new(1);
        let mut sub = bus.subscribe(ChangeFilter::shop(ChangeTable::Orders, "s1"));
        bus.publish(event(1, ChangeTable::Orders, "s1", "o1"));
        bus.publish(event(2, ChangeTable::Orders, "s1", "o1"));

        assert_eq!(seqs(&sub.drain()), vec![1]);
        bus.flush();
        assert_eq!(sub.drain(), vec![Delivery::Resync { missed: 1 }]);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = ChangeBus::default();
        let a = bus.subscribe(ChangeFilter::shop(ChangeTable::Orders, "s1"));
        let b = bus.subscribe(ChangeFilter::shop(ChangeTable::Orders, "s1"));
        assert_eq!(bus.subscriber_count(), 2);

        drop(a);
        assert_eq!(bus.subscriber_count(), 1);
        b.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(event(1, ChangeTable::Orders, "s1", "o1")), 0);
    }

    #[tokio::test]
    async fn test_recv_ends_when_bus_dropped() {
        let bus = ChangeBus::new(4);
        let mut sub = bus.subscribe(ChangeFilter::shop(ChangeTable::Orders, "s1"));
        bus.publish(event(1, ChangeTable::Orders, "s1", "o1"));
        drop(bus);

        assert!(matches!(sub.recv().await, Some(Delivery::Change(_))));
        assert!(sub.recv().await.is_none());
    }
}
