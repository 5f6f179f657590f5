//! # Kitchen Board
//!
//! The kitchen display: open orders of one shop, with optimistic moves.
//!
//! A tap shows the next status at once; the command runs; success waits
//! for the change event to confirm it, failure rolls the card back and
//! re-fetches the board.

use tracing::{debug, warn};

use tavola_core::optimistic::Reconciled;
use tavola_core::{Actor, Order, OrderStatus};
use tavola_sync::{OrderBoard, Subscription};

use crate::commands::orders;
use crate::error::{EngineError, EngineResult};
use crate::Engine;

/// Order board kept in step with the bus.
pub struct KitchenBoard {
    shop_id: String,
    board: OrderBoard,
    subscription: Subscription,
}

impl std::fmt::Debug for KitchenBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KitchenBoard")
            .field("shop_id", &self.shop_id)
            .field("orders", &self.board.len())
            .finish()
    }
}

impl KitchenBoard {
    /// Subscribes, then loads the open orders.
    pub async fn open(engine: &Engine, shop_id: &str) -> EngineResult<Self> {
        let mut board = OrderBoard::new(shop_id, Vec::new());
        let subscription = engine.subscribe(board.filter());
        board.refetch(engine.db().orders().list_active(shop_id).await?);

        debug!(shop_id = %shop_id, orders = board.len(), "Kitchen board opened");
        Ok(KitchenBoard {
            shop_id: shop_id.to_string(),
            board,
            subscription,
        })
    }

    pub fn board(&self) -> &OrderBoard {
        &self.board
    }

    /// Applies queued deliveries; re-fetches when the board fell behind.
    pub async fn poll(&mut self, engine: &Engine) -> EngineResult<Vec<Reconciled<OrderStatus>>> {
        let mut outcomes = Vec::new();
        for delivery in self.subscription.drain() {
            if let Some(outcome) = self.board.apply(&delivery) {
                outcomes.push(outcome);
            }
        }

        if self.board.needs_refetch() {
            self.reload(engine).await?;
        }
        Ok(outcomes)
    }

    /// Advances an order from the board with an optimistic update.
    pub async fn advance(&mut self, engine: &Engine, order_id: &str, actor: &Actor) -> EngineResult<Order> {
        let shown = self
            .board
            .view()
            .into_iter()
            .find(|(order, _)| order.id == order_id)
            .map(|(_, status)| status);

        let next = match shown.and_then(|s| s.next()) {
            Some(next) => next,
            None => return Err(EngineError::not_found("Order on board", order_id)),
        };

        self.board.begin(order_id, next);
        match orders::advance(engine, order_id, actor).await {
            Ok(order) => {
                self.board.acknowledge(order_id);
                Ok(order)
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Advance failed, rolling back");
                self.board.fail(order_id);
                self.reload(engine).await?;
                Err(e)
            }
        }
    }

    async fn reload(&mut self, engine: &Engine) -> EngineResult<()> {
        let orders = engine.db().orders().list_active(&self.shop_id).await?;
        self.board.refetch(orders);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::orders::{place_order, OrderLine};
    use crate::test_support::{chef, engine, menu_item, waiter, SHOP};

    #[tokio::test]
    async fn test_board_follows_orders() {
        let engine = engine().await;
        let chai = menu_item(&engine, "Chai", 2000).await;
        let mut kds = KitchenBoard::open(&engine, SHOP).await.unwrap();
        assert!(kds.board().is_empty());

        let order = place_order(&engine, SHOP, None, &[OrderLine::new(&chai.id, 1)], &waiter())
            .await
            .unwrap();
        engine.publish_pending().await.unwrap();
        let outcomes = kds.poll(&engine).await.unwrap();
        assert_eq!(outcomes, vec![Reconciled::Applied]);
        assert_eq!(kds.board().column(OrderStatus::Queued).len(), 1);

        let moved = kds.advance(&engine, &order.id, &chef()).await.unwrap();
        assert_eq!(moved.status, OrderStatus::Preparing);
        assert_eq!(kds.board().column(OrderStatus::Preparing).len(), 1);

        engine.publish_pending().await.unwrap();
        kds.poll(&engine).await.unwrap();
        assert_eq!(kds.board().column(OrderStatus::Preparing)[0].sync_version, moved.sync_version);

        orders::cancel(&engine, &order.id, "Guest left", &waiter()).await.unwrap();
        engine.publish_pending().await.unwrap();
        kds.poll(&engine).await.unwrap();
        assert!(kds.board().is_empty());
    }

    #[tokio::test]
    async fn test_failed_advance_rolls_back() {
        let engine = engine().await;
        let chai = menu_item(&engine, "Chai", 2000).await;
        let order = place_order(&engine, SHOP, None, &[OrderLine::new(&chai.id, 1)], &waiter())
            .await
            .unwrap();
        let mut kds = KitchenBoard::open(&engine, SHOP).await.unwrap();

        let err = kds.advance(&engine, &order.id, &waiter()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
        assert_eq!(kds.board().column(OrderStatus::Queued).len(), 1);
        assert!(kds.board().column(OrderStatus::Preparing).is_empty());
        assert!(!kds.board().needs_refetch());

        let err = kds.advance(&engine, "missing", &chef()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
