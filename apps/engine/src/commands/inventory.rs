//! # Inventory Commands
//!
//! Order deduction and manual stock adjustments.
//!
//! ## Deduction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  order reaches stock-affecting status (inside its transaction)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT OR IGNORE inventory_deductions(order_id)                       │
//! │       │                                                                 │
//! │       ├── ignored  → already deducted, nothing to do                   │
//! │       │                                                                 │
//! │       └── inserted → recipes × line quantities, per ingredient         │
//! │                      one `order` adjustment each (reference = order)   │
//! │                      stock may go negative: the dish was served        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Manual adjustments (`adjust_stock`, `bulk_adjust`) never take stock
//! below zero and never use the `order` reason.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use tavola_core::inventory::{
    adjustment_notes, check_manual_adjustment, plan_deductions, stock_status, AdjustmentOutcome,
    AdjustmentReport, AdjustmentRequest, StockStatus,
};
use tavola_core::{
    Actor, AdjustmentReason, CoreError, InventoryAdjustment, InventoryItem, Order,
};
use tavola_db::repository::{inventory, menu};
use tavola_db::{commit, NewAdjustment};

use crate::error::EngineResult;
use crate::Engine;

// =============================================================================
// Deduction
// =============================================================================

/// Deducts an order's ingredients once. Returns the number of inventory
/// items touched (zero when the order was already deducted).
///
/// Runs on the caller's transaction.
pub(crate) async fn deduct_for_order(
    conn: &mut SqliteConnection,
    order: &Order,
    now: DateTime<Utc>,
) -> EngineResult<usize> {
    if !inventory::claim_deduction(conn, &order.id, now).await? {
        debug!(order_id = %order.id, "Stock already deducted for order");
        return Ok(0);
    }

    let menu_item_ids: Vec<String> = order
        .line_items
        .iter()
        .filter_map(|line| line.menu_item_id.clone())
        .collect();
    let recipes = menu::recipes_for(conn, &menu_item_ids).await?;
    let plan = plan_deductions(&order.line_items, &recipes);
    let notes = format!("Order #{}", order.order_number);

    for deduction in &plan {
        let item = inventory::fetch(conn, &deduction.inventory_item_id).await?;
        let (updated, _) = inventory::apply_adjustment(
            conn,
            &item,
            NewAdjustment {
                delta: -deduction.quantity,
                reason: AdjustmentReason::Order,
                notes: Some(&notes),
                reference_id: Some(&order.id),
                created_by: None,
            },
            now,
        )
        .await?;

        if updated.stock_quantity.is_negative() {
            warn!(
                order_id = %order.id,
                inventory_item_id = %updated.id,
                item = %updated.name,
                stock = %updated.stock_quantity,
                "Stock went negative on deduction"
            );
        }
    }

    info!(order_id = %order.id, shop_id = %order.shop_id, items = plan.len(), "Stock deducted");
    Ok(plan.len())
}

// =============================================================================
// Manual Adjustments
// =============================================================================

fn require_stock_role(actor: &Actor) -> EngineResult<()> {
    if actor.can_adjust_stock() {
        Ok(())
    } else {
        Err(CoreError::Forbidden {
            actor: actor.name.clone(),
            action: "adjust stock",
        }
        .into())
    }
}

/// Records one manual stock adjustment in its own transaction.
pub async fn adjust_stock(
    engine: &Engine,
    request: &AdjustmentRequest,
    actor: &Actor,
) -> EngineResult<InventoryAdjustment> {
    require_stock_role(actor)?;

    let mut tx = engine.db().begin().await?;
    let item = inventory::fetch(&mut tx, &request.inventory_item_id).await?;
    check_manual_adjustment(&item, request)?;

    let notes = adjustment_notes(request.notes.as_deref());
    let (_, adjustment) = inventory::apply_adjustment(
        &mut tx,
        &item,
        NewAdjustment {
            delta: request.delta,
            reason: request.reason,
            notes: Some(&notes),
            reference_id: None,
            created_by: Some(&actor.id),
        },
        Utc::now(),
    )
    .await?;
    commit(tx).await?;

    info!(
        inventory_item_id = %item.id,
        shop_id = %item.shop_id,
        delta = %request.delta,
        reason = %request.reason,
        new = %adjustment.new_quantity,
        "Stock adjusted"
    );
    Ok(adjustment)
}

/// Applies each entry independently and reports per entry.
///
/// One entry failing does not stop or undo the others. There is no
/// idempotency guard: submitting the same batch twice applies it twice.
pub async fn bulk_adjust(
    engine: &Engine,
    entries: &[AdjustmentRequest],
    actor: &Actor,
) -> EngineResult<Vec<AdjustmentReport>> {
    require_stock_role(actor)?;

    let mut reports = Vec::with_capacity(entries.len());
    for entry in entries {
        let outcome = match adjust_stock(engine, entry, actor).await {
            Ok(adjustment) => AdjustmentOutcome::Applied {
                new_quantity: adjustment.new_quantity,
            },
            Err(e) => {
                debug!(inventory_item_id = %entry.inventory_item_id, error = %e, "Bulk entry rejected");
                AdjustmentOutcome::Rejected {
                    error: e.to_string(),
                }
            }
        };
        reports.push(AdjustmentReport {
            inventory_item_id: entry.inventory_item_id.clone(),
            outcome,
        });
    }

    let applied = reports.iter().filter(|r| r.is_applied()).count();
    info!(entries = entries.len(), applied, "Bulk adjustment finished");
    Ok(reports)
}

// =============================================================================
// Stock Status
// =============================================================================

/// An item at or below its reorder threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockAlert {
    pub item: InventoryItem,
    pub status: StockStatus,
}

/// Items of a shop that are low or out, out-of-stock first.
pub async fn low_stock(engine: &Engine, shop_id: &str) -> EngineResult<Vec<StockAlert>> {
    let mut alerts: Vec<StockAlert> = engine
        .db()
        .inventory()
        .list_by_shop(shop_id)
        .await?
        .into_iter()
        .filter_map(|item| match stock_status(&item) {
            StockStatus::Ok => None,
            status => Some(StockAlert { item, status }),
        })
        .collect();

    alerts.sort_by_key(|a| (a.status != StockStatus::Out, a.item.stock_quantity));
    Ok(alerts)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::test_support::{admin, chef, engine, menu_item, stock, waiter, SHOP};
    use tavola_core::{LineItem, Money, Quantity, EOD_RECONCILIATION_NOTES};

    fn request(item: &InventoryItem, milli: i64, reason: AdjustmentReason) -> AdjustmentRequest {
        AdjustmentRequest {
            inventory_item_id: item.id.clone(),
            delta: Quantity::from_milli(milli),
            reason,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_adjust_stock_records_ledger_row() {
        let engine = engine().await;
        let rice = stock(&engine, "Rice", 5000).await;

        let adj = adjust_stock(&engine, &request(&rice, -1500, AdjustmentReason::Wastage), &chef())
            .await
            .unwrap();

        assert_eq!(adj.previous_quantity, Quantity::from_milli(5000));
        assert_eq!(adj.new_quantity, Quantity::from_milli(3500));
        assert_eq!(adj.notes.as_deref(), Some(EOD_RECONCILIATION_NOTES));
        assert_eq!(adj.created_by.as_deref(), Some("u-chef"));

        let stored = engine.db().inventory().get_by_id(&rice.id).await.unwrap();
        assert_eq!(stored.stock_quantity, Quantity::from_milli(3500));
    }

    #[tokio::test]
    async fn test_manual_adjustment_cannot_go_negative() {
        let engine = engine().await;
        let rice = stock(&engine, "Rice", 1000).await;

        let err = adjust_stock(&engine, &request(&rice, -2000, AdjustmentReason::Correction), &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let stored = engine.db().inventory().get_by_id(&rice.id).await.unwrap();
        assert_eq!(stored.stock_quantity, Quantity::from_milli(1000));
    }

    #[tokio::test]
    async fn test_order_reason_and_waiter_are_refused() {
        let engine = engine().await;
        let rice = stock(&engine, "Rice", 1000).await;

        let err = adjust_stock(&engine, &request(&rice, -100, AdjustmentReason::Order), &chef())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = adjust_stock(&engine, &request(&rice, 100, AdjustmentReason::Restock), &waiter())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_bulk_adjust_reports_each_entry() {
        let engine = engine().await;
        let rice = stock(&engine, "Rice", 2000).await;
        let oil = stock(&engine, "Oil", 1000).await;

        let mut restock = request(&oil, 3000, AdjustmentReason::Restock);
        restock.notes = Some("Tuesday delivery".into());
        let entries = vec![
            request(&rice, -500, AdjustmentReason::Wastage),
            request(&oil, -5000, AdjustmentReason::Theft),
            restock,
            AdjustmentRequest {
                inventory_item_id: "missing".into(),
                delta: Quantity::from_milli(1),
                reason: AdjustmentReason::Other,
                notes: None,
            },
        ];

        let reports = bulk_adjust(&engine, &entries, &admin()).await.unwrap();
        assert_eq!(reports.len(), 4);
        assert_eq!(
            reports[0].outcome,
            AdjustmentOutcome::Applied {
                new_quantity: Quantity::from_milli(1500)
            }
        );
        assert!(!reports[1].is_applied());
        assert_eq!(
            reports[2].outcome,
            AdjustmentOutcome::Applied {
                new_quantity: Quantity::from_milli(4000)
            }
        );
        assert!(!reports[3].is_applied());

        let oil_ledger = engine.db().inventory().adjustments_for_item(&oil.id).await.unwrap();
        assert!(oil_ledger
            .iter()
            .any(|a| a.notes.as_deref() == Some("Tuesday delivery")));
    }

    #[tokio::test]
    async fn test_bulk_adjust_repeats_are_applied_twice() {
        let engine = engine().await;
        let rice = stock(&engine, "Rice", 2000).await;
        let batch = vec![request(&rice, -500, AdjustmentReason::Usage)];

        bulk_adjust(&engine, &batch, &admin()).await.unwrap();
        bulk_adjust(&engine, &batch, &admin()).await.unwrap();

        let stored = engine.db().inventory().get_by_id(&rice.id).await.unwrap();
        assert_eq!(stored.stock_quantity, Quantity::from_milli(1000));
    }

    #[tokio::test]
    async fn test_deduction_runs_once_and_may_go_negative() {
        let engine = engine().await;
        let paneer = stock(&engine, "Paneer", 300).await;
        let tikka = menu_item(&engine, "Paneer Tikka", 25000).await;
        engine
            .db()
            .menu()
            .set_recipe(&tikka.id, &[(paneer.id.clone(), Quantity::from_milli(200))])
            .await
            .unwrap();

        let now = Utc::now();
        let order = Order {
            id: "ord-x".into(),
            shop_id: SHOP.into(),
            table_id: None,
            order_number: 7,
            status: tavola_core::OrderStatus::Served,
            service_type: Default::default(),
            line_items: vec![LineItem {
                menu_item_id: Some(tikka.id.clone()),
                name: tikka.name.clone(),
                unit_price: tikka.price,
                quantity: 2,
                note: None,
            }],
            packaging_charge: Money::zero(),
            delivery_fee: Money::zero(),
            total_amount: tikka.price.multiply_quantity(2),
            payment_status: Default::default(),
            payment_method: None,
            breakdown: None,
            is_staff_order: true,
            staff_name: Some("Asha".into()),
            customer_session_id: None,
            customer_name: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            ready_at: None,
            served_at: Some(now),
            billed_at: None,
            sync_version: 1,
        };

        let mut tx = engine.db().begin().await.unwrap();
        tavola_db::repository::orders::insert(&mut tx, &order).await.unwrap();
        assert_eq!(deduct_for_order(&mut tx, &order, now).await.unwrap(), 1);
        assert_eq!(deduct_for_order(&mut tx, &order, now).await.unwrap(), 0);
        commit(tx).await.unwrap();

        let stored = engine.db().inventory().get_by_id(&paneer.id).await.unwrap();
        assert_eq!(stored.stock_quantity, Quantity::from_milli(-100));
        let ledger = engine
            .db()
            .inventory()
            .adjustments_for_reference("ord-x")
            .await
            .unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].reason, AdjustmentReason::Order);
    }

    #[tokio::test]
    async fn test_low_stock_lists_low_and_out() {
        let engine = engine().await;
        stock(&engine, "Rice", 5000).await;
        let oil = stock(&engine, "Oil", 400).await;
        let salt = stock(&engine, "Salt", 0).await;

        let alerts = low_stock(&engine, SHOP).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].item.id, salt.id);
        assert_eq!(alerts[0].status, StockStatus::Out);
        assert_eq!(alerts[1].item.id, oil.id);
        assert_eq!(alerts[1].status, StockStatus::Low);
    }
}
