//! # Order Commands
//!
//! The order state machine as seen by callers.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  place_order ─▶ QUEUED ─▶ PREPARING ─▶ READY ─▶ SERVED ─▶ BILLED       │
//! │                   │  ◀──────  │  ◀──────  │     advance     bill /      │
//! │                   │  retreat  │  retreat  │                 settle_table│
//! │                   ▼           ▼                                         │
//! │                CANCELLED ◀────┘   (cancel: queued or preparing only)    │
//! │                                                                         │
//! │  Arriving at the stock-affecting status (served by default, or billed) │
//! │  deducts inventory once per order, inside the same transaction.        │
//! │                                                                         │
//! │  Takeaway and delivery orders fix their packaging and delivery         │
//! │  charges at placement; billing adds them to the grand total.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every command is one transaction. A refused move changes nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;
use uuid::Uuid;

use tavola_core::billing::{self, Adjustments, OrderCharges};
use tavola_core::order_flow::{apply_transition, check_advance, check_bill, check_cancel, check_retreat};
use tavola_core::session;
use tavola_core::validation::{validate_item_quantity, validate_notes};
use tavola_core::{
    Actor, Bill, CoreError, DiningTable, LineItem, MenuItem, Money, Order, OrderStatus,
    PaymentMethod, PaymentStatus, ServiceType, StockAffectingStatus, TableStatus,
    ValidationError,
};
use tavola_db::repository::bills::{self as bill_rows, format_bill_number};
use tavola_db::repository::{menu, orders, settings, tables};
use tavola_db::commit;

use super::inventory::deduct_for_order;
use super::tables::clear_in;
use super::with_concurrency_policy;
use crate::error::{EngineError, EngineResult};
use crate::Engine;

// =============================================================================
// Requests & Results
// =============================================================================

/// One line of an order as the device sends it. Name and price come from
/// the menu at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub menu_item_id: String,
    pub quantity: i64,
    pub note: Option<String>,
}

impl OrderLine {
    pub fn new(menu_item_id: impl Into<String>, quantity: i64) -> Self {
        OrderLine {
            menu_item_id: menu_item_id.into(),
            quantity,
            note: None,
        }
    }
}

/// What the counter enters when closing a bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillRequest {
    pub payment_method: PaymentMethod,
    /// Flat discount off the tax-exclusive subtotal.
    pub discount: Option<Money>,
    pub discount_reason: Option<String>,
    #[serde(default)]
    pub waive_service_charge: bool,
}

impl BillRequest {
    pub fn new(payment_method: PaymentMethod) -> Self {
        BillRequest {
            payment_method,
            discount: None,
            discount_reason: None,
            waive_service_charge: false,
        }
    }

    /// Only dine-in bills carry a service charge.
    fn adjustments(&self, dine_in: bool, charges: OrderCharges) -> Adjustments {
        Adjustments {
            discount: self.discount.unwrap_or_else(Money::zero),
            discount_reason: self.discount_reason.clone(),
            include_service_charge: !self.waive_service_charge && dine_in,
            charges,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleRequest {
    pub bill: BillRequest,
    /// Empty the table once its orders are paid.
    #[serde(default)]
    pub clear_table: bool,
}

/// A closed bill and everything it touched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub bill: Bill,
    /// The billed orders, as stored.
    pub orders: Vec<Order>,
    /// The table after clearing, when it was cleared.
    pub table: Option<DiningTable>,
}

// =============================================================================
// Place Order
// =============================================================================

/// Places an order in `queued`: dine-in at `table_id`, or takeaway when
/// there is no table.
///
/// ## Rules
/// - A table order from a customer needs a session seated at that table
/// - Staff orders are flagged with the staff member's name
/// - Takeaway orders (`table_id = None`) are staff-only
/// - Each line: item exists in the shop, is available, quantity within
///   the shop cap and the item's own cap
///
/// The stored total is provisional (current policy, no adjustments); the
/// breakdown is fixed only when the order is billed.
pub async fn place_order(
    engine: &Engine,
    shop_id: &str,
    table_id: Option<&str>,
    lines: &[OrderLine],
    actor: &Actor,
) -> EngineResult<Order> {
    let service_type = match table_id {
        Some(_) => ServiceType::DineIn,
        None => ServiceType::Takeaway,
    };
    place_service_order(engine, shop_id, table_id, service_type, lines, actor).await
}

/// Places an order of an explicit service type.
///
/// Dine-in needs a table. Takeaway and delivery are staff-only, have no
/// table, and carry the shop's packaging charge (plus the delivery fee
/// for delivery), fixed here against the item total.
pub async fn place_service_order(
    engine: &Engine,
    shop_id: &str,
    table_id: Option<&str>,
    service_type: ServiceType,
    lines: &[OrderLine],
    actor: &Actor,
) -> EngineResult<Order> {
    if lines.is_empty() {
        return Err(ValidationError::Required {
            field: "line_items".to_string(),
        }
        .into());
    }

    if service_type.is_dine_in() && table_id.is_none() {
        return Err(EngineError::validation("dine-in orders need a table"));
    }
    if !service_type.is_dine_in() && table_id.is_some() {
        return Err(EngineError::validation(format!(
            "{} orders are not placed at a table",
            service_type
        )));
    }

    with_concurrency_policy(engine, || {
        insert_order(engine, shop_id, table_id, service_type, lines, actor)
    })
    .await
}

async fn insert_order(
    engine: &Engine,
    shop_id: &str,
    table_id: Option<&str>,
    service_type: ServiceType,
    lines: &[OrderLine],
    actor: &Actor,
) -> EngineResult<Order> {
    let now = Utc::now();
    let mut tx = engine.db().begin().await?;
    let shop = settings::fetch(&mut tx, shop_id).await?;

    let (customer_session_id, customer_name) = match table_id {
        Some(table_id) => {
            let table = tables::fetch(&mut tx, table_id).await?;
            if table.shop_id != shop_id {
                return Err(EngineError::not_found("Table", table_id));
            }
            seat_for(&table, actor)?
        }
        None if actor.is_staff() => (None, None),
        None => {
            return Err(CoreError::Forbidden {
                actor: actor.name.clone(),
                action: "place takeaway or delivery orders",
            }
            .into())
        }
    };

    let ids: Vec<String> = lines.iter().map(|l| l.menu_item_id.clone()).collect();
    let menu_items = menu::fetch_many(&mut tx, shop_id, &ids).await?;
    let line_items = lines
        .iter()
        .map(|line| snapshot_line(line, &menu_items, shop.max_item_quantity))
        .collect::<EngineResult<Vec<_>>>()?;

    let item_total: Money = line_items.iter().map(LineItem::line_total).sum();
    let charges = shop.charges_for(service_type, item_total);
    let provisional = billing::provisional(&line_items, &shop.billing_policy(), service_type, charges);
    let order = Order {
        id: Uuid::new_v4().to_string(),
        shop_id: shop_id.to_string(),
        table_id: table_id.map(str::to_string),
        order_number: orders::next_order_number(&mut tx, shop_id).await?,
        status: OrderStatus::Queued,
        service_type,
        line_items,
        packaging_charge: charges.packaging,
        delivery_fee: charges.delivery,
        total_amount: provisional.grand_total,
        payment_status: PaymentStatus::Pending,
        payment_method: None,
        breakdown: None,
        is_staff_order: actor.is_staff(),
        staff_name: actor.is_staff().then(|| actor.name.clone()),
        customer_session_id,
        customer_name,
        cancel_reason: None,
        created_at: now,
        updated_at: now,
        ready_at: None,
        served_at: None,
        billed_at: None,
        sync_version: 1,
    };

    orders::insert(&mut tx, &order).await?;
    commit(tx).await?;

    info!(
        order_id = %order.id,
        shop_id = %order.shop_id,
        table_id = ?order.table_id,
        service_type = %order.service_type,
        order_number = order.order_number,
        lines = order.line_items.len(),
        total = %order.total_amount,
        "Order placed"
    );
    Ok(order)
}

/// Session id and display name a customer order is recorded under.
fn seat_for(table: &DiningTable, actor: &Actor) -> EngineResult<(Option<String>, Option<String>)> {
    if actor.is_staff() {
        return Ok((None, None));
    }

    let session_id = actor.session_id.as_deref().unwrap_or_default();
    session::require_session(table, session_id)?;
    let name = session::find_session(table, session_id).map(|s| s.display_name.clone());
    Ok((Some(session_id.to_string()), name))
}

/// Freezes one requested line against the current menu.
fn snapshot_line(line: &OrderLine, menu_items: &[MenuItem], shop_max: i64) -> EngineResult<LineItem> {
    let item = menu_items
        .iter()
        .find(|m| m.id == line.menu_item_id)
        .ok_or_else(|| EngineError::not_found("MenuItem", &line.menu_item_id))?;

    if !item.is_available {
        return Err(CoreError::ItemUnavailable {
            item: item.name.clone(),
        }
        .into());
    }

    validate_item_quantity(line.quantity)?;
    let max = item.max_quantity.map_or(shop_max, |own| own.min(shop_max));
    if line.quantity > max {
        return Err(CoreError::QuantityTooLarge {
            item: item.name.clone(),
            requested: line.quantity,
            max,
        }
        .into());
    }

    let note = line
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    if let Some(note) = note {
        validate_notes(note)?;
    }

    Ok(LineItem {
        menu_item_id: Some(item.id.clone()),
        name: item.name.clone(),
        unit_price: item.effective_price(),
        quantity: line.quantity,
        note: note.map(str::to_string),
    })
}

// =============================================================================
// Status Moves
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Step<'a> {
    Advance,
    Retreat,
    Cancel(&'a str),
}

impl Step<'_> {
    fn name(&self) -> &'static str {
        match self {
            Step::Advance => "advance",
            Step::Retreat => "retreat",
            Step::Cancel(_) => "cancel",
        }
    }
}

/// Moves an order to its next status.
///
/// Reaching the stock-affecting status deducts inventory once.
pub async fn advance(engine: &Engine, order_id: &str, actor: &Actor) -> EngineResult<Order> {
    with_concurrency_policy(engine, || move_order(engine, order_id, actor, Step::Advance, None)).await
}

/// Like [`advance`], but only if the stored version is `expected_version`.
pub async fn advance_if_version(
    engine: &Engine,
    order_id: &str,
    actor: &Actor,
    expected_version: i64,
) -> EngineResult<Order> {
    move_order(engine, order_id, actor, Step::Advance, Some(expected_version)).await
}

/// Moves an order back one status (`preparing → queued`, `ready → preparing`).
pub async fn retreat(engine: &Engine, order_id: &str, actor: &Actor) -> EngineResult<Order> {
    with_concurrency_policy(engine, || move_order(engine, order_id, actor, Step::Retreat, None)).await
}

/// Cancels a queued or preparing order. Never deducts stock.
///
/// When this was the table's last open order, the table is emptied in the
/// same transaction (`orders.free_table_on_last_cancel`).
pub async fn cancel(
    engine: &Engine,
    order_id: &str,
    reason: &str,
    actor: &Actor,
) -> EngineResult<Order> {
    with_concurrency_policy(engine, || {
        move_order(engine, order_id, actor, Step::Cancel(reason), None)
    })
    .await
}

async fn move_order(
    engine: &Engine,
    order_id: &str,
    actor: &Actor,
    step: Step<'_>,
    expected_version: Option<i64>,
) -> EngineResult<Order> {
    let now = Utc::now();
    let mut tx = engine.db().begin().await?;
    let before = orders::fetch(&mut tx, order_id).await?;

    if let Some(expected) = expected_version {
        if before.sync_version != expected {
            return Err(EngineError::ConcurrencyConflict(format!(
                "Order {} is at version {}, expected {}",
                order_id, before.sync_version, expected
            )));
        }
    }

    let mut after = before.clone();
    match step {
        Step::Advance => {
            let to = check_advance(&before, actor)?;
            apply_transition(&mut after, to, now);
        }
        Step::Retreat => {
            let to = check_retreat(&before, actor)?;
            apply_transition(&mut after, to, now);
        }
        Step::Cancel(reason) => {
            let reason = check_cancel(&before, actor, reason)?;
            apply_transition(&mut after, OrderStatus::Cancelled, now);
            after.cancel_reason = Some(reason);
        }
    }

    let after = orders::update(&mut tx, &before, after).await?;
    let config = &engine.config().orders;

    if matches!(step, Step::Advance) && config.stock_affecting_status.triggers_on(after.status) {
        deduct_for_order(&mut tx, &after, now).await?;
    }

    if matches!(step, Step::Cancel(_)) && config.free_table_on_last_cancel {
        if let Some(table_id) = &after.table_id {
            free_table_if_idle(&mut tx, table_id, now).await?;
        }
    }

    commit(tx).await?;

    info!(
        order_id = %after.id,
        shop_id = %after.shop_id,
        action = step.name(),
        from = %before.status,
        to = %after.status,
        actor = %actor.name,
        "Order status changed"
    );
    Ok(after)
}

/// Empties a table that has no open orders left.
async fn free_table_if_idle(
    conn: &mut SqliteConnection,
    table_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    if !orders::open_for_table(conn, table_id).await?.is_empty() {
        return Ok(());
    }

    let table = tables::fetch(conn, table_id).await?;
    if table.active_sessions.is_empty() && table.status == TableStatus::Empty {
        return Ok(());
    }

    clear_in(conn, &table, now).await?;
    info!(table_id = %table_id, "Table freed after its last open order was cancelled");
    Ok(())
}

// =============================================================================
// Billing
// =============================================================================

/// Bills one served order.
///
/// The breakdown is computed with the policy in effect now and stored on
/// the order; later settings changes never alter it.
pub async fn bill(
    engine: &Engine,
    order_id: &str,
    request: &BillRequest,
    actor: &Actor,
) -> EngineResult<Settlement> {
    let now = Utc::now();
    let mut tx = engine.db().begin().await?;
    let order = orders::fetch(&mut tx, order_id).await?;
    check_bill(&order, actor)?;

    let table_id = order.table_id.clone();
    let stock_status = engine.config().orders.stock_affecting_status;
    let (bill, orders) = close_orders(&mut tx, vec![order], table_id, request, stock_status, now).await?;
    commit(tx).await?;

    Ok(Settlement {
        bill,
        orders,
        table: None,
    })
}

/// Bills every served order of a table into one bill.
///
/// Refused while anything on the table is still with the kitchen, or when
/// there is nothing served to bill.
pub async fn settle_table(
    engine: &Engine,
    table_id: &str,
    request: &SettleRequest,
    actor: &Actor,
) -> EngineResult<Settlement> {
    if !actor.can_bill() {
        return Err(CoreError::Forbidden {
            actor: actor.name.clone(),
            action: "settle tables",
        }
        .into());
    }

    let now = Utc::now();
    let mut tx = engine.db().begin().await?;
    let table = tables::fetch(&mut tx, table_id).await?;
    let open = orders::open_for_table(&mut tx, table_id).await?;

    if let Some(pending) = open.iter().find(|o| o.status.is_in_kitchen()) {
        return Err(CoreError::InvalidTransition {
            order_id: pending.id.clone(),
            from: pending.status,
            action: "settle",
        }
        .into());
    }
    if open.is_empty() {
        return Err(EngineError::InvalidTransition(format!(
            "Table {} has no served orders to settle",
            table.label
        )));
    }
    for order in &open {
        check_bill(order, actor)?;
    }

    let stock_status = engine.config().orders.stock_affecting_status;
    let (bill, orders) = close_orders(
        &mut tx,
        open,
        Some(table.id.clone()),
        &request.bill,
        stock_status,
        now,
    )
    .await?;

    let table = if request.clear_table {
        Some(clear_in(&mut tx, &table, now).await?)
    } else {
        None
    };
    commit(tx).await?;

    info!(
        table_id = %table_id,
        bill_number = %bill.bill_number,
        orders = orders.len(),
        cleared = table.is_some(),
        "Table settled"
    );
    Ok(Settlement { bill, orders, table })
}

/// Moves checked orders to `billed` and writes their bill.
///
/// A single-order bill stores the same breakdown on the order and the
/// bill. When several orders share a bill, the discount is applied to the
/// bill only and each order keeps its undiscounted breakdown.
async fn close_orders(
    conn: &mut SqliteConnection,
    open: Vec<Order>,
    table_id: Option<String>,
    request: &BillRequest,
    stock_status: StockAffectingStatus,
    now: DateTime<Utc>,
) -> EngineResult<(Bill, Vec<Order>)> {
    let shop_id = match open.first() {
        Some(order) => order.shop_id.clone(),
        None => return Err(EngineError::validation("nothing to bill")),
    };
    let policy = settings::fetch(conn, &shop_id).await?.billing_policy();

    let dine_in = open.iter().any(|o| o.service_type.is_dine_in());
    let charges = open
        .iter()
        .map(Order::charges)
        .fold(OrderCharges::default(), |sum, c| sum + c);
    let bill_adjustments = request.adjustments(dine_in, charges);
    let shared = open.len() > 1;

    let items: Vec<LineItem> = open
        .iter()
        .flat_map(|o| o.line_items.iter().cloned())
        .collect();
    let bill_breakdown = billing::calculate_with(&items, &policy, &bill_adjustments)?;

    let mut billed = Vec::with_capacity(open.len());
    for before in open {
        let order_adjustments = if shared {
            Adjustments {
                discount: Money::zero(),
                discount_reason: None,
                charges: before.charges(),
                ..bill_adjustments.clone()
            }
        } else {
            bill_adjustments.clone()
        };
        let breakdown = billing::calculate_with(&before.line_items, &policy, &order_adjustments)?;
        let mut after = before.clone();
        apply_transition(&mut after, OrderStatus::Billed, now);
        after.total_amount = breakdown.grand_total;
        after.breakdown = Some(breakdown);
        after.payment_status = PaymentStatus::Paid;
        after.payment_method = Some(request.payment_method);

        let after = orders::update(conn, &before, after).await?;
        if stock_status.triggers_on(OrderStatus::Billed) {
            deduct_for_order(conn, &after, now).await?;
        }
        billed.push(after);
    }

    let seq = bill_rows::next_bill_seq(conn, &shop_id).await?;
    let bill = Bill {
        id: Uuid::new_v4().to_string(),
        shop_id,
        bill_number: format_bill_number(seq),
        table_id,
        order_ids: billed.iter().map(|o| o.id.clone()).collect(),
        items_snapshot: items,
        total_amount: bill_breakdown.grand_total,
        breakdown: Some(bill_breakdown),
        payment_method: request.payment_method,
        created_at: now,
    };
    bill_rows::insert(conn, seq, &bill).await?;

    Ok((bill, billed))
}

// =============================================================================
// Unit Tests
// =============================================================================
