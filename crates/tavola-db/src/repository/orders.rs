//! # Order Repository
//!
//! Order rows: placement, status writes and the views the kitchen display
//! and the table screens read.
//!
//! ## Order Numbers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  next_order_number(shop) = MAX(order_number) + 1, read inside the      │
//! │  placing transaction. UNIQUE(shop_id, order_number) turns the rare     │
//! │  race between two writers into a retryable UniqueViolation instead     │
//! │  of two tickets with the same number.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use super::{change_log, from_json, parse_text, to_json};
use crate::error::{DbError, DbResult};
use tavola_core::{BillingBreakdown, ChangeOperation, LineItem, Money, Order, RowImage};

#[derive(Debug, FromRow)]
struct OrderRow {
    id: String,
    shop_id: String,
    table_id: Option<String>,
    order_number: i64,
    status: String,
    service_type: String,
    line_items: String,
    packaging_cents: i64,
    delivery_fee_cents: i64,
    total_cents: i64,
    payment_status: String,
    payment_method: Option<String>,
    breakdown: Option<String>,
    is_staff_order: bool,
    staff_name: Option<String>,
    customer_session_id: Option<String>,
    customer_name: Option<String>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    ready_at: Option<DateTime<Utc>>,
    served_at: Option<DateTime<Utc>>,
    billed_at: Option<DateTime<Utc>>,
    sync_version: i64,
}

impl TryFrom<OrderRow> for Order {
    type Error = DbError;

    fn try_from(row: OrderRow) -> DbResult<Self> {
        let line_items: Vec<LineItem> = from_json("orders", "line_items", &row.line_items)?;
        let breakdown: Option<BillingBreakdown> = row
            .breakdown
            .as_deref()
            .map(|json| from_json("orders", "breakdown", json))
            .transpose()?;
        let payment_method = row
            .payment_method
            .as_deref()
            .map(|text| parse_text("orders", text))
            .transpose()?;

        Ok(Order {
            id: row.id,
            shop_id: row.shop_id,
            table_id: row.table_id,
            order_number: row.order_number,
            status: parse_text("orders", &row.status)?,
            service_type: parse_text("orders", &row.service_type)?,
            line_items,
            packaging_charge: Money::from_cents(row.packaging_cents),
            delivery_fee: Money::from_cents(row.delivery_fee_cents),
            total_amount: Money::from_cents(row.total_cents),
            payment_status: parse_text("orders", &row.payment_status)?,
            payment_method,
            breakdown,
            is_staff_order: row.is_staff_order,
            staff_name: row.staff_name,
            customer_session_id: row.customer_session_id,
            customer_name: row.customer_name,
            cancel_reason: row.cancel_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            ready_at: row.ready_at,
            served_at: row.served_at,
            billed_at: row.billed_at,
            sync_version: row.sync_version,
        })
    }
}

const SELECT_ORDER: &str = r#"
    SELECT id, shop_id, table_id, order_number, status, service_type, line_items,
           packaging_cents, delivery_fee_cents, total_cents, payment_status, payment_method, breakdown, is_staff_order, staff_name,
           customer_session_id, customer_name, cancel_reason, created_at, updated_at,
           ready_at, served_at, billed_at, sync_version
    FROM orders
"#;

fn decode_rows(rows: Vec<OrderRow>) -> DbResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

// =============================================================================
// Transaction Functions
// =============================================================================

pub async fn fetch(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Order> {
    sqlx::query_as::<_, OrderRow>(&format!("{} WHERE id = ?1", SELECT_ORDER))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Order", order_id))?
        .try_into()
}

/// Next per-shop ticket number.
pub async fn next_order_number(conn: &mut SqliteConnection, shop_id: &str) -> DbResult<i64> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(order_number) FROM orders WHERE shop_id = ?1")
            .bind(shop_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(max.unwrap_or(0) + 1)
}

pub async fn insert(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, shop_id, table_id, order_number, status, service_type, line_items,
            packaging_cents, delivery_fee_cents, total_cents, payment_status,
            payment_method, breakdown, is_staff_order, staff_name, customer_session_id,
            customer_name, cancel_reason, created_at, updated_at, ready_at, served_at,
            billed_at, sync_version
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
            ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
        )
        "#,
    )
    .bind(&order.id)
    .bind(&order.shop_id)
    .bind(&order.table_id)
    .bind(order.order_number)
    .bind(order.status)
    .bind(order.service_type)
    .bind(to_json(&order.line_items)?)
    .bind(order.packaging_charge.cents())
    .bind(order.delivery_fee.cents())
    .bind(order.total_amount.cents())
    .bind(order.payment_status)
    .bind(order.payment_method)
    .bind(order.breakdown.as_ref().map(to_json).transpose()?)
    .bind(order.is_staff_order)
    .bind(&order.staff_name)
    .bind(&order.customer_session_id)
    .bind(&order.customer_name)
    .bind(&order.cancel_reason)
    .bind(order.created_at)
    .bind(order.updated_at)
    .bind(order.ready_at)
    .bind(order.served_at)
    .bind(order.billed_at)
    .bind(order.sync_version)
    .execute(&mut *conn)
    .await?;

    change_log::append(
        conn,
        ChangeOperation::Insert,
        Some(&RowImage::Order(order.clone())),
        None,
    )
    .await?;

    debug!(order_id = %order.id, order_number = order.order_number, "Order inserted");
    Ok(())
}

/// Writes `after` over `before` and logs the change.
///
/// Line items and placement fields are immutable; only lifecycle columns
/// are written. Guarded on `before.sync_version`.
pub async fn update(
    conn: &mut SqliteConnection,
    before: &Order,
    mut after: Order,
) -> DbResult<Order> {
    let result = sqlx::query(
        r#"
        UPDATE orders SET
            status = ?2,
            total_cents = ?3,
            payment_status = ?4,
            payment_method = ?5,
            breakdown = ?6,
            cancel_reason = ?7,
            updated_at = ?8,
            ready_at = ?9,
            served_at = ?10,
            billed_at = ?11,
            sync_version = sync_version + 1
        WHERE id = ?1 AND sync_version = ?12
        "#,
    )
    .bind(&after.id)
    .bind(after.status)
    .bind(after.total_amount.cents())
    .bind(after.payment_status)
    .bind(after.payment_method)
    .bind(after.breakdown.as_ref().map(to_json).transpose()?)
    .bind(&after.cancel_reason)
    .bind(after.updated_at)
    .bind(after.ready_at)
    .bind(after.served_at)
    .bind(after.billed_at)
    .bind(before.sync_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::StaleVersion {
            entity: "Order".to_string(),
            id: before.id.clone(),
            expected: before.sync_version,
        });
    }

    after.sync_version = before.sync_version + 1;
    change_log::append(
        conn,
        ChangeOperation::Update,
        Some(&RowImage::Order(after.clone())),
        Some(&RowImage::Order(before.clone())),
    )
    .await?;

    debug!(
        order_id = %after.id,
        from = %before.status,
        to = %after.status,
        version = after.sync_version,
        "Order updated"
    );
    Ok(after)
}

/// Orders of a table that are neither billed nor cancelled, oldest first.
pub async fn open_for_table(conn: &mut SqliteConnection, table_id: &str) -> DbResult<Vec<Order>> {
    let rows = sqlx::query_as::<_, OrderRow>(&format!(
        "{} WHERE table_id = ?1 AND status NOT IN ('billed', 'cancelled') ORDER BY order_number",
        SELECT_ORDER
    ))
    .bind(table_id)
    .fetch_all(&mut *conn)
    .await?;
    decode_rows(rows)
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    pub async fn get_by_id(&self, order_id: &str) -> DbResult<Order> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, order_id).await
    }

    /// Kitchen display feed: everything still open, oldest ticket first.
    pub async fn list_active(&self, shop_id: &str) -> DbResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "{} WHERE shop_id = ?1 AND status NOT IN ('billed', 'cancelled') ORDER BY order_number",
            SELECT_ORDER
        ))
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;
        decode_rows(rows)
    }

    /// Every order ever placed at a table, oldest first.
    pub async fn list_for_table(&self, table_id: &str) -> DbResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "{} WHERE table_id = ?1 ORDER BY order_number",
            SELECT_ORDER
        ))
        .bind(table_id)
        .fetch_all(&self.pool)
        .await?;
        decode_rows(rows)
    }

    /// Orders a customer session placed.
    pub async fn list_for_session(&self, session_id: &str) -> DbResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "{} WHERE customer_session_id = ?1 ORDER BY order_number",
            SELECT_ORDER
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        decode_rows(rows)
    }

    pub async fn open_for_table(&self, table_id: &str) -> DbResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        open_for_table(&mut conn, table_id).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::commit;
    use crate::repository::test_support::{seed_shop, seed_table};
    use crate::{Database, DbConfig};
    use tavola_core::{OrderStatus, PaymentStatus, ServiceType};
    use uuid::Uuid;

    fn new_order(shop_id: &str, table_id: Option<&str>, number: i64) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4().to_string(),
            shop_id: shop_id.to_string(),
            table_id: table_id.map(str::to_string),
            order_number: number,
            status: OrderStatus::Queued,
            service_type: ServiceType::DineIn,
            line_items: vec![LineItem {
                menu_item_id: None,
                name: "Masala Dosa".to_string(),
                unit_price: Money::from_cents(12000),
                quantity: 2,
                note: Some("extra chutney".to_string()),
            }],
            packaging_charge: Money::zero(),
            delivery_fee: Money::zero(),
            total_amount: Money::from_cents(24000),
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            breakdown: None,
            is_staff_order: false,
            staff_name: None,
            customer_session_id: Some("sess-1".to_string()),
            customer_name: Some("Meera".to_string()),
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            ready_at: None,
            served_at: None,
            billed_at: None,
            sync_version: 1,
        }
    }

    async fn place(db: &Database, shop_id: &str, table_id: Option<&str>) -> Order {
        let mut tx = db.begin().await.unwrap();
        let number = next_order_number(&mut tx, shop_id).await.unwrap();
        let order = new_order(shop_id, table_id, number);
        insert(&mut tx, &order).await.unwrap();
        commit(tx).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        let table = seed_table(&db, "shop-1", "T1").await;

        let order = place(&db, "shop-1", Some(&table.id)).await;
        let stored = db.orders().get_by_id(&order.id).await.unwrap();
        assert_eq!(stored, order);
        assert_eq!(stored.line_items[0].note.as_deref(), Some("extra chutney"));
    }

    #[tokio::test]
    async fn test_delivery_charges_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;

        let mut order = new_order("shop-1", None, 1);
        order.service_type = ServiceType::Delivery;
        order.packaging_charge = Money::from_cents(1500);
        order.delivery_fee = Money::from_cents(4000);
        let mut tx = db.begin().await.unwrap();
        insert(&mut tx, &order).await.unwrap();
        commit(tx).await.unwrap();

        let stored = db.orders().get_by_id(&order.id).await.unwrap();
        assert_eq!(stored.service_type, ServiceType::Delivery);
        assert_eq!(stored.charges().total(), Money::from_cents(5500));
    }

    #[tokio::test]
    async fn test_order_numbers_are_per_shop() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        seed_shop(&db, "shop-2").await;

        assert_eq!(place(&db, "shop-1", None).await.order_number, 1);
        assert_eq!(place(&db, "shop-1", None).await.order_number, 2);
        assert_eq!(place(&db, "shop-2", None).await.order_number, 1);
    }

    #[tokio::test]
    async fn test_update_versions_and_active_list() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        let first = place(&db, "shop-1", None).await;
        let second = place(&db, "shop-1", None).await;

        let mut cancelled = first.clone();
        cancelled.status = OrderStatus::Cancelled;
        cancelled.cancel_reason = Some("Customer left".to_string());

        let mut tx = db.begin().await.unwrap();
        let saved = update(&mut tx, &first, cancelled).await.unwrap();
        commit(tx).await.unwrap();
        assert_eq!(saved.sync_version, 2);

        let active = db.orders().list_active("shop-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);

        // the second writer read version 1 as well
        let mut tx = db.begin().await.unwrap();
        let result = update(&mut tx, &first, first.clone()).await;
        assert!(matches!(result, Err(DbError::StaleVersion { .. })));
    }

    #[tokio::test]
    async fn test_open_for_table_excludes_closed() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        let table = seed_table(&db, "shop-1", "T1").await;
        let open = place(&db, "shop-1", Some(&table.id)).await;
        let closed = place(&db, "shop-1", Some(&table.id)).await;

        let mut billed = closed.clone();
        billed.status = OrderStatus::Billed;
        let mut tx = db.begin().await.unwrap();
        update(&mut tx, &closed, billed).await.unwrap();
        commit(tx).await.unwrap();

        let still_open = db.orders().open_for_table(&table.id).await.unwrap();
        assert_eq!(still_open.len(), 1);
        assert_eq!(still_open[0].id, open.id);
        assert_eq!(db.orders().list_for_table(&table.id).await.unwrap().len(), 2);
        assert_eq!(db.orders().list_for_session("sess-1").await.unwrap().len(), 2);
    }
}
