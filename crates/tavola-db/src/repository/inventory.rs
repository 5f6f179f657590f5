//! # Inventory Repository
//!
//! Stock levels, the append-only adjustment ledger, and the per-order
//! deduction guard.
//!
//! ## Stock Changes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  apply_adjustment() is the only function that writes stock_milli.      │
//! │                                                                         │
//! │  ┌─────────────────────── same transaction ────────────────────────┐   │
//! │  │ UPDATE inventory_items SET stock_milli = new, sync_version + 1  │   │
//! │  │ INSERT INTO inventory_adjustments (previous, new, delta, ...)   │   │
//! │  │ INSERT INTO change_log (inventory_items, update, ...)           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Order deduction first claims the order id:                            │
//! │    INSERT OR IGNORE INTO inventory_deductions(order_id)                │
//! │    0 rows → already deducted, skip                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::{change_log, parse_text};
use crate::error::{DbError, DbResult};
use crate::pool::begin_immediate;
use tavola_core::{
    AdjustmentReason, ChangeOperation, InventoryAdjustment, InventoryItem, Money, Quantity,
    RowImage,
};

#[derive(Debug, FromRow)]
struct InventoryRow {
    id: String,
    shop_id: String,
    name: String,
    unit: String,
    stock_milli: i64,
    low_stock_threshold_milli: i64,
    cost_per_unit_cents: Option<i64>,
    updated_at: DateTime<Utc>,
    sync_version: i64,
}

impl From<InventoryRow> for InventoryItem {
    fn from(row: InventoryRow) -> Self {
        InventoryItem {
            id: row.id,
            shop_id: row.shop_id,
            name: row.name,
            unit: row.unit,
            stock_quantity: Quantity::from_milli(row.stock_milli),
            low_stock_threshold: Quantity::from_milli(row.low_stock_threshold_milli),
            cost_per_unit: row.cost_per_unit_cents.map(Money::from_cents),
            updated_at: row.updated_at,
            sync_version: row.sync_version,
        }
    }
}

#[derive(Debug, FromRow)]
struct AdjustmentRow {
    id: String,
    shop_id: String,
    inventory_item_id: String,
    previous_milli: i64,
    new_milli: i64,
    adjustment_milli: i64,
    reason: String,
    notes: Option<String>,
    reference_id: Option<String>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AdjustmentRow> for InventoryAdjustment {
    type Error = DbError;

    fn try_from(row: AdjustmentRow) -> DbResult<Self> {
        Ok(InventoryAdjustment {
            id: row.id,
            shop_id: row.shop_id,
            inventory_item_id: row.inventory_item_id,
            previous_quantity: Quantity::from_milli(row.previous_milli),
            new_quantity: Quantity::from_milli(row.new_milli),
            adjustment: Quantity::from_milli(row.adjustment_milli),
            reason: parse_text("inventory_adjustments", &row.reason)?,
            notes: row.notes,
            reference_id: row.reference_id,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

const SELECT_ITEM: &str = r#"
    SELECT id, shop_id, name, unit, stock_milli, low_stock_threshold_milli,
           cost_per_unit_cents, updated_at, sync_version
    FROM inventory_items
"#;

const SELECT_ADJUSTMENT: &str = r#"
    SELECT id, shop_id, inventory_item_id, previous_milli, new_milli,
           adjustment_milli, reason, notes, reference_id, created_by, created_at
    FROM inventory_adjustments
"#;

/// The audit fields of one stock movement.
#[derive(Debug, Clone)]
pub struct NewAdjustment<'a> {
    pub delta: Quantity,
    pub reason: AdjustmentReason,
    pub notes: Option<&'a str>,
    pub reference_id: Option<&'a str>,
    pub created_by: Option<&'a str>,
}

// =============================================================================
// Transaction Functions
// =============================================================================

pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<InventoryItem> {
    let row = sqlx::query_as::<_, InventoryRow>(&format!("{} WHERE id = ?1", SELECT_ITEM))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("InventoryItem", id))?;
    Ok(row.into())
}

/// Applies a signed delta, writes the ledger row and logs the change.
///
/// No sign check happens here; callers decide whether negative stock is
/// acceptable.
pub async fn apply_adjustment(
    conn: &mut SqliteConnection,
    item: &InventoryItem,
    adjustment: NewAdjustment<'_>,
    now: DateTime<Utc>,
) -> DbResult<(InventoryItem, InventoryAdjustment)> {
    let new_quantity = item.stock_quantity + adjustment.delta;

    let result = sqlx::query(
        r#"
        UPDATE inventory_items SET
            stock_milli = ?2,
            updated_at = ?3,
            sync_version = sync_version + 1
        WHERE id = ?1 AND sync_version = ?4
        "#,
    )
    .bind(&item.id)
    .bind(new_quantity.milli())
    .bind(now)
    .bind(item.sync_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::StaleVersion {
            entity: "InventoryItem".to_string(),
            id: item.id.clone(),
            expected: item.sync_version,
        });
    }

    let record = InventoryAdjustment {
        id: Uuid::new_v4().to_string(),
        shop_id: item.shop_id.clone(),
        inventory_item_id: item.id.clone(),
        previous_quantity: item.stock_quantity,
        new_quantity,
        adjustment: adjustment.delta,
        reason: adjustment.reason,
        notes: adjustment.notes.map(str::to_string),
        reference_id: adjustment.reference_id.map(str::to_string),
        created_by: adjustment.created_by.map(str::to_string),
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO inventory_adjustments (
            id, shop_id, inventory_item_id, previous_milli, new_milli,
            adjustment_milli, reason, notes, reference_id, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&record.id)
    .bind(&record.shop_id)
    .bind(&record.inventory_item_id)
    .bind(record.previous_quantity.milli())
    .bind(record.new_quantity.milli())
    .bind(record.adjustment.milli())
    .bind(record.reason)
    .bind(&record.notes)
    .bind(&record.reference_id)
    .bind(&record.created_by)
    .bind(record.created_at)
    .execute(&mut *conn)
    .await?;

    let updated = InventoryItem {
        stock_quantity: new_quantity,
        updated_at: now,
        sync_version: item.sync_version + 1,
        ..item.clone()
    };

    change_log::append(
        conn,
        ChangeOperation::Update,
        Some(&RowImage::InventoryItem(updated.clone())),
        Some(&RowImage::InventoryItem(item.clone())),
    )
    .await?;

    debug!(
        inventory_item_id = %item.id,
        previous = %item.stock_quantity,
        new = %new_quantity,
        reason = %record.reason,
        "Stock adjusted"
    );

    Ok((updated, record))
}

/// Claims the deduction slot for an order.
///
/// Returns `false` when the order was already deducted.
pub async fn claim_deduction(
    conn: &mut SqliteConnection,
    order_id: &str,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let result =
        sqlx::query("INSERT OR IGNORE INTO inventory_deductions (order_id, created_at) VALUES (?1, ?2)")
            .bind(order_id)
            .bind(now)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected() == 1)
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Creates an item with an opening stock level.
    ///
    /// Opening stock is recorded as a `restock` adjustment so the ledger
    /// accounts for every unit.
    pub async fn create_item(
        &self,
        shop_id: &str,
        name: &str,
        unit: &str,
        opening_stock: Quantity,
        low_stock_threshold: Quantity,
    ) -> DbResult<InventoryItem> {
        let now = Utc::now();
        let item = InventoryItem {
            id: Uuid::new_v4().to_string(),
            shop_id: shop_id.to_string(),
            name: name.trim().to_string(),
            unit: unit.trim().to_string(),
            stock_quantity: Quantity::zero(),
            low_stock_threshold,
            cost_per_unit: None,
            updated_at: now,
            sync_version: 1,
        };

        let mut tx = begin_immediate(&self.pool).await?;
        sqlx::query(
            r#"
            INSERT INTO inventory_items (
                id, shop_id, name, unit, stock_milli, low_stock_threshold_milli,
                cost_per_unit_cents, updated_at, sync_version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&item.id)
        .bind(&item.shop_id)
        .bind(&item.name)
        .bind(&item.unit)
        .bind(item.stock_quantity.milli())
        .bind(item.low_stock_threshold.milli())
        .bind(item.cost_per_unit.map(|c| c.cents()))
        .bind(item.updated_at)
        .bind(item.sync_version)
        .execute(&mut *tx)
        .await?;

        change_log::append(
            &mut tx,
            ChangeOperation::Insert,
            Some(&RowImage::InventoryItem(item.clone())),
            None,
        )
        .await?;

        let item = if opening_stock == Quantity::zero() {
            item
        } else {
            let opening = NewAdjustment {
                delta: opening_stock,
                reason: AdjustmentReason::Restock,
                notes: Some("Opening stock"),
                reference_id: None,
                created_by: None,
            };
            apply_adjustment(&mut tx, &item, opening, now).await?.0
        };

        tx.commit().await?;
        info!(inventory_item_id = %item.id, name = %item.name, "Inventory item created");
        Ok(item)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<InventoryItem> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    pub async fn list_by_shop(&self, shop_id: &str) -> DbResult<Vec<InventoryItem>> {
        let rows = sqlx::query_as::<_, InventoryRow>(&format!(
            "{} WHERE shop_id = ?1 ORDER BY name",
            SELECT_ITEM
        ))
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(InventoryItem::from).collect())
    }

    /// Ledger for one item, oldest first.
    pub async fn adjustments_for_item(&self, item_id: &str) -> DbResult<Vec<InventoryAdjustment>> {
        let rows = sqlx::query_as::<_, AdjustmentRow>(&format!(
            "{} WHERE inventory_item_id = ?1 ORDER BY created_at, rowid",
            SELECT_ADJUSTMENT
        ))
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InventoryAdjustment::try_from).collect()
    }

    /// Adjustments written for a reference (an order id for deductions).
    pub async fn adjustments_for_reference(
        &self,
        reference_id: &str,
    ) -> DbResult<Vec<InventoryAdjustment>> {
        let rows = sqlx::query_as::<_, AdjustmentRow>(&format!(
            "{} WHERE reference_id = ?1 ORDER BY inventory_item_id",
            SELECT_ADJUSTMENT
        ))
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InventoryAdjustment::try_from).collect()
    }

    pub async fn is_deducted(&self, order_id: &str) -> DbResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM inventory_deductions WHERE order_id = ?1")
                .bind(order_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::commit;
    use crate::repository::test_support::{seed_inventory_item, seed_shop};
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_opening_stock_is_in_ledger() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        let paneer = seed_inventory_item(&db, "shop-1", "Paneer", 5000).await;

        assert_eq!(paneer.stock_quantity, Quantity::from_milli(5000));
        let ledger = db.inventory().adjustments_for_item(&paneer.id).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].reason, AdjustmentReason::Restock);
        assert_eq!(ledger[0].new_quantity, Quantity::from_milli(5000));
    }

    #[tokio::test]
    async fn test_apply_adjustment_may_go_negative() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        let paneer = seed_inventory_item(&db, "shop-1", "Paneer", 200).await;

        let mut tx = db.begin().await.unwrap();
        let adjustment = NewAdjustment {
            delta: Quantity::from_milli(-500),
            reason: AdjustmentReason::Order,
            notes: None,
            reference_id: Some("ord-1"),
            created_by: None,
        };
        let (updated, record) = apply_adjustment(&mut tx, &paneer, adjustment, Utc::now())
            .await
            .unwrap();
        commit(tx).await.unwrap();

        assert_eq!(updated.stock_quantity, Quantity::from_milli(-300));
        assert_eq!(record.previous_quantity, Quantity::from_milli(200));
        let by_ref = db.inventory().adjustments_for_reference("ord-1").await.unwrap();
        assert_eq!(by_ref.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_deduction_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        sqlx::query(
            "INSERT INTO orders (id, shop_id, order_number, line_items, total_cents, created_at, updated_at)
             VALUES ('ord-1', 'shop-1', 1, '[]', 0, ?1, ?1)",
        )
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .unwrap();

        let mut tx = db.begin().await.unwrap();
        assert!(claim_deduction(&mut tx, "ord-1", Utc::now()).await.unwrap());
        assert!(!claim_deduction(&mut tx, "ord-1", Utc::now()).await.unwrap());
        commit(tx).await.unwrap();
        assert!(db.inventory().is_deducted("ord-1").await.unwrap());
    }
}
