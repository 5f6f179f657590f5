//! # Bill Repository
//!
//! Settled bills. Rows are written once and never updated.
//!
//! Bills are not in the change-notification set; observers see billing
//! through the order rows it updates in the same transaction.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::info;

use super::{from_json, parse_text, to_json};
use crate::error::{DbError, DbResult};
use tavola_core::{Bill, BillingBreakdown, LineItem, Money};

#[derive(Debug, FromRow)]
struct BillRow {
    id: String,
    shop_id: String,
    bill_number: String,
    table_id: Option<String>,
    order_ids: String,
    items_snapshot: String,
    breakdown: Option<String>,
    total_cents: i64,
    payment_method: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<BillRow> for Bill {
    type Error = DbError;

    fn try_from(row: BillRow) -> DbResult<Self> {
        let order_ids: Vec<String> = from_json("bills", "order_ids", &row.order_ids)?;
        let items_snapshot: Vec<LineItem> =
            from_json("bills", "items_snapshot", &row.items_snapshot)?;
        let breakdown: Option<BillingBreakdown> = row
            .breakdown
            .as_deref()
            .map(|json| from_json("bills", "breakdown", json))
            .transpose()?;

        Ok(Bill {
            id: row.id,
            shop_id: row.shop_id,
            bill_number: row.bill_number,
            table_id: row.table_id,
            order_ids,
            items_snapshot,
            breakdown,
            total_amount: Money::from_cents(row.total_cents),
            payment_method: parse_text("bills", &row.payment_method)?,
            created_at: row.created_at,
        })
    }
}

const SELECT_BILL: &str = r#"
    SELECT id, shop_id, bill_number, table_id, order_ids, items_snapshot,
           breakdown, total_cents, payment_method, created_at
    FROM bills
"#;

/// Formats a per-shop bill sequence for printing.
pub fn format_bill_number(seq: i64) -> String {
    format!("BILL-{:06}", seq)
}

// =============================================================================
// Transaction Functions
// =============================================================================

/// Next per-shop bill sequence.
pub async fn next_bill_seq(conn: &mut SqliteConnection, shop_id: &str) -> DbResult<i64> {
    let max: Option<i64> = sqlx::query_scalar("SELECT MAX(bill_seq) FROM bills WHERE shop_id = ?1")
        .bind(shop_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(max.unwrap_or(0) + 1)
}

pub async fn insert(conn: &mut SqliteConnection, bill_seq: i64, bill: &Bill) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO bills (
            id, shop_id, bill_seq, bill_number, table_id, order_ids,
            items_snapshot, breakdown, total_cents, payment_method, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&bill.id)
    .bind(&bill.shop_id)
    .bind(bill_seq)
    .bind(&bill.bill_number)
    .bind(&bill.table_id)
    .bind(to_json(&bill.order_ids)?)
    .bind(to_json(&bill.items_snapshot)?)
    .bind(bill.breakdown.as_ref().map(to_json).transpose()?)
    .bind(bill.total_amount.cents())
    .bind(bill.payment_method)
    .bind(bill.created_at)
    .execute(&mut *conn)
    .await?;

    info!(
        bill_id = %bill.id,
        bill_number = %bill.bill_number,
        orders = bill.order_ids.len(),
        total = %bill.total_amount,
        "Bill recorded"
    );
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct BillRepository {
    pool: SqlitePool,
}

impl BillRepository {
    pub fn new(pool: SqlitePool) -> Self {
        BillRepository { pool }
    }

    pub async fn get_by_id(&self, bill_id: &str) -> DbResult<Bill> {
        sqlx::query_as::<_, BillRow>(&format!("{} WHERE id = ?1", SELECT_BILL))
            .bind(bill_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Bill", bill_id))?
            .try_into()
    }

    /// Newest first.
    pub async fn list_by_shop(&self, shop_id: &str) -> DbResult<Vec<Bill>> {
        let rows = sqlx::query_as::<_, BillRow>(&format!(
            "{} WHERE shop_id = ?1 ORDER BY bill_seq DESC",
            SELECT_BILL
        ))
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Bill::try_from).collect()
    }

    /// The bill that settled an order, if any.
    pub async fn find_for_order(&self, order_id: &str) -> DbResult<Option<Bill>> {
        let row = sqlx::query_as::<_, BillRow>(&format!(
            "{} WHERE ?1 IN (SELECT value FROM json_each(bills.order_ids))",
            SELECT_BILL
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Bill::try_from).transpose()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
