//! # Menu Repository
//!
//! Minimal menu items and recipes: just enough for order snapshots and
//! stock deduction. Full menu management lives outside this workspace.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{change_log, to_json};
use crate::error::{DbError, DbResult};
use crate::pool::begin_immediate;
use tavola_core::{ChangeOperation, MenuItem, Money, Quantity, RecipeLine, RowImage};

#[derive(Debug, FromRow)]
struct MenuItemRow {
    id: String,
    shop_id: String,
    name: String,
    price_cents: i64,
    offer_price_cents: Option<i64>,
    is_available: bool,
    max_quantity: Option<i64>,
    updated_at: DateTime<Utc>,
}

impl From<MenuItemRow> for MenuItem {
    fn from(row: MenuItemRow) -> Self {
        MenuItem {
            id: row.id,
            shop_id: row.shop_id,
            name: row.name,
            price: Money::from_cents(row.price_cents),
            offer_price: row.offer_price_cents.map(Money::from_cents),
            is_available: row.is_available,
            max_quantity: row.max_quantity,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RecipeRow {
    menu_item_id: String,
    inventory_item_id: String,
    quantity_required_milli: i64,
}

impl From<RecipeRow> for RecipeLine {
    fn from(row: RecipeRow) -> Self {
        RecipeLine {
            menu_item_id: row.menu_item_id,
            inventory_item_id: row.inventory_item_id,
            quantity_required: Quantity::from_milli(row.quantity_required_milli),
        }
    }
}

const SELECT_MENU_ITEM: &str = r#"
    SELECT id, shop_id, name, price_cents, offer_price_cents,
           is_available, max_quantity, updated_at
    FROM menu_items
"#;

// =============================================================================
// Transaction Functions
// =============================================================================

/// Loads the given menu items of one shop. Unknown ids are simply absent.
pub async fn fetch_many(
    conn: &mut SqliteConnection,
    shop_id: &str,
    ids: &[String],
) -> DbResult<Vec<MenuItem>> {
    let rows = sqlx::query_as::<_, MenuItemRow>(&format!(
        "{} WHERE shop_id = ?1 AND id IN (SELECT value FROM json_each(?2))",
        SELECT_MENU_ITEM
    ))
    .bind(shop_id)
    .bind(to_json(&ids)?)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(MenuItem::from).collect())
}

/// Recipe lines for any of the given menu items.
pub async fn recipes_for(
    conn: &mut SqliteConnection,
    menu_item_ids: &[String],
) -> DbResult<Vec<RecipeLine>> {
    let rows = sqlx::query_as::<_, RecipeRow>(
        r#"
        SELECT menu_item_id, inventory_item_id, quantity_required_milli
        FROM recipes
        WHERE menu_item_id IN (SELECT value FROM json_each(?1))
        ORDER BY menu_item_id, inventory_item_id
        "#,
    )
    .bind(to_json(&menu_item_ids)?)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(RecipeLine::from).collect())
}

async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<MenuItem>> {
    let row = sqlx::query_as::<_, MenuItemRow>(&format!("{} WHERE id = ?1", SELECT_MENU_ITEM))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(MenuItem::from))
}

async fn upsert(conn: &mut SqliteConnection, item: &MenuItem) -> DbResult<()> {
    let before = fetch(conn, &item.id).await?;

    sqlx::query(
        r#"
        INSERT INTO menu_items (
            id, shop_id, name, price_cents, offer_price_cents,
            is_available, max_quantity, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT (id) DO UPDATE SET
            name = excluded.name,
            price_cents = excluded.price_cents,
            offer_price_cents = excluded.offer_price_cents,
            is_available = excluded.is_available,
            max_quantity = excluded.max_quantity,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&item.id)
    .bind(&item.shop_id)
    .bind(&item.name)
    .bind(item.price.cents())
    .bind(item.offer_price.map(|p| p.cents()))
    .bind(item.is_available)
    .bind(item.max_quantity)
    .bind(item.updated_at)
    .execute(&mut *conn)
    .await?;

    let operation = if before.is_some() {
        ChangeOperation::Update
    } else {
        ChangeOperation::Insert
    };
    change_log::append(
        conn,
        operation,
        Some(&RowImage::MenuItem(item.clone())),
        before.map(RowImage::MenuItem).as_ref(),
    )
    .await?;

    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct MenuRepository {
    pool: SqlitePool,
}

impl MenuRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MenuRepository { pool }
    }

    /// Creates an available item with no offer and no per-item cap.
    pub async fn create_item(&self, shop_id: &str, name: &str, price: Money) -> DbResult<MenuItem> {
        let item = MenuItem {
            id: Uuid::new_v4().to_string(),
            shop_id: shop_id.to_string(),
            name: name.trim().to_string(),
            price,
            offer_price: None,
            is_available: true,
            max_quantity: None,
            updated_at: Utc::now(),
        };
        self.save(&item).await?;
        Ok(item)
    }

    /// Inserts or updates an item and publishes the change.
    pub async fn save(&self, item: &MenuItem) -> DbResult<()> {
        debug!(menu_item_id = %item.id, name = %item.name, "Saving menu item");
        let mut tx = begin_immediate(&self.pool).await?;
        upsert(&mut tx, item).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replaces a menu item's recipe.
    pub async fn set_recipe(
        &self,
        menu_item_id: &str,
        lines: &[(String, Quantity)],
    ) -> DbResult<()> {
        let mut tx = begin_immediate(&self.pool).await?;

        sqlx::query("DELETE FROM recipes WHERE menu_item_id = ?1")
            .bind(menu_item_id)
            .execute(&mut *tx)
            .await?;

        for (inventory_item_id, quantity) in lines {
            sqlx::query(
                r#"
                INSERT INTO recipes (menu_item_id, inventory_item_id, quantity_required_milli)
                VALUES (?1, ?2, ?3)
                "#,
            )
            .bind(menu_item_id)
            .bind(inventory_item_id)
            .bind(quantity.milli())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(menu_item_id = %menu_item_id, lines = lines.len(), "Recipe saved");
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<MenuItem> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("MenuItem", id))
    }

    pub async fn list_by_shop(&self, shop_id: &str) -> DbResult<Vec<MenuItem>> {
        let rows = sqlx::query_as::<_, MenuItemRow>(&format!(
            "{} WHERE shop_id = ?1 ORDER BY name",
            SELECT_MENU_ITEM
        ))
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MenuItem::from).collect())
    }

    pub async fn recipe(&self, menu_item_id: &str) -> DbResult<Vec<RecipeLine>> {
        let mut conn = self.pool.acquire().await?;
        recipes_for(&mut conn, &[menu_item_id.to_string()]).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
