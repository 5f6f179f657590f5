//! # Repository Module
//!
//! Database repository implementations for Tavola.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Two Ways In                                          │
//! │                                                                         │
//! │  Engine operation (write)            Observer / dashboard (read)       │
//! │       │                                   │                             │
//! │       │  let mut tx = db.begin()          │  db.orders().list_active()  │
//! │       │  orders::fetch(&mut tx, id)       │                             │
//! │       │  orders::update(&mut tx, ..)      │                             │
//! │       │    └── change_log::append(..)     │                             │
//! │       │  commit(tx)                       │                             │
//! │       ▼                                   ▼                             │
//! │  Module functions taking               XRepository structs holding     │
//! │  &mut SqliteConnection                 a pool clone                    │
//! │                                                                         │
//! │  Every write function appends its own change-log row on the same       │
//! │  connection, so no mutation can commit without its notification.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`settings::SettingsRepository`] - Shops and settings
//! - [`tables::TableRepository`] - Tables, sessions and admission codes
//! - [`menu::MenuRepository`] - Menu items and recipes (collaborator stand-in)
//! - [`orders::OrderRepository`] - Orders
//! - [`bills::BillRepository`] - Settled bills
//! - [`inventory::InventoryRepository`] - Stock, adjustments, deductions
//! - [`change_log::ChangeLogRepository`] - Outbox reads for the relay

pub mod bills;
pub mod change_log;
pub mod inventory;
pub mod menu;
pub mod orders;
pub mod settings;
pub mod tables;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DbError, DbResult};

/// Decodes a JSON column, reporting the entity on failure.
pub(crate) fn from_json<T: DeserializeOwned>(entity: &str, column: &str, json: &str) -> DbResult<T> {
    serde_json::from_str(json).map_err(|e| DbError::corrupt(entity, format!("{}: {}", column, e)))
}

/// Encodes a value for a JSON column.
pub(crate) fn to_json<T: Serialize>(value: &T) -> DbResult<String> {
    serde_json::to_string(value).map_err(|e| DbError::Internal(e.to_string()))
}

/// Parses a text status column into its enum.
pub(crate) fn parse_text<T>(entity: &str, text: &str) -> DbResult<T>
where
    T: std::str::FromStr<Err = tavola_core::ValidationError>,
{
    text.parse().map_err(|e| DbError::corrupt(entity, e))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Seeding helpers shared by repository tests.

    use tavola_core::{DiningTable, InventoryItem, MenuItem, Money, Quantity, ShopSettings};

    use crate::Database;

    pub async fn seed_shop(db: &Database, shop_id: &str) -> ShopSettings {
        db.settings().create_shop(shop_id, "Test Kitchen").await.unwrap()
    }

    pub async fn seed_table(db: &Database, shop_id: &str, label: &str) -> DiningTable {
        db.tables().create(shop_id, label).await.unwrap()
    }

    pub async fn seed_menu_item(db: &Database, shop_id: &str, name: &str, cents: i64) -> MenuItem {
        db.menu()
            .create_item(shop_id, name, Money::from_cents(cents))
            .await
            .unwrap()
    }

    pub async fn seed_inventory_item(
        db: &Database,
        shop_id: &str,
        name: &str,
        stock_milli: i64,
    ) -> InventoryItem {
        db.inventory()
            .create_item(shop_id, name, "kg", Quantity::from_milli(stock_milli), Quantity::zero())
            .await
            .unwrap()
    }
}
