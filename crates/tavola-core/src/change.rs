//! # Change Events
//!
//! The typed notification every observer consumes: which table changed,
//! the operation, and full row images.
//!
//! ## Event Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ChangeEvent                                                            │
//! │  ├── seq          commit order, assigned inside the writing transaction │
//! │  ├── shop_id      tenant the row belongs to                             │
//! │  ├── table        orders | tables | menu_items | inventory_items        │
//! │  ├── row_id                                                             │
//! │  ├── operation    insert | update | delete                              │
//! │  ├── new_row      RowImage (absent on delete)                           │
//! │  └── old_row      RowImage (present when the writer had it)             │
//! │                                                                         │
//! │  ChangeFilter { table, Shop(id) | Row(id) } decides who receives it.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Row images are decoded through serde into the domain structs, so a status
//! string or JSON column that does not parse is rejected here rather than
//! discovered by an observer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::types::{DiningTable, InventoryItem, MenuItem, Order};

// =============================================================================
// Table & Operation
// =============================================================================

/// Store table an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    Orders,
    Tables,
    MenuItems,
    InventoryItems,
}

impl ChangeTable {
    pub const ALL: &'static [ChangeTable] = &[
        ChangeTable::Orders,
        ChangeTable::Tables,
        ChangeTable::MenuItems,
        ChangeTable::InventoryItems,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ChangeTable::Orders => "orders",
            ChangeTable::Tables => "tables",
            ChangeTable::MenuItems => "menu_items",
            ChangeTable::InventoryItems => "inventory_items",
        }
    }
}

impl fmt::Display for ChangeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeTable {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeTable::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "table_name".to_string(),
                allowed: ChangeTable::ALL.iter().map(|t| t.as_str().to_string()).collect(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "insert",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        }
    }
}

impl FromStr for ChangeOperation {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(ChangeOperation::Insert),
            "update" => Ok(ChangeOperation::Update),
            "delete" => Ok(ChangeOperation::Delete),
            _ => Err(ValidationError::NotAllowed {
                field: "operation".to_string(),
                allowed: vec!["insert".into(), "update".into(), "delete".into()],
            }),
        }
    }
}

// =============================================================================
// Row Images
// =============================================================================

/// A typed snapshot of a changed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", content = "row", rename_all = "snake_case")]
pub enum RowImage {
    Order(Order),
    Table(DiningTable),
    MenuItem(MenuItem),
    InventoryItem(InventoryItem),
}

impl RowImage {
    pub fn table(&self) -> ChangeTable {
        match self {
            RowImage::Order(_) => ChangeTable::Orders,
            RowImage::Table(_) => ChangeTable::Tables,
            RowImage::MenuItem(_) => ChangeTable::MenuItems,
            RowImage::InventoryItem(_) => ChangeTable::InventoryItems,
        }
    }

    pub fn row_id(&self) -> &str {
        match self {
            RowImage::Order(o) => &o.id,
            RowImage::Table(t) => &t.id,
            RowImage::MenuItem(m) => &m.id,
            RowImage::InventoryItem(i) => &i.id,
        }
    }

    pub fn shop_id(&self) -> &str {
        match self {
            RowImage::Order(o) => &o.shop_id,
            RowImage::Table(t) => &t.shop_id,
            RowImage::MenuItem(m) => &m.shop_id,
            RowImage::InventoryItem(i) => &i.shop_id,
        }
    }

    pub fn encode(&self) -> Result<String, ValidationError> {
        serde_json::to_string(self).map_err(|e| ValidationError::InvalidFormat {
            field: "row_image".to_string(),
            reason: e.to_string(),
        })
    }

    /// Decodes a stored image and checks it belongs to `expected`.
    pub fn decode(expected: ChangeTable, json: &str) -> Result<RowImage, ValidationError> {
        let image: RowImage =
            serde_json::from_str(json).map_err(|e| ValidationError::InvalidFormat {
                field: "row_image".to_string(),
                reason: e.to_string(),
            })?;
        if image.table() != expected {
            return Err(ValidationError::InvalidFormat {
                field: "row_image".to_string(),
                reason: format!("expected {} row, found {}", expected, image.table()),
            });
        }
        Ok(image)
    }

    pub fn as_order(&self) -> Option<&Order> {
        match self {
            RowImage::Order(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&DiningTable> {
        match self {
            RowImage::Table(t) => Some(t),
            _ => None,
        }
    }
}

// =============================================================================
// Events & Filters
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChangeEvent {
    /// Change-log sequence; strictly increasing in commit order.
    pub seq: i64,
    pub shop_id: String,
    pub table: ChangeTable,
    pub row_id: String,
    pub operation: ChangeOperation,
    pub new_row: Option<RowImage>,
    pub old_row: Option<RowImage>,
    #[ts(as = "String")]
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "by", content = "id", rename_all = "snake_case")]
pub enum FilterScope {
    Shop(String),
    Row(String),
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChangeFilter {
    pub table: ChangeTable,
    pub scope: FilterScope,
}

impl ChangeFilter {
    pub fn shop(table: ChangeTable, shop_id: impl Into<String>) -> Self {
        ChangeFilter {
            table,
            scope: FilterScope::Shop(shop_id.into()),
        }
    }

    pub fn row(table: ChangeTable, row_id: impl Into<String>) -> Self {
        ChangeFilter {
            table,
            scope: FilterScope::Row(row_id.into()),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if self.table != event.table {
            return false;
        }
        match &self.scope {
            FilterScope::Shop(id) => *id == event.shop_id,
            FilterScope::Row(id) => *id == event.row_id,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TableStatus;

    fn table_image(id: &str, shop: &str) -> RowImage {
        RowImage::Table(DiningTable {
            id: id.into(),
            shop_id: shop.into(),
            label: "T1".into(),
            status: TableStatus::Empty,
            active_sessions: vec![],
            updated_at: Utc::now(),
            sync_version: 1,
        })
    }

    fn event(image: RowImage) -> ChangeEvent {
        ChangeEvent {
            seq: 1,
            shop_id: image.shop_id().to_string(),
            table: image.table(),
            row_id: image.row_id().to_string(),
            operation: ChangeOperation::Update,
            new_row: Some(image),
            old_row: None,
            committed_at: Utc::now(),
        }
    }

    #[test]
    fn test_filter_by_shop_and_row() {
        let e = event(table_image("t-1", "shop-1"));
        assert!(ChangeFilter::shop(ChangeTable::Tables, "shop-1").matches(&e));
        assert!(!ChangeFilter::shop(ChangeTable::Tables, "shop-2").matches(&e));
        assert!(!ChangeFilter::shop(ChangeTable::Orders, "shop-1").matches(&e));
        assert!(ChangeFilter::row(ChangeTable::Tables, "t-1").matches(&e));
        assert!(!ChangeFilter::row(ChangeTable::Tables, "t-2").matches(&e));
    }

    #[test]
    fn test_row_image_decode_checks_table() {
        let json = table_image("t-1", "shop-1").encode().unwrap();
        assert!(RowImage::decode(ChangeTable::Tables, &json).is_ok());
        assert!(RowImage::decode(ChangeTable::Orders, &json).is_err());
    }

    #[test]
    fn test_row_image_rejects_bad_status() {
        let json = table_image("t-1", "shop-1")
            .encode()
            .unwrap()
            .replace("\"empty\"", "\"reserved\"");
        assert!(RowImage::decode(ChangeTable::Tables, &json).is_err());
    }

    #[test]
    fn test_table_name_parse() {
        assert_eq!("menu_items".parse::<ChangeTable>().unwrap(), ChangeTable::MenuItems);
        assert!("bills".parse::<ChangeTable>().is_err());
    }
}
