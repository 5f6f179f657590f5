//! # Domain Types
//!
//! Core domain types shared by the engine, the store and every observer.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Order       │   │  DiningTable    │   │ InventoryItem   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  order_number   │   │  label          │   │  stock_quantity │       │
//! │  │  status         │   │  status         │   │  unit           │       │
//! │  │  line_items[]   │   │  sessions[]     │   │  threshold      │       │
//! │  │  breakdown?     │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  OrderStatus    │   │  TableStatus    │   │AdjustmentReason │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Queued         │   │  Empty          │   │  Restock, Usage │       │
//! │  │  Preparing      │   │  Occupied       │   │  Order, Wastage │       │
//! │  │  Ready, Served  │   └─────────────────┘   │  Damage, Theft  │       │
//! │  │  Billed         │                         │  Correction     │       │
//! │  │  Cancelled      │                         │  Other          │       │
//! │  └─────────────────┘                         └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Snapshot Pattern
//! Line items and bills copy the name and price they were sold at. A later
//! menu edit never rewrites what a customer ordered or paid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::billing::{self, BillingBreakdown, BillingPolicy, Charge, OrderCharges};
use crate::error::ValidationError;
use crate::money::{Money, Quantity, Rate};

/// Implements `as_str`, `Display` and `FromStr` for a unit enum stored as text.
macro_rules! text_enum {
    ($ty:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Returns the stored text form.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }

            /// Every variant, in declaration order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    _ => Err(ValidationError::NotAllowed {
                        field: $field.to_string(),
                        allowed: vec![$($text.to_string()),+],
                    }),
                }
            }
        }
    };
}

// =============================================================================
// Order Status
// =============================================================================

/// The lifecycle status of an order.
///
/// Transition rules live in [`crate::order_flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed, waiting for the kitchen.
    Queued,
    /// Kitchen is cooking it.
    Preparing,
    /// Plated, waiting at the pass.
    Ready,
    /// Delivered to the table.
    Served,
    /// Paid and closed.
    Billed,
    /// Withdrawn before the food was ready.
    Cancelled,
}

text_enum!(OrderStatus, "status", {
    Queued => "queued",
    Preparing => "preparing",
    Ready => "ready",
    Served => "served",
    Billed => "billed",
    Cancelled => "cancelled",
});

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Queued
    }
}

// =============================================================================
// Payment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
}

text_enum!(PaymentStatus, "payment_status", {
    Pending => "pending",
    Paid => "paid",
});

/// How a bill was settled. No gateway is involved; this is a record only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    Upi,
}

text_enum!(PaymentMethod, "payment_method", {
    Cash => "cash",
    Card => "card",
    Upi => "upi",
});

// =============================================================================
// Service Type
// =============================================================================

/// Where the food is eaten. Decides the service charge and whether
/// packaging and delivery charges apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    #[default]
    DineIn,
    Takeaway,
    Delivery,
}

text_enum!(ServiceType, "service_type", {
    DineIn => "dine_in",
    Takeaway => "takeaway",
    Delivery => "delivery",
});

impl ServiceType {
    pub fn is_dine_in(&self) -> bool {
        matches!(self, ServiceType::DineIn)
    }
}

// =============================================================================
// Line Item
// =============================================================================

/// A line in an order. Frozen at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItem {
    /// Menu item this line was taken from; used for recipe lookup only.
    pub menu_item_id: Option<String>,
    /// Item name at time of order (frozen).
    pub name: String,
    /// Unit price at time of order (frozen).
    pub unit_price: Money,
    pub quantity: i64,
    /// Free-text kitchen note ("no onions").
    pub note: Option<String>,
}

impl LineItem {
    /// unit_price × quantity.
    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply_quantity(self.quantity)
    }
}

// =============================================================================
// Order
// =============================================================================

/// An order placed against a table, or a takeaway / delivery order with
/// no table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub shop_id: String,
    pub table_id: Option<String>,
    /// Human-readable per-shop number shown on the KDS ticket.
    pub order_number: i64,
    pub status: OrderStatus,
    #[serde(default)]
    pub service_type: ServiceType,
    pub line_items: Vec<LineItem>,
    /// Fixed at placement for takeaway and delivery; zero for dine-in.
    #[serde(default)]
    pub packaging_charge: Money,
    #[serde(default)]
    pub delivery_fee: Money,
    /// Provisional total until billed; the billed grand total afterwards.
    pub total_amount: Money,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    /// Fixed at bill time. Never recomputed once present.
    pub breakdown: Option<BillingBreakdown>,
    pub is_staff_order: bool,
    pub staff_name: Option<String>,
    /// Customer session that placed the order, if any.
    pub customer_session_id: Option<String>,
    pub customer_name: Option<String>,
    pub cancel_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub ready_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub served_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub billed_at: Option<DateTime<Utc>>,
    /// Incremented on every write.
    pub sync_version: i64,
}

impl Order {
    /// Sum of line totals before any tax or service charge.
    pub fn item_total(&self) -> Money {
        self.line_items.iter().map(LineItem::line_total).sum()
    }

    pub fn charges(&self) -> OrderCharges {
        OrderCharges {
            packaging: self.packaging_charge,
            delivery: self.delivery_fee,
        }
    }

    /// Returns the breakdown to display for this order.
    ///
    /// A persisted breakdown always wins. Billed orders from before
    /// breakdowns existed fall back to the legacy derivation; anything else
    /// is a provisional computation under `policy`.
    pub fn effective_breakdown(&self, policy: &BillingPolicy) -> BillingBreakdown {
        match (&self.breakdown, self.status) {
            (Some(stored), _) => stored.clone(),
            (None, OrderStatus::Billed) => billing::legacy::derive(self.total_amount),
            (None, _) => {
                billing::provisional(&self.line_items, policy, self.service_type, self.charges())
            }
        }
    }
}

// =============================================================================
// Tables & Sessions
// =============================================================================

/// Occupancy of a dining table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    #[default]
    Empty,
    Occupied,
}

text_enum!(TableStatus, "table_status", {
    Empty => "empty",
    Occupied => "occupied",
});

/// A customer seated at a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ActiveSession {
    pub session_id: String,
    pub display_name: String,
    #[ts(as = "String")]
    pub joined_at: DateTime<Utc>,
}

/// A physical table and the sessions currently seated at it.
///
/// The admission code is deliberately absent: it lives in a separate store
/// row so a published table image can never leak it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiningTable {
    pub id: String,
    pub shop_id: String,
    pub label: String,
    pub status: TableStatus,
    /// Join order is preserved.
    pub active_sessions: Vec<ActiveSession>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub sync_version: i64,
}

// =============================================================================
// Shop Settings
// =============================================================================

/// Shop-level settings consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShopSettings {
    pub shop_id: String,
    pub currency: String,
    pub tax_rate: Rate,
    pub service_charge_rate: Rate,
    pub tax_included_in_price: bool,
    pub otp_enabled: bool,
    /// Per-table codes when true; the shop-wide code otherwise.
    pub per_table_otp: bool,
    pub shop_otp: Option<String>,
    pub max_item_quantity: i64,
    /// Levied on takeaway and delivery orders.
    pub packaging_charge: Charge,
    /// Levied on delivery orders.
    pub delivery_charge: Charge,
}

impl ShopSettings {
    /// Defaults for a freshly created shop: no tax, no OTP.
    pub fn new(shop_id: impl Into<String>) -> Self {
        ShopSettings {
            shop_id: shop_id.into(),
            currency: "INR".to_string(),
            tax_rate: Rate::zero(),
            service_charge_rate: Rate::zero(),
            tax_included_in_price: false,
            otp_enabled: false,
            per_table_otp: true,
            shop_otp: None,
            max_item_quantity: crate::DEFAULT_MAX_ITEM_QUANTITY,
            packaging_charge: Charge::default(),
            delivery_charge: Charge::default(),
        }
    }

    /// Packaging and delivery charges for a new order.
    pub fn charges_for(&self, service_type: ServiceType, item_total: Money) -> OrderCharges {
        OrderCharges::for_service(
            service_type,
            item_total,
            &self.packaging_charge,
            &self.delivery_charge,
        )
    }

    /// The billing policy in effect under these settings.
    pub fn billing_policy(&self) -> BillingPolicy {
        BillingPolicy {
            tax_rate: self.tax_rate,
            service_charge_rate: self.service_charge_rate,
            tax_included_in_price: self.tax_included_in_price,
        }
    }
}

// =============================================================================
// Menu (collaborator stand-in)
// =============================================================================

/// The slice of a menu item the engine snapshots at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MenuItem {
    pub id: String,
    pub shop_id: String,
    pub name: String,
    pub price: Money,
    pub offer_price: Option<Money>,
    pub is_available: bool,
    /// Per-item cap that overrides the shop-wide quantity limit.
    pub max_quantity: Option<i64>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl MenuItem {
    /// Price a customer pays right now: the offer price when one is set.
    pub fn effective_price(&self) -> Money {
        self.offer_price.unwrap_or(self.price)
    }
}

/// One ingredient of a menu item's recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RecipeLine {
    pub menu_item_id: String,
    pub inventory_item_id: String,
    /// Required per single unit of the menu item.
    pub quantity_required: Quantity,
}

// =============================================================================
// Inventory
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InventoryItem {
    pub id: String,
    pub shop_id: String,
    pub name: String,
    /// "kg", "g", "L", "ml", "pcs", ...
    pub unit: String,
    pub stock_quantity: Quantity,
    pub low_stock_threshold: Quantity,
    pub cost_per_unit: Option<Money>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub sync_version: i64,
}

/// Why stock changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    Restock,
    Usage,
    /// Written only by order deduction.
    Order,
    Wastage,
    Damage,
    Theft,
    Correction,
    Other,
}

text_enum!(AdjustmentReason, "reason", {
    Restock => "restock",
    Usage => "usage",
    Order => "order",
    Wastage => "wastage",
    Damage => "damage",
    Theft => "theft",
    Correction => "correction",
    Other => "other",
});

impl AdjustmentReason {
    /// Whether staff may record this reason by hand.
    pub const fn is_manual(&self) -> bool {
        !matches!(self, AdjustmentReason::Order)
    }
}

/// An append-only stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InventoryAdjustment {
    pub id: String,
    pub shop_id: String,
    pub inventory_item_id: String,
    pub previous_quantity: Quantity,
    pub new_quantity: Quantity,
    /// Signed delta; `new_quantity = previous_quantity + adjustment`.
    pub adjustment: Quantity,
    pub reason: AdjustmentReason,
    pub notes: Option<String>,
    /// Order id for deductions.
    pub reference_id: Option<String>,
    pub created_by: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Bills
// =============================================================================

/// A settled bill covering one or more orders of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Bill {
    pub id: String,
    pub shop_id: String,
    pub bill_number: String,
    pub table_id: Option<String>,
    pub order_ids: Vec<String>,
    pub items_snapshot: Vec<LineItem>,
    /// Absent on bills written before breakdowns were stored.
    pub breakdown: Option<BillingBreakdown>,
    pub total_amount: Money,
    pub payment_method: PaymentMethod,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Bill {
    /// Stored breakdown, or the legacy derivation for old rows.
    pub fn effective_breakdown(&self) -> BillingBreakdown {
        billing::legacy::resolve(self.breakdown.as_ref(), self.total_amount)
    }
}

// =============================================================================
// Actors
// =============================================================================

/// What an authenticated caller is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Waiter,
    Kitchen,
    Admin,
}

/// Identity supplied by the staff-auth collaborator (or a seated customer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
    /// Present for customers: the session they joined the table with.
    pub session_id: Option<String>,
}

impl Actor {
    pub fn staff(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Actor {
            id: id.into(),
            name: name.into(),
            role,
            session_id: None,
        }
    }

    pub fn customer(session_id: impl Into<String>, name: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Actor {
            id: session_id.clone(),
            name: name.into(),
            role: Role::Customer,
            session_id: Some(session_id),
        }
    }

    pub fn is_staff(&self) -> bool {
        self.role != Role::Customer
    }

    /// Kitchen display actions: advance and retreat.
    pub fn can_work_kitchen(&self) -> bool {
        matches!(self.role, Role::Kitchen | Role::Admin)
    }

    /// Counter actions: bill and settle.
    pub fn can_bill(&self) -> bool {
        matches!(self.role, Role::Waiter | Role::Admin)
    }

    /// Manual stock corrections.
    pub fn can_adjust_stock(&self) -> bool {
        matches!(self.role, Role::Kitchen | Role::Admin)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
