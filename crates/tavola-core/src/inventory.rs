//! # Inventory Rules
//!
//! Pure planning for stock movements. The store applies what this module
//! decides, one adjustment row per change, in the caller's transaction.
//!
//! ## Order Deduction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Order #42: 2 × Paneer Tikka, 1 × Butter Naan                          │
//! │                                                                         │
//! │  recipes:  Paneer Tikka ─► paneer 0.250, oil 0.015                     │
//! │            Butter Naan  ─► flour 0.120, oil 0.005                      │
//! │                                                                         │
//! │  plan_deductions() aggregates per inventory item:                      │
//! │     paneer  −0.500                                                     │
//! │     oil     −0.035   (0.015 × 2 + 0.005 × 1)                           │
//! │     flour   −0.120                                                     │
//! │                                                                         │
//! │  One `order` adjustment per item, reference_id = order id              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Quantity;
use crate::types::{AdjustmentReason, InventoryItem, LineItem, RecipeLine};
use crate::validation::validate_notes;
use crate::EOD_RECONCILIATION_NOTES;

// =============================================================================
// Deduction Planning
// =============================================================================

/// One ingredient decrement for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDeduction {
    pub inventory_item_id: String,
    /// Positive amount to remove.
    pub quantity: Quantity,
}

/// Aggregates recipe requirements for every line of an order.
///
/// Lines without a menu item, or menu items without a recipe, contribute
/// nothing. Output is sorted by inventory item id so the store always
/// updates rows in the same order.
pub fn plan_deductions(lines: &[LineItem], recipes: &[RecipeLine]) -> Vec<PlannedDeduction> {
    let mut totals: BTreeMap<&str, Quantity> = BTreeMap::new();

    for line in lines {
        let Some(menu_item_id) = line.menu_item_id.as_deref() else {
            continue;
        };
        for recipe in recipes.iter().filter(|r| r.menu_item_id == menu_item_id) {
            *totals.entry(recipe.inventory_item_id.as_str()).or_default() +=
                recipe.quantity_required.times(line.quantity);
        }
    }

    totals
        .into_iter()
        .filter(|(_, qty)| *qty != Quantity::zero())
        .map(|(id, quantity)| PlannedDeduction {
            inventory_item_id: id.to_string(),
            quantity,
        })
        .collect()
}

// =============================================================================
// Manual Adjustments
// =============================================================================

/// One entry of a manual or bulk stock adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AdjustmentRequest {
    pub inventory_item_id: String,
    /// Signed change: positive adds stock.
    pub delta: Quantity,
    pub reason: AdjustmentReason,
    pub notes: Option<String>,
}

/// Per-entry outcome of a bulk adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdjustmentOutcome {
    Applied { new_quantity: Quantity },
    Rejected { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AdjustmentReport {
    pub inventory_item_id: String,
    #[serde(flatten)]
    pub outcome: AdjustmentOutcome,
}

impl AdjustmentReport {
    pub fn is_applied(&self) -> bool {
        matches!(self.outcome, AdjustmentOutcome::Applied { .. })
    }
}

/// Checks a manual adjustment against the current item and returns the
/// resulting stock.
///
/// ## Rules
/// - `order` is reserved for deduction
/// - Delta must be non-zero
/// - The result must not be negative
pub fn check_manual_adjustment(
    item: &InventoryItem,
    request: &AdjustmentRequest,
) -> CoreResult<Quantity> {
    if !request.reason.is_manual() {
        return Err(ValidationError::NotAllowed {
            field: "reason".to_string(),
            allowed: AdjustmentReason::ALL
                .iter()
                .filter(|r| r.is_manual())
                .map(|r| r.as_str().to_string())
                .collect(),
        }
        .into());
    }

    if request.delta == Quantity::zero() {
        return Err(ValidationError::InvalidFormat {
            field: "delta".to_string(),
            reason: "must be non-zero".to_string(),
        }
        .into());
    }

    if let Some(notes) = &request.notes {
        validate_notes(notes)?;
    }

    let new_quantity = item.stock_quantity + request.delta;
    if new_quantity.is_negative() {
        return Err(CoreError::NegativeStock {
            item: item.name.clone(),
            current: item.stock_quantity.to_string(),
            delta: request.delta.to_string(),
        });
    }

    Ok(new_quantity)
}

/// Notes stored with a manual adjustment; blank becomes the end-of-day label.
pub fn adjustment_notes(notes: Option<&str>) -> String {
    match notes.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => EOD_RECONCILIATION_NOTES.to_string(),
    }
}

// =============================================================================
// Stock Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Out,
    Low,
    Ok,
}

/// `out` at or below zero, `low` at or below the threshold, else `ok`.
pub fn stock_status(item: &InventoryItem) -> StockStatus {
    if item.stock_quantity <= Quantity::zero() {
        StockStatus::Out
    } else if item.stock_quantity <= item.low_stock_threshold {
        StockStatus::Low
    } else {
        StockStatus::Ok
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
