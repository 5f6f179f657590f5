//! # Billing Calculator
//!
//! Pure bill breakdown math: line items + policy → subtotal, tax, service
//! charge and grand total.
//!
//! ## Calculation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Breakdown Calculation                              │
//! │                                                                         │
//! │  item_total = Σ unit_price × quantity                                   │
//! │       │                                                                 │
//! │       ├── tax_included_in_price ──► subtotal = item_total / (1 + tax)  │
//! │       │                             tax      = item_total − subtotal   │
//! │       │                                                                 │
//! │       └── otherwise ──────────────► subtotal = item_total              │
//! │                                     tax      = subtotal × tax          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  service_charge = subtotal × service_rate   (always tax-exclusive)     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  grand_total = subtotal + tax + service_charge                         │
//! │              + packaging + delivery   (takeaway / delivery only)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bill-time [`Adjustments`] (a discount, a waived service charge, the
//! order's packaging and delivery [`OrderCharges`]) are layered on top by
//! [`calculate_with`]. With no adjustments the result is identical to
//! [`calculate`].
//!
//! Packaging and delivery charges are fixed per order when it is placed
//! ([`Charge::on`] against the item total). They are never discounted,
//! taxed or service-charged.
//!
//! Bills persisted before breakdowns were stored are handled by the isolated
//! [`legacy`] module and nowhere else.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::money::{Money, Rate};
use crate::types::{LineItem, ServiceType};

// =============================================================================
// Policy
// =============================================================================

/// The shop's pricing rules at the moment of calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BillingPolicy {
    pub tax_rate: Rate,
    pub service_charge_rate: Rate,
    /// Listed prices already contain tax.
    pub tax_included_in_price: bool,
}

// =============================================================================
// Packaging & Delivery
// =============================================================================

/// A per-order charge configured by the shop.
///
/// Stored as a kind plus an amount: minor units for `flat`, basis points
/// for `percent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum Charge {
    Flat(Money),
    /// Share of the order's item total.
    Percent(Rate),
}

impl Default for Charge {
    fn default() -> Self {
        Charge::Flat(Money::zero())
    }
}

impl Charge {
    /// The charge on an order whose lines sum to `item_total`.
    ///
    /// ## Example
    /// ```rust
    /// use tavola_core::billing::Charge;
    /// use tavola_core::money::{Money, Rate};
    ///
    /// let total = Money::from_cents(20000);
    /// assert_eq!(Charge::Flat(Money::from_cents(1500)).on(total).cents(), 1500);
    /// assert_eq!(Charge::Percent(Rate::from_percent(5)).on(total).cents(), 1000);
    /// ```
    pub fn on(&self, item_total: Money) -> Money {
        match self {
            Charge::Flat(amount) => amount.floor_zero(),
            Charge::Percent(rate) => item_total.floor_zero().apply_rate(*rate),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Charge::Flat(_) => "flat",
            Charge::Percent(_) => "percent",
        }
    }
}

/// Packaging and delivery charges carried by an order (or summed across
/// the orders on one bill).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderCharges {
    pub packaging: Money,
    pub delivery: Money,
}

impl OrderCharges {
    /// Charges for a new order of `service_type`.
    ///
    /// Dine-in carries none. Takeaway pays packaging. Delivery pays
    /// packaging and the delivery fee.
    pub fn for_service(
        service_type: ServiceType,
        item_total: Money,
        packaging: &Charge,
        delivery: &Charge,
    ) -> Self {
        match service_type {
            ServiceType::DineIn => OrderCharges::default(),
            ServiceType::Takeaway => OrderCharges {
                packaging: packaging.on(item_total),
                delivery: Money::zero(),
            },
            ServiceType::Delivery => OrderCharges {
                packaging: packaging.on(item_total),
                delivery: delivery.on(item_total),
            },
        }
    }

    pub fn total(&self) -> Money {
        self.packaging + self.delivery
    }
}

impl std::ops::Add for OrderCharges {
    type Output = OrderCharges;

    fn add(self, rhs: OrderCharges) -> OrderCharges {
        OrderCharges {
            packaging: self.packaging + rhs.packaging,
            delivery: self.delivery + rhs.delivery,
        }
    }
}

// =============================================================================
// Breakdown
// =============================================================================

/// A bill decomposition.
///
/// The policy fields are copied in so a stored breakdown explains itself
/// even after the shop changes its tax settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BillingBreakdown {
    pub item_total: Money,
    /// Tax-exclusive subtotal before any discount.
    pub subtotal: Money,
    pub discount: Money,
    pub discount_reason: Option<String>,
    pub tax: Money,
    pub service_charge: Money,
    #[serde(default)]
    pub packaging_total: Money,
    #[serde(default)]
    pub delivery_total: Money,
    pub grand_total: Money,
    pub tax_rate: Rate,
    pub service_charge_rate: Rate,
    pub tax_included_in_price: bool,
    /// True when re-derived by the legacy shim rather than stored.
    #[serde(default)]
    pub legacy: bool,
}

/// Bill-time modifications entered at the counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Adjustments {
    /// Flat discount off the tax-exclusive subtotal.
    pub discount: Money,
    /// Required whenever `discount` is non-zero.
    pub discount_reason: Option<String>,
    /// Set false to waive the service charge for this bill.
    pub include_service_charge: bool,
    /// Packaging and delivery carried by the billed orders.
    #[serde(default)]
    pub charges: OrderCharges,
}

impl Default for Adjustments {
    fn default() -> Self {
        Adjustments {
            discount: Money::zero(),
            discount_reason: None,
            include_service_charge: true,
            charges: OrderCharges::default(),
        }
    }
}

impl Adjustments {
    /// No discount. Service charge for dine-in only, plus the order's own
    /// packaging and delivery charges.
    pub fn for_service(service_type: ServiceType, charges: OrderCharges) -> Self {
        Adjustments {
            include_service_charge: service_type.is_dine_in(),
            charges,
            ..Adjustments::default()
        }
    }
}

// =============================================================================
// Calculation
// =============================================================================

/// Computes a breakdown under `policy`.
///
/// ## Example
/// ```rust
/// use tavola_core::billing::{calculate, BillingPolicy};
/// use tavola_core::money::{Money, Rate};
/// use tavola_core::types::LineItem;
///
/// let items = vec![LineItem {
///     menu_item_id: None,
///     name: "Thali".into(),
///     unit_price: Money::from_cents(10000),
///     quantity: 1,
///     note: None,
/// }];
/// let policy = BillingPolicy {
///     tax_rate: Rate::from_percent(10),
///     service_charge_rate: Rate::from_percent(5),
///     tax_included_in_price: false,
/// };
///
/// let bill = calculate(&items, &policy);
/// assert_eq!(bill.subtotal.cents(), 10000);
/// assert_eq!(bill.tax.cents(), 1000);
/// assert_eq!(bill.service_charge.cents(), 500);
/// assert_eq!(bill.grand_total.cents(), 11500);
/// ```
pub fn calculate(items: &[LineItem], policy: &BillingPolicy) -> BillingBreakdown {
    let item_total: Money = items.iter().map(LineItem::line_total).sum();
    let (subtotal, tax) = split_tax(item_total, policy);
    let service_charge = subtotal.apply_rate(policy.service_charge_rate);

    BillingBreakdown {
        item_total,
        subtotal,
        discount: Money::zero(),
        discount_reason: None,
        tax,
        service_charge,
        packaging_total: Money::zero(),
        delivery_total: Money::zero(),
        grand_total: subtotal + tax + service_charge,
        tax_rate: policy.tax_rate,
        service_charge_rate: policy.service_charge_rate,
        tax_included_in_price: policy.tax_included_in_price,
        legacy: false,
    }
}

/// The provisional breakdown of an unbilled order: no discount, service
/// charge for dine-in only, the order's packaging and delivery included.
pub fn provisional(
    items: &[LineItem],
    policy: &BillingPolicy,
    service_type: ServiceType,
    charges: OrderCharges,
) -> BillingBreakdown {
    let mut bill = calculate(items, policy);
    if !service_type.is_dine_in() {
        bill.service_charge = Money::zero();
    }
    bill.packaging_total = charges.packaging;
    bill.delivery_total = charges.delivery;
    bill.grand_total = bill.subtotal + bill.tax + bill.service_charge + charges.total();
    bill
}

/// Computes a breakdown with bill-time adjustments applied.
///
/// ## Rules
/// - `discounted = max(0, subtotal − discount)`
/// - With a discount, tax is recomputed on `discounted` at the tax rate
/// - Service charge is computed on `discounted`, or zero when waived
/// - Packaging and delivery are added to the grand total as they are
///
/// ## Errors
/// - Negative discount
/// - Discount without a reason
pub fn calculate_with(
    items: &[LineItem],
    policy: &BillingPolicy,
    adjustments: &Adjustments,
) -> CoreResult<BillingBreakdown> {
    if adjustments.discount.is_negative() {
        return Err(ValidationError::MustBePositive {
            field: "discount".to_string(),
        }
        .into());
    }

    let reason = adjustments
        .discount_reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());
    if adjustments.discount.is_positive() && reason.is_none() {
        return Err(ValidationError::Required {
            field: "discount_reason".to_string(),
        }
        .into());
    }

    let mut bill = calculate(items, policy);
    let charges = adjustments.charges;
    bill.packaging_total = charges.packaging;
    bill.delivery_total = charges.delivery;
    if adjustments.discount.is_zero() && adjustments.include_service_charge {
        bill.grand_total += charges.total();
        return Ok(bill);
    }

    let discount = adjustments.discount.min(bill.subtotal.floor_zero());
    let discounted = (bill.subtotal - discount).floor_zero();
    if discount.is_positive() {
        bill.tax = discounted.apply_rate(policy.tax_rate);
        bill.discount = discount;
        bill.discount_reason = reason.map(str::to_string);
    }
    bill.service_charge = if adjustments.include_service_charge {
        discounted.apply_rate(policy.service_charge_rate)
    } else {
        Money::zero()
    };
    bill.grand_total = discounted + bill.tax + bill.service_charge + charges.total();

    Ok(bill)
}

/// Splits a gross item total into (tax-exclusive subtotal, tax).
fn split_tax(item_total: Money, policy: &BillingPolicy) -> (Money, Money) {
    if policy.tax_included_in_price {
        let subtotal = item_total.exclude_rate(policy.tax_rate);
        (subtotal, item_total - subtotal)
    } else {
        (item_total, item_total.apply_rate(policy.tax_rate))
    }
}

// =============================================================================
// Legacy Fallback
// =============================================================================

/// Compatibility shim for bills stored before breakdowns existed.
///
/// Those rows only kept a total. The historical rule was a flat 10% tax
/// already included in prices and no service charge, so that is what gets
/// re-derived. Nothing outside this module assumes those numbers.
pub mod legacy {
    use super::BillingBreakdown;
    use crate::money::{Money, Rate};

    /// Tax assumed for breakdown-less bills.
    pub const LEGACY_TAX_RATE: Rate = Rate::from_bps(1000);

    /// Re-derives a breakdown from a stored grand total.
    ///
    /// ## Example
    /// ```rust
    /// use tavola_core::billing::legacy;
    /// use tavola_core::money::Money;
    ///
    /// let b = legacy::derive(Money::from_cents(11000));
    /// assert_eq!(b.subtotal.cents(), 10000);
    /// assert_eq!(b.tax.cents(), 1000);
    /// assert!(b.legacy);
    /// ```
    pub fn derive(total: Money) -> BillingBreakdown {
        let subtotal = total.exclude_rate(LEGACY_TAX_RATE);
        BillingBreakdown {
            item_total: total,
            subtotal,
            discount: Money::zero(),
            discount_reason: None,
            tax: total - subtotal,
            service_charge: Money::zero(),
            packaging_total: Money::zero(),
            delivery_total: Money::zero(),
            grand_total: total,
            tax_rate: LEGACY_TAX_RATE,
            service_charge_rate: Rate::zero(),
            tax_included_in_price: true,
            legacy: true,
        }
    }

    /// Returns the stored breakdown when present, else the legacy derivation.
    pub fn resolve(stored: Option<&BillingBreakdown>, total: Money) -> BillingBreakdown {
        match stored {
            Some(breakdown) => breakdown.clone(),
            None => derive(total),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn items(lines: &[(i64, i64)]) -> Vec<LineItem> {
        lines
            .iter()
            .enumerate()
            .map(|(i, (price, qty))| LineItem {
                menu_item_id: Some(format!("m{}", i)),
                name: format!("Item {}", i),
                unit_price: Money::from_cents(*price),
                quantity: *qty,
                note: None,
            })
            .collect()
    }

    fn policy(tax_pct: u32, service_pct: u32, included: bool) -> BillingPolicy {
        BillingPolicy {
            tax_rate: Rate::from_percent(tax_pct),
            service_charge_rate: Rate::from_percent(service_pct),
            tax_included_in_price: included,
        }
    }

    #[test]
    fn test_exclusive_tax_with_service_charge() {
        let bill = calculate(&items(&[(10000, 1)]), &policy(10, 5, false));
        assert_eq!(bill.subtotal.cents(), 10000);
        assert_eq!(bill.tax.cents(), 1000);
        assert_eq!(bill.service_charge.cents(), 500);
        assert_eq!(bill.grand_total.cents(), 11500);
    }

    #[test]
    fn test_inclusive_tax_decomposition() {
        let bill = calculate(&items(&[(11000, 1)]), &policy(10, 0, true));
        assert_eq!(bill.item_total.cents(), 11000);
        assert_eq!(bill.subtotal.cents(), 10000);
        assert_eq!(bill.tax.cents(), 1000);
        assert_eq!(bill.grand_total.cents(), 11000);
    }

    #[test]
    fn test_service_charge_uses_exclusive_subtotal_when_inclusive() {
        let bill = calculate(&items(&[(11000, 1)]), &policy(10, 5, true));
        // 5% of 100.00, not of 110.00
        assert_eq!(bill.service_charge.cents(), 500);
        assert_eq!(bill.grand_total.cents(), 11500);
    }

    #[test]
    fn test_multiple_lines_sum() {
        let bill = calculate(&items(&[(5000, 2), (2500, 3)]), &policy(5, 0, false));
        assert_eq!(bill.item_total.cents(), 17500);
        assert_eq!(bill.tax.cents(), 875);
    }

    #[test]
    fn test_empty_order_is_zero() {
        let bill = calculate(&[], &policy(10, 5, false));
        assert!(bill.grand_total.is_zero());
    }

    #[test]
    fn test_policy_captured_in_breakdown() {
        let bill = calculate(&items(&[(1000, 1)]), &policy(18, 10, true));
        assert_eq!(bill.tax_rate, Rate::from_percent(18));
        assert_eq!(bill.service_charge_rate, Rate::from_percent(10));
        assert!(bill.tax_included_in_price);
        assert!(!bill.legacy);
    }

    #[test]
    fn test_no_adjustments_equals_plain_calculation() {
        let lines = items(&[(11000, 1)]);
        let p = policy(10, 5, true);
        let plain = calculate(&lines, &p);
        let adjusted = calculate_with(&lines, &p, &Adjustments::default()).unwrap();
        assert_eq!(plain, adjusted);
    }

    #[test]
    fn test_discount_recomputes_tax_and_service() {
        let adjustments = Adjustments {
            discount: Money::from_cents(2000),
            discount_reason: Some("regular guest".into()),
            include_service_charge: true,
            charges: OrderCharges::default(),
        };
        let bill = calculate_with(&items(&[(10000, 1)]), &policy(10, 5, false), &adjustments).unwrap();
        assert_eq!(bill.discount.cents(), 2000);
        assert_eq!(bill.tax.cents(), 800);
        assert_eq!(bill.service_charge.cents(), 400);
        assert_eq!(bill.grand_total.cents(), 8000 + 800 + 400);
        assert_eq!(bill.discount_reason.as_deref(), Some("regular guest"));
    }

    #[test]
    fn test_discount_larger_than_subtotal_floors_at_zero() {
        let adjustments = Adjustments {
            discount: Money::from_cents(50000),
            discount_reason: Some("complimentary".into()),
            include_service_charge: true,
            charges: OrderCharges::default(),
        };
        let bill = calculate_with(&items(&[(10000, 1)]), &policy(10, 5, false), &adjustments).unwrap();
        assert_eq!(bill.discount.cents(), 10000);
        assert!(bill.grand_total.is_zero());
    }

    #[test]
    fn test_discount_requires_reason() {
        let adjustments = Adjustments {
            discount: Money::from_cents(100),
            discount_reason: Some("   ".into()),
            include_service_charge: true,
            charges: OrderCharges::default(),
        };
        assert!(calculate_with(&items(&[(10000, 1)]), &policy(10, 0, false), &adjustments).is_err());
    }

    #[test]
    fn test_waived_service_charge() {
        let adjustments = Adjustments {
            include_service_charge: false,
            ..Adjustments::default()
        };
        let bill = calculate_with(&items(&[(10000, 1)]), &policy(10, 5, false), &adjustments).unwrap();
        assert!(bill.service_charge.is_zero());
        assert_eq!(bill.tax.cents(), 1000);
        assert_eq!(bill.grand_total.cents(), 11000);
    }

    fn charges(packaging: i64, delivery: i64) -> OrderCharges {
        OrderCharges {
            packaging: Money::from_cents(packaging),
            delivery: Money::from_cents(delivery),
        }
    }

    #[test]
    fn test_charges_by_service_type() {
        let item_total = Money::from_cents(40000);
        let packaging = Charge::Flat(Money::from_cents(2000));
        let delivery = Charge::Percent(Rate::from_percent(5));

        let dine_in = OrderCharges::for_service(ServiceType::DineIn, item_total, &packaging, &delivery);
        assert_eq!(dine_in, OrderCharges::default());

        let takeaway = OrderCharges::for_service(ServiceType::Takeaway, item_total, &packaging, &delivery);
        assert_eq!(takeaway, charges(2000, 0));

        let delivered = OrderCharges::for_service(ServiceType::Delivery, item_total, &packaging, &delivery);
        assert_eq!(delivered, charges(2000, 2000));
        assert_eq!(delivered.total().cents(), 4000);
    }

    #[test]
    fn test_charges_reach_grand_total() {
        let adjustments = Adjustments::for_service(ServiceType::Delivery, charges(2000, 3000));
        let bill = calculate_with(&items(&[(10000, 1)]), &policy(10, 5, false), &adjustments).unwrap();
        // no service charge off the premises
        assert!(bill.service_charge.is_zero());
        assert_eq!(bill.packaging_total.cents(), 2000);
        assert_eq!(bill.delivery_total.cents(), 3000);
        assert_eq!(bill.grand_total.cents(), 10000 + 1000 + 2000 + 3000);
    }

    #[test]
    fn test_provisional_matches_unadjusted_bill() {
        let lines = items(&[(5000, 2)]);
        let p = policy(5, 10, true);
        let adjustments = Adjustments::for_service(ServiceType::Takeaway, charges(1000, 0));
        assert_eq!(
            provisional(&lines, &p, ServiceType::Takeaway, charges(1000, 0)),
            calculate_with(&lines, &p, &adjustments).unwrap()
        );
        assert_eq!(
            provisional(&lines, &p, ServiceType::DineIn, OrderCharges::default()),
            calculate(&lines, &p)
        );
    }

    #[test]
    fn test_discount_never_touches_charges() {
        let adjustments = Adjustments {
            discount: Money::from_cents(10000),
            discount_reason: Some("staff meal".into()),
            include_service_charge: false,
            charges: charges(1500, 0),
        };
        let bill = calculate_with(&items(&[(10000, 1)]), &policy(10, 0, false), &adjustments).unwrap();
        assert!(bill.tax.is_zero());
        assert_eq!(bill.packaging_total.cents(), 1500);
        assert_eq!(bill.grand_total.cents(), 1500);
    }

    #[test]
    fn test_breakdown_without_charge_fields_decodes() {
        let stored = calculate(&items(&[(1000, 1)]), &policy(0, 0, false));
        let mut value = serde_json::to_value(&stored).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("packaging_total");
        object.remove("delivery_total");
        let decoded: BillingBreakdown = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, stored);
    }

    #[test]
    fn test_legacy_derivation() {
        let b = legacy::derive(Money::from_cents(11000));
        assert_eq!(b.subtotal.cents(), 10000);
        assert_eq!(b.tax.cents(), 1000);
        assert!(b.service_charge.is_zero());
        assert_eq!(b.grand_total.cents(), 11000);
        assert_eq!(b.tax_rate, legacy::LEGACY_TAX_RATE);
    }

    #[test]
    fn test_legacy_resolve_prefers_stored() {
        let stored = calculate(&items(&[(10000, 1)]), &policy(5, 0, false));
        let resolved = legacy::resolve(Some(&stored), Money::from_cents(99999));
        assert_eq!(resolved, stored);
        assert!(legacy::resolve(None, Money::from_cents(11000)).legacy);
    }
}
