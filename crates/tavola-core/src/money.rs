//! # Money Module
//!
//! Integer money, basis-point rates and fixed-point stock quantities.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  A bill computed with floats:                                           │
//! │    110.00 / 1.10 = 99.99999999999999  ❌ subtotal off by a hair         │
//! │                                                                         │
//! │  Three observers (customer, KDS, admin) recomputing the same bill      │
//! │  with floats can each show a different last digit.                     │
//! │                                                                         │
//! │  OUR SOLUTION: Integer minor units                                      │
//! │    11000 * 10000 / 11000 = 10000  (exact, identical everywhere)        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tavola_core::money::{Money, Rate};
//!
//! let price = Money::from_cents(5000);     // 50.00
//! let line = price.multiply_quantity(2);   // 100.00
//! let tax = line.apply_rate(Rate::from_bps(1000));
//! assert_eq!(tax.cents(), 1000);           // 10.00
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (paise, cents, ...).
///
/// ## Where Money is Used
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  MenuItem.price ──► LineItem.unit_price (snapshot) ──► line total       │
/// │                                                          │              │
/// │                                                          ▼              │
/// │  item_total ──► subtotal / tax / service charge ──► grand_total        │
/// │                                                          │              │
/// │                                                          ▼              │
/// │                          Order.total_amount, Bill.total_amount          │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use tavola_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// ## Note
    /// For negative amounts, only the major unit should be negative.
    /// `from_major_minor(-5, 50)` is -5.50, not -4.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Clamps negative values to zero.
    ///
    /// Used when a discount exceeds the subtotal: the bill floors at zero
    /// instead of turning into a refund.
    #[inline]
    pub const fn floor_zero(&self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            Money(self.0)
        }
    }

    /// Applies a rate to this amount, rounding half up.
    ///
    /// ## Implementation
    /// Integer math: `(amount * bps + 5000) / 10000`.
    /// The +5000 provides rounding (5000/10000 = 0.5).
    ///
    /// ## Example
    /// ```rust
    /// use tavola_core::money::{Money, Rate};
    ///
    /// let subtotal = Money::from_cents(1000);
    /// // 10.00 × 8.25% = 0.825 → 0.83
    /// assert_eq!(subtotal.apply_rate(Rate::from_bps(825)).cents(), 83);
    /// ```
    pub fn apply_rate(&self, rate: Rate) -> Money {
        // i128 so large bills cannot overflow the intermediate product
        let cents = (self.0 as i128 * rate.bps() as i128 + 5000).div_euclid(10000);
        Money::from_cents(cents as i64)
    }

    /// Removes an included rate from a gross amount, returning the net part.
    ///
    /// `net = gross / (1 + rate)`, rounded half up.
    ///
    /// ## Example
    /// ```rust
    /// use tavola_core::money::{Money, Rate};
    ///
    /// // 110.00 including 10% tax → 100.00 net
    /// let net = Money::from_cents(11000).exclude_rate(Rate::from_bps(1000));
    /// assert_eq!(net.cents(), 10000);
    /// ```
    pub fn exclude_rate(&self, rate: Rate) -> Money {
        let denominator = 10000_i128 + rate.bps() as i128;
        let numerator = self.0 as i128 * 10000;
        let cents = (2 * numerator + denominator).div_euclid(2 * denominator);
        Money::from_cents(cents as i64)
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal rendering for logs; currency symbols belong to the UI.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

// =============================================================================
// Rate
// =============================================================================

/// A percentage rate represented in basis points (bps).
///
/// Used for both tax and service charge.
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000, so 250 bps = 2.5% (a typical service
/// charge) and 500 bps = 5% GST are both exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Rate(u32);

impl Rate {
    /// Creates a rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        Rate(bps)
    }

    /// Creates a rate from a whole percentage (10 → 10%).
    #[inline]
    pub const fn from_percent(pct: u32) -> Self {
        Rate(pct * 100)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero rate.
    #[inline]
    pub const fn zero() -> Self {
        Rate(0)
    }

    /// Checks if the rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// A stock quantity in thousandths of a unit.
///
/// Recipes routinely need fractional amounts (0.25 kg of paneer, 15 ml of
/// oil), so inventory never uses floats either: `Quantity::from_milli(250)`
/// is a quarter of whatever unit the inventory item is tracked in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[ts(export)]
pub struct Quantity(i64);

impl Quantity {
    /// Thousandths per whole unit.
    pub const SCALE: i64 = 1000;

    /// Creates a quantity from thousandths of a unit.
    #[inline]
    pub const fn from_milli(milli: i64) -> Self {
        Quantity(milli)
    }

    /// Creates a quantity from whole units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * Self::SCALE)
    }

    /// Returns the raw value in thousandths.
    #[inline]
    pub const fn milli(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Quantity(0)
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Scales a per-unit requirement by an ordered count.
    ///
    /// ## Example
    /// ```rust
    /// use tavola_core::money::Quantity;
    ///
    /// // 0.25 kg per plate × 2 plates = 0.5 kg
    /// let needed = Quantity::from_milli(250).times(2);
    /// assert_eq!(needed, Quantity::from_milli(500));
    /// ```
    #[inline]
    pub const fn times(&self, count: i64) -> Self {
        Quantity(self.0 * count)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:03}", sign, abs / Self::SCALE, abs % Self::SCALE)
    }
}

impl Add for Quantity {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Quantity(self.0 + other.0)
    }
}

impl AddAssign for Quantity {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Quantity {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Quantity(self.0 - other.0)
    }
}

impl Neg for Quantity {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Quantity(-self.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.major(), 10);
        assert_eq!(money.minor(), 99);
    }

    #[test]
    fn test_from_major_minor() {
        assert_eq!(Money::from_major_minor(10, 99).cents(), 1099);
        assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "10.99");
        assert_eq!(Money::from_cents(500).to_string(), "5.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn test_arithmetic_and_sum() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((a * 3).cents(), 3000);

        let total: Money = vec![a, b, b].into_iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_apply_rate_rounds_half_up() {
        assert_eq!(Money::from_cents(1000).apply_rate(Rate::from_bps(1000)).cents(), 100);
        assert_eq!(Money::from_cents(1000).apply_rate(Rate::from_bps(825)).cents(), 83);
        assert_eq!(Money::from_cents(10000).apply_rate(Rate::zero()).cents(), 0);
    }

    #[test]
    fn test_exclude_rate() {
        // 110.00 gross at 10% → 100.00 net
        assert_eq!(Money::from_cents(11000).exclude_rate(Rate::from_bps(1000)).cents(), 10000);
        // 100.00 gross at 5% → 95.238 → 95.24
        assert_eq!(Money::from_cents(10000).exclude_rate(Rate::from_bps(500)).cents(), 9524);
        // Zero rate is the identity
        assert_eq!(Money::from_cents(1234).exclude_rate(Rate::zero()).cents(), 1234);
    }

    #[test]
    fn test_floor_zero() {
        assert_eq!(Money::from_cents(-10).floor_zero(), Money::zero());
        assert_eq!(Money::from_cents(10).floor_zero(), Money::from_cents(10));
    }

    #[test]
    fn test_rate_display() {
        assert_eq!(Rate::from_bps(250).to_string(), "2.50%");
        assert_eq!(Rate::from_percent(10).bps(), 1000);
        assert!((Rate::from_bps(825).percentage() - 8.25).abs() < 0.001);
    }

    #[test]
    fn test_quantity() {
        let q = Quantity::from_milli(250).times(3);
        assert_eq!(q.milli(), 750);
        assert_eq!(q.to_string(), "0.750");
        assert_eq!((Quantity::from_units(1) - Quantity::from_milli(1500)).to_string(), "-0.500");
        assert!((-Quantity::from_units(2)).is_negative());
    }
}
