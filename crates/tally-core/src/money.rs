//! # Money Module
//!
//! Provides the `Money` type for monetary values.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  The sheet stores prices as plain numbers (12.5, "12.50", 12.499999)   │
//! │  and the web UI used to add them as floats:                             │
//! │    0.1 + 0.2 = 0.30000000000000004                                      │
//! │                                                                         │
//! │  Tally keeps every amount in minor units (paise/cents) as i64.          │
//! │  Floats only appear at the sheet boundary, once, in                     │
//! │  `from_major_lossy` / `to_major`.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Arithmetic saturates at the i64 bounds instead of overflowing.
//!
//! ## Usage
//! ```rust
//! use tally_core::money::Money;
//!
//! let price = Money::from_minor(1099); // 10.99
//! let line = price * 3;
//! assert_eq!(line.minor(), 3297);
//! assert_eq!(Money::from_major_lossy(10.99), price);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// ## Design Decisions
/// - **i64 (signed)**: a discount larger than the subtotal produces a
///   negative taxable amount; we keep the sign instead of clamping
/// - **Single field tuple struct**: zero-cost over i64
/// - **Transparent sqlx type**: stored as INTEGER
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Largest magnitude, in major units, accepted from a sheet cell.
    ///
    /// Sums of up to ~90,000 such amounts still fit in i64.
    pub const MAX_MAJOR: f64 = 1e12;

    /// Creates a Money value from minor units.
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Converts a major-unit float (as found in sheet cells) to Money.
    ///
    /// Rounds to the nearest minor unit. Non-finite input becomes zero,
    /// matching the row mapper's "unparsable means 0" rule. Magnitudes
    /// beyond `MAX_MAJOR` are clamped.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// assert_eq!(Money::from_major_lossy(12.5).minor(), 1250);
    /// assert_eq!(Money::from_major_lossy(0.1 + 0.2).minor(), 30);
    /// assert_eq!(Money::from_major_lossy(f64::NAN).minor(), 0);
    /// assert_eq!(Money::from_major_lossy(6e16), Money::from_major_lossy(Money::MAX_MAJOR));
    /// ```
    pub fn from_major_lossy(major: f64) -> Self {
        if !major.is_finite() {
            return Money::zero();
        }
        let clamped = major.clamp(-Self::MAX_MAJOR, Self::MAX_MAJOR);
        Money((clamped * 100.0).round() as i64)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Returns the value as a major-unit float, for writing sheet cells.
    #[inline]
    pub fn to_major(&self) -> f64 {
        self.0 as f64 / 100.0
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

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Calculates tax at the given rate, rounding half up.
    ///
    /// ## Implementation
    /// Integer math: `(amount * bps + 5000) / 10000`, in i128 so large
    /// totals cannot overflow.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    /// use tally_core::types::TaxRate;
    ///
    /// let taxable = Money::from_minor(1000); // 10.00
    /// let rate = TaxRate::from_percentage(18.0);
    /// assert_eq!(taxable.calculate_tax(rate).minor(), 180);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        let tax = (self.0 as i128 * rate.bps() as i128 + 5000).div_euclid(10000);
        Money::from_minor(tax.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain two-decimal rendering; currency symbols belong to the UI.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_add(other.0);
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0.saturating_sub(other.0))
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_sub(other.0);
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
