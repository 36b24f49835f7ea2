//! # Money Module
//!
//! Integer-cent monetary values for sale totals, payments, refunds and the
//! cash session ledger.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Cash reconciliation is an equality check:                              │
//! │                                                                         │
//! │    expected_cash == opening + Σ cash_in − Σ cash_out                   │
//! │                    + Σ settlements − Σ refunds                         │
//! │                                                                         │
//! │  With floats that equality drifts after a few hundred movements.        │
//! │  With i64 cents it holds exactly, forever.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use mercato_core::money::Money;
//!
//! let price = Money::from_cents(4_500);
//! let line = price * 2i64;
//! let fee = line.portion_bps(1_000); // 10% restocking fee
//! assert_eq!(fee.cents(), 900);
//! assert_eq!((line - fee).cents(), 8_100);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// Signed so that cash-out movements, refunds and negative exchange
/// adjustments can be represented directly. Serialized as a bare integer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[serde(transparent)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Returns `bps` basis points of this amount, rounded half up.
    ///
    /// Used for restocking fees: `portion_bps(1_500)` is 15%.
    /// ```rust
    /// use mercato_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(1_000).portion_bps(825).cents(), 83);
    /// ```
    pub fn portion_bps(&self, bps: u32) -> Money {
        // i128 so large totals times bps cannot overflow
        let cents = (self.0 as i128 * bps as i128 + 5_000) / 10_000;
        Money(cents as i64)
    }

    /// Splits this amount proportionally: `self * part / whole`, floored.
    ///
    /// Returning 1 of 3 units on a discounted line worth 1000 refunds 333.
    /// When `part == whole` the full amount is returned so the last unit
    /// absorbs the remainder.
    pub fn prorate(&self, part: i64, whole: i64) -> Money {
        if whole <= 0 || part >= whole {
            return *self;
        }
        Money(((self.0 as i128 * part as i128) / whole as i128) as i64)
    }

    /// Returns the larger of zero and `self`.
    #[inline]
    pub fn clamp_non_negative(self) -> Money {
        if self.0 < 0 {
            Money(0)
        } else {
            self
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
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

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
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

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
