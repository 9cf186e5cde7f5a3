//! # Money Module
//!
//! Integer money for prices, totals and refunds.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Prices cross two databases and a JSON wire format.                    │
//! │                                                                         │
//! │  As floats:   12.10 + 0.20 = 12.299999999999999  ❌                      │
//! │  As cents:    1210  + 20   = 1230                 ✅                      │
//! │                                                                         │
//! │  Every amount in the ledger, sales, returns and the sync payloads is   │
//! │  an i64 count of the smallest currency unit.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockbridge_core::money::Money;
//!
//! let unit = Money::from_cents(1250);
//! let line = unit.multiply_quantity(3);
//! assert_eq!(line.cents(), 3750);
//! assert_eq!(line.to_string(), "37.50");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// Signed so refunds and corrections can be expressed directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
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

    /// Zero.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Multiplies a unit price by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Calculates tax on this amount using Bankers Rounding (round half to even).
    ///
    /// ## Rounding
    /// ```text
    /// ┌─────────────────────────────────────────────────────────────────────┐
    /// │  raw = cents × bps / 10000                                          │
    /// │                                                                     │
    /// │  remainder <  half  → round down                                    │
    /// │  remainder >  half  → round up                                      │
    /// │  remainder == half  → round to the even neighbour                   │
    /// │                                                                     │
    /// │  1250 × 2000 bps = 250.0  → 250                                     │
    /// │    25 ×  500 bps =   1.25 → 1                                       │
    /// │    30 ×  500 bps =   1.5  → 2                                       │
    /// │    50 ×  500 bps =   2.5  → 2                                       │
    /// └─────────────────────────────────────────────────────────────────────┘
    /// ```
    ///
    /// ## Example
    /// ```rust
    /// use stockbridge_core::money::Money;
    /// use stockbridge_core::types::TaxRate;
    ///
    /// let tax = Money::from_cents(1250).calculate_tax(TaxRate::from_bps(2000));
    /// assert_eq!(tax.cents(), 250);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        // i128 keeps large totals from overflowing before the division
        let numerator = self.0 as i128 * rate.bps() as i128;
        let quotient = numerator.div_euclid(10_000);
        let remainder = numerator.rem_euclid(10_000);

        let rounded = match remainder.cmp(&5_000) {
            std::cmp::Ordering::Less => quotient,
            std::cmp::Ordering::Greater => quotient + 1,
            std::cmp::Ordering::Equal if quotient % 2 == 0 => quotient,
            std::cmp::Ordering::Equal => quotient + 1,
        };

        Money(rounded as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// Renders as `major.minor` without a currency symbol.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
