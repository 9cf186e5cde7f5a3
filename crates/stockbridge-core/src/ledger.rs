//! # Stock Ledger Rules
//!
//! The pure half of the stock ledger: given the stock before a movement,
//! compute what the movement records and where stock ends up.
//! The database layer applies the result atomically.
//!
//! ## Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  type     input q     recorded quantity     stock_after                 │
//! │  ───────  ──────────  ────────────────────  ──────────────────────────  │
//! │  IN       q ≥ 0       q                     before + q                  │
//! │  OUT      q ≥ 0       q                     before - q   (≥ 0 or fail)  │
//! │  RETURN   q ≥ 0       q                     before + q                  │
//! │  ADJUST   target ≥ 0  target - before       target                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every recorded entry satisfies `stock_after == stock_before ± quantity`
//! (minus for OUT, plus otherwise), which is what lets the ledger be
//! replayed from any starting point.

use crate::error::{CoreError, CoreResult};
use crate::types::MovementType;

/// The computed effect of one movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Quantity to store on the movement row.
    pub quantity: i64,
    pub stock_before: i64,
    pub stock_after: i64,
}

impl Transition {
    /// Signed change in stock.
    pub fn delta(&self) -> i64 {
        self.stock_after - self.stock_before
    }
}

impl MovementType {
    /// Computes the transition for `quantity` applied to `before`.
    ///
    /// For [`MovementType::Adjust`], `quantity` is the absolute target.
    ///
    /// ## Example
    /// ```rust
    /// use stockbridge_core::types::MovementType;
    ///
    /// let t = MovementType::Adjust.apply(100, 75).unwrap();
    /// assert_eq!(t.quantity, -25);
    /// assert_eq!(t.stock_after, 75);
    /// ```
    pub fn apply(self, before: i64, quantity: i64) -> CoreResult<Transition> {
        match self {
            MovementType::Adjust => {
                if quantity < 0 {
                    return Err(CoreError::InvalidAdjustTarget { target: quantity });
                }
                Ok(Transition {
                    quantity: quantity - before,
                    stock_before: before,
                    stock_after: quantity,
                })
            }
            MovementType::In | MovementType::Return => {
                self.check_quantity(quantity)?;
                let after = before.checked_add(quantity).ok_or(CoreError::StockOverflow {
                    movement_type: self.as_str(),
                    before,
                    quantity,
                })?;
                Ok(Transition {
                    quantity,
                    stock_before: before,
                    stock_after: after,
                })
            }
            MovementType::Out => {
                self.check_quantity(quantity)?;
                if quantity > before {
                    return Err(CoreError::InsufficientStock {
                        available: before,
                        requested: quantity,
                    });
                }
                Ok(Transition {
                    quantity,
                    stock_before: before,
                    stock_after: before - quantity,
                })
            }
        }
    }

    fn check_quantity(self, quantity: i64) -> CoreResult<()> {
        if quantity < 0 {
            return Err(CoreError::InvalidQuantity {
                movement_type: self.as_str(),
                quantity,
            });
        }
        Ok(())
    }
}

/// Checks that an entry obeys the ledger equation.
pub fn is_consistent(movement_type: MovementType, quantity: i64, before: i64, after: i64) -> bool {
    match movement_type {
        MovementType::Out => after == before - quantity,
        MovementType::In | MovementType::Return | MovementType::Adjust => {
            after == before + quantity
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
