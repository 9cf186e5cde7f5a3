//! # Domain Errors
//!
//! `CoreError` is what the ledger refuses; `ValidationError` is malformed
//! input caught before any write, whether typed at the till or received in a
//! sync batch.
//!
//! ```text
//! ValidationError ──► CoreError ──► DbError ──► SyncError ──► 400 / 5xx
//! ```

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// No product with this barcode exists on this instance.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// An OUT movement would leave negative stock. The enclosing sale or
    /// movement is rolled back as a whole.
    #[error("Insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: i64, requested: i64 },

    /// IN, OUT and RETURN take a non-negative quantity.
    #[error("Invalid {movement_type} quantity: {quantity}")]
    InvalidQuantity {
        movement_type: &'static str,
        quantity: i64,
    },

    /// ADJUST sets an absolute count, which cannot be negative.
    #[error("Invalid adjustment target: {target}")]
    InvalidAdjustTarget { target: i64 },

    #[error("Stock overflow: {before} {movement_type} {quantity}")]
    StockOverflow {
        movement_type: &'static str,
        before: i64,
        quantity: i64,
    },

    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// Returned units on a line would exceed the units sold on it.
    #[error("Return of {requested} exceeds {sold} sold for {barcode}")]
    ReturnExceedsSold {
        barcode: String,
        sold: i64,
        requested: i64,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// A field failed a shape or range check.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Whitespace in a barcode, an unparsable timestamp and similar.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
