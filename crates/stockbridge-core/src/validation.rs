//! # Field Rules
//!
//! The same checks run on a row typed at the till and on every record of a
//! received batch. For a batch they all run before the transaction opens, so
//! one bad record rejects the batch without touching the database.
//!
//! ```text
//! serde (shape) ──► these rules (values) ──► SQLite (NOT NULL, CHECK, UNIQUE)
//! ```

use crate::error::ValidationError;
use crate::MAX_LINE_QUANTITY;

pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a barcode.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - No whitespace
///
/// ## Example
/// ```rust
/// use stockbridge_core::validation::validate_barcode;
///
/// assert!(validate_barcode("6111245590012").is_ok());
/// assert!(validate_barcode("").is_err());
/// assert!(validate_barcode("12 34").is_err());
/// ```
pub fn validate_barcode(barcode: &str) -> ValidationResult<()> {
    if barcode.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "barcode".to_string(),
        });
    }

    if barcode.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "barcode".to_string(),
            max: 64,
        });
    }

    if barcode.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "barcode".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates a product name (1 to 200 characters).
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    validate_text("name", name, 200)
}

/// Validates a category or supplier name (1 to 100 characters).
pub fn validate_reference_name(field: &str, name: &str) -> ValidationResult<()> {
    validate_text(field, name, 100)
}

/// Validates a username (1 to 150 characters).
pub fn validate_username(username: &str) -> ValidationResult<()> {
    validate_text("username", username, 150)
}

fn validate_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a sale or return line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_LINE_QUANTITY
pub fn validate_line_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a stock level (snapshots, adjust targets).
pub fn validate_stock_level(stock: i64) -> ValidationResult<()> {
    if stock < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "stock".to_string(),
        });
    }

    Ok(())
}

/// Validates an amount in cents.
///
/// ## Example
/// ```rust
/// use stockbridge_core::validation::validate_amount_cents;
///
/// assert!(validate_amount_cents("price", 1099).is_ok());
/// assert!(validate_amount_cents("price", 0).is_ok());
/// assert!(validate_amount_cents("price", -100).is_err());
/// ```
pub fn validate_amount_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a tax rate in basis points (0% to 100%).
pub fn validate_tax_rate_bps(bps: u32) -> ValidationResult<()> {
    if bps > 10_000 {
        return Err(ValidationError::OutOfRange {
            field: "tax_rate".to_string(),
            min: 0,
            max: 10_000,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
