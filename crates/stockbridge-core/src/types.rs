//! # Domain Types
//!
//! Core domain types shared by the ledger, the database layer and the sync engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │  StockMovement  │   │      Sale       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │◄──│  product_id     │   │  id (UUID)      │       │
//! │  │  barcode (key)  │   │  movement_type  │   │  created_at ★   │       │
//! │  │  stock          │   │  before / after │   │  synced         │       │
//! │  │  updated_at ★   │   └─────────────────┘   └────────┬────────┘       │
//! │  └─────────────────┘                                  │                 │
//! │                                               ┌───────┴────────┐        │
//! │  ┌─────────────────┐   ┌─────────────────┐    │  SaleItem      │        │
//! │  │   Category      │   │   Supplier      │    │  SaleReturn    │        │
//! │  │  name (key)     │   │  name (key)     │    │  ReturnItem    │        │
//! │  └─────────────────┘   └─────────────────┘    └────────────────┘        │
//! │                                                                         │
//! │  ★ = used across instances (dedup identity / last-writer-wins)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity Across Instances
//! Row ids are UUIDs minted by each database and never leave it. Records are
//! matched between the two instances by natural key instead: barcode,
//! username, category or supplier name, and `created_at` for sales and
//! returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// VAT rate in hundredths of a percent; 2000 is 20%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// A product in the catalog.
///
/// `stock` is authoritative only on the local instance. On the cloud side
/// it is a display reference fed by push stock snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    pub id: String,

    /// Natural key, stable across instances.
    pub barcode: String,

    pub name: String,

    /// Category name (joined).
    pub category: Option<String>,

    /// Supplier name (joined).
    pub supplier: Option<String>,

    pub purchase_price_cents: i64,

    /// Sale price before tax.
    pub sale_price_cents: i64,

    pub tax_rate_bps: u32,

    pub stock: i64,

    /// Threshold for low-stock reporting.
    pub min_stock: i64,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,

    /// Last modification, compared by last-writer-wins.
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn sale_price(&self) -> Money {
        Money::from_cents(self.sale_price_cents)
    }

    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps)
    }
}

/// Fields needed to create a product.
///
/// There is no stock field: new products start at zero and only the
/// ledger moves stock afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub barcode: String,
    pub name: String,
    pub category: Option<String>,
    pub supplier: Option<String>,
    pub purchase_price_cents: i64,
    pub sale_price_cents: i64,
    pub tax_rate_bps: u32,
    pub min_stock: i64,
}

impl NewProduct {
    /// A product with default tax rate and minimum stock.
    pub fn new(barcode: impl Into<String>, name: impl Into<String>, sale_price_cents: i64) -> Self {
        NewProduct {
            barcode: barcode.into(),
            name: name.into(),
            category: None,
            supplier: None,
            purchase_price_cents: 0,
            sale_price_cents,
            tax_rate_bps: crate::DEFAULT_TAX_RATE_BPS,
            min_stock: crate::DEFAULT_MIN_STOCK,
        }
    }
}

/// A product category. Natural key: `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A supplier. Natural key: `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Cashier,
}

/// A store user. Resolved by `username` when importing synced rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Stock Movements
// =============================================================================

/// Kind of stock movement.
///
/// The transition each variant applies lives in [`crate::ledger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Restock: stock increases by quantity.
    In,
    /// Sale or loss: stock decreases by quantity.
    Out,
    /// Physical count: quantity is the new absolute stock.
    Adjust,
    /// Customer return: stock increases by quantity.
    Return,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Adjust => "adjust",
            MovementType::Return => "return",
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable ledger entry.
///
/// For `Adjust` movements `quantity` holds the signed delta
/// (`stock_after - stock_before`), not the requested target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub stock_before: i64,
    pub stock_after: i64,
    pub unit_cost_cents: Option<i64>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub supplier_id: Option<String>,
    /// User id of the actor.
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Optional context attached to a movement.
#[derive(Debug, Clone, Default)]
pub struct MovementMeta {
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub unit_cost_cents: Option<i64>,
    pub supplier_id: Option<String>,
    pub created_by: Option<String>,
}

impl MovementMeta {
    pub fn reference(reference: impl Into<String>) -> Self {
        MovementMeta {
            reference: Some(reference.into()),
            ..Default::default()
        }
    }

    pub fn by(mut self, user_id: Option<String>) -> Self {
        self.created_by = user_id;
        self
    }
}

// =============================================================================
// Sales
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    Other,
}

/// A completed sale.
///
/// `created_at` doubles as the cross-instance identity used for dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Sale {
    pub id: String,
    pub user_id: Option<String>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub payment_method: PaymentMethod,
    /// Instance the sale was first recorded on (set on imported rows).
    pub origin_system: Option<String>,
    /// Row id on the origin instance.
    pub origin_local_id: Option<String>,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A line item in a sale.
/// Uses snapshot pattern to freeze product data at time of sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    /// Null when the product is unknown on this instance.
    pub product_id: Option<String>,
    /// Barcode at time of sale (frozen).
    pub barcode_snapshot: Option<String>,
    /// Product name at time of sale (frozen).
    pub name_snapshot: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// unit_price × quantity, before tax.
    pub line_total_cents: i64,
    pub tax_rate_bps: u32,
}

// =============================================================================
// Returns
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    #[default]
    Pending,
    Approved,
    Completed,
}

/// A refund against a prior sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleReturn {
    pub id: String,
    pub sale_id: String,
    pub reason: String,
    pub refund_amount_cents: i64,
    pub status: ReturnStatus,
    pub processed_by: Option<String>,
    pub origin_system: Option<String>,
    pub origin_local_id: Option<String>,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ReturnItem {
    pub id: String,
    pub return_id: String,
    pub sale_item_id: Option<String>,
    pub product_id: Option<String>,
    pub barcode_snapshot: Option<String>,
    pub quantity: i64,
    pub refund_amount_cents: i64,
}

// =============================================================================
// Sync Log
// =============================================================================

/// Which sync phase a log row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Push,
    Pull,
    Receive,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Push => write!(f, "push"),
            SyncPhase::Pull => write!(f, "pull"),
            SyncPhase::Receive => write!(f, "receive"),
        }
    }
}

/// Outcome of one sync phase, kept for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SyncLogEntry {
    pub id: String,
    pub phase: SyncPhase,
    pub records_synced: i64,
    pub success: bool,
    /// JSON document with per-phase counters.
    pub details: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_tax_rate_reads_column() {
        assert_eq!(TaxRate::from_bps(550).bps(), 550);
        assert_eq!(NewProduct::new("6111000000024", "Tea", 900).tax_rate_bps, 2000);
    }

    #[test]
    fn test_new_product_defaults() {
        let p = NewProduct::new("6111000000017", "Olive Oil 1L", 4500);
        assert_eq!(p.tax_rate_bps, 2000);
        assert_eq!(p.min_stock, 5);
        assert!(p.category.is_none());
    }

    #[test]
    fn test_movement_type_display() {
        assert_eq!(MovementType::Adjust.as_str(), "adjust");
        assert_eq!(MovementType::Return.to_string(), "return");
    }

    #[test]
    fn test_payment_method_default() {
        assert_eq!(PaymentMethod::default(), PaymentMethod::Cash);
    }
}
