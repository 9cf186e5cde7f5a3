//! # Sync Protocol
//!
//! JSON bodies exchanged between the two instances.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sync Protocol Messages                             │
//! │                                                                         │
//! │  PUSH (LOCAL → CLOUD)                                                  │
//! │  ────────────────────                                                  │
//! │  LOCAL ───► POST /sync/receive                                         │
//! │             PushPayload { sales, returns, stock_updates,               │
//! │                           sync_timestamp }                             │
//! │  LOCAL ◄─── ReceiveResponse { status, sales_created, ... }             │
//! │                                                                         │
//! │  PULL (CLOUD → LOCAL)                                                  │
//! │  ────────────────────                                                  │
//! │  LOCAL ───► GET /sync/master-data?since=<RFC 3339>                     │
//! │  LOCAL ◄─── MasterDataResponse { categories, suppliers, products,      │
//! │                                  timestamp }                           │
//! │                                                                         │
//! │  ERROR                                                                 │
//! │  ─────                                                                 │
//! │  Both  ◄─── { "error": "..." }   (401 / 400 / 502 / 500)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity Rules
//! Row ids never cross the wire as references. Products travel by barcode,
//! actors by username, categories and suppliers by name. A sale is the same
//! sale on both sides when its `created_at` is identical; a return finds its
//! parent through `sale_created_at`. `origin_system`/`local_id` are carried
//! and stored for traceability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use stockbridge_core::validation::{
    validate_amount_cents, validate_barcode, validate_line_quantity, validate_product_name,
    validate_reference_name, validate_stock_level, validate_tax_rate_bps, validate_username,
};
use stockbridge_core::{Category, PaymentMethod, Product, ReturnStatus, Supplier};
use stockbridge_db::{
    ImportedReturn, ImportedReturnItem, ImportedSale, ImportedSaleItem, MasterProduct, ReturnWithItems,
    SaleWithItems, SupplierDetails,
};

use crate::error::SyncResult;

// =============================================================================
// Push Payload
// =============================================================================

/// Body of `POST /sync/receive`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub sales: Vec<SaleRecord>,

    #[serde(default)]
    pub returns: Vec<ReturnRecord>,

    /// Display-only stock reference.
    #[serde(default)]
    pub stock_updates: Vec<StockUpdate>,

    pub sync_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleRecord {
    /// Row id on the sending instance.
    pub local_id: String,

    #[serde(default)]
    pub origin_system: Option<String>,

    /// Cross-instance identity.
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub user_username: Option<String>,

    #[serde(default)]
    pub payment_method: PaymentMethod,

    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,

    #[serde(default)]
    pub items: Vec<SaleItemRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleItemRecord {
    #[serde(default)]
    pub product_barcode: Option<String>,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
    pub tax_rate_bps: u32,
}

impl SaleRecord {
    pub fn from_local(sale: &SaleWithItems, origin_system: &str) -> Self {
        SaleRecord {
            local_id: sale.sale.id.clone(),
            origin_system: Some(origin_system.to_string()),
            created_at: sale.sale.created_at,
            user_username: sale.username.clone(),
            payment_method: sale.sale.payment_method,
            subtotal_cents: sale.sale.subtotal_cents,
            tax_cents: sale.sale.tax_cents,
            total_cents: sale.sale.total_cents,
            items: sale
                .items
                .iter()
                .map(|item| SaleItemRecord {
                    product_barcode: item.barcode_snapshot.clone(),
                    product_name: item.name_snapshot.clone(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                    line_total_cents: item.line_total_cents,
                    tax_rate_bps: item.tax_rate_bps,
                })
                .collect(),
        }
    }

    pub fn validate(&self) -> SyncResult<()> {
        if let Some(username) = &self.user_username {
            validate_username(username)?;
        }
        validate_amount_cents("subtotal", self.subtotal_cents)?;
        validate_amount_cents("tax", self.tax_cents)?;
        validate_amount_cents("total", self.total_cents)?;

        for item in &self.items {
            if let Some(barcode) = &item.product_barcode {
                validate_barcode(barcode)?;
            }
            validate_product_name(&item.product_name)?;
            validate_line_quantity(item.quantity)?;
            validate_amount_cents("unit_price", item.unit_price_cents)?;
            validate_amount_cents("line_total", item.line_total_cents)?;
            validate_tax_rate_bps(item.tax_rate_bps)?;
        }
        Ok(())
    }

    pub fn to_imported(&self) -> ImportedSale {
        ImportedSale {
            created_at: self.created_at,
            username: self.user_username.clone(),
            payment_method: self.payment_method,
            subtotal_cents: self.subtotal_cents,
            tax_cents: self.tax_cents,
            total_cents: self.total_cents,
            origin_system: self.origin_system.clone(),
            origin_local_id: Some(self.local_id.clone()),
            items: self
                .items
                .iter()
                .map(|item| ImportedSaleItem {
                    barcode: item.product_barcode.clone(),
                    product_name: item.product_name.clone(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                    line_total_cents: item.line_total_cents,
                    tax_rate_bps: item.tax_rate_bps,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub local_id: String,

    #[serde(default)]
    pub origin_system: Option<String>,

    #[serde(default)]
    pub sale_local_id: Option<String>,

    /// Identity of the parent sale.
    pub sale_created_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    pub reason: String,

    pub refund_amount_cents: i64,

    #[serde(default)]
    pub status: ReturnStatus,

    #[serde(default)]
    pub processed_by_username: Option<String>,

    #[serde(default)]
    pub items: Vec<ReturnItemRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnItemRecord {
    #[serde(default)]
    pub product_barcode: Option<String>,
    pub quantity: i64,
    pub refund_amount_cents: i64,
}

impl ReturnRecord {
    pub fn from_local(ret: &ReturnWithItems, origin_system: &str) -> Self {
        ReturnRecord {
            local_id: ret.sale_return.id.clone(),
            origin_system: Some(origin_system.to_string()),
            sale_local_id: Some(ret.sale_return.sale_id.clone()),
            sale_created_at: ret.sale_created_at,
            created_at: ret.sale_return.created_at,
            reason: ret.sale_return.reason.clone(),
            refund_amount_cents: ret.sale_return.refund_amount_cents,
            status: ret.sale_return.status,
            processed_by_username: ret.processed_by_username.clone(),
            items: ret
                .items
                .iter()
                .map(|item| ReturnItemRecord {
                    product_barcode: item.barcode_snapshot.clone(),
                    quantity: item.quantity,
                    refund_amount_cents: item.refund_amount_cents,
                })
                .collect(),
        }
    }

    pub fn validate(&self) -> SyncResult<()> {
        validate_reference_name("reason", &self.reason)?;
        validate_amount_cents("refund_amount", self.refund_amount_cents)?;
        if let Some(username) = &self.processed_by_username {
            validate_username(username)?;
        }

        for item in &self.items {
            if let Some(barcode) = &item.product_barcode {
                validate_barcode(barcode)?;
            }
            validate_line_quantity(item.quantity)?;
            validate_amount_cents("refund_amount", item.refund_amount_cents)?;
        }
        Ok(())
    }

    pub fn to_imported(&self) -> ImportedReturn {
        ImportedReturn {
            created_at: self.created_at,
            reason: self.reason.clone(),
            refund_amount_cents: self.refund_amount_cents,
            status: self.status,
            username: self.processed_by_username.clone(),
            origin_system: self.origin_system.clone(),
            origin_local_id: Some(self.local_id.clone()),
            items: self
                .items
                .iter()
                .map(|item| ImportedReturnItem {
                    barcode: item.product_barcode.clone(),
                    quantity: item.quantity,
                    refund_amount_cents: item.refund_amount_cents,
                })
                .collect(),
        }
    }
}

/// One entry of the stock snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockUpdate {
    pub barcode: String,
    pub stock: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockUpdate {
    pub fn validate(&self) -> SyncResult<()> {
        validate_barcode(&self.barcode)?;
        validate_stock_level(self.stock)?;
        Ok(())
    }
}

impl From<&Product> for StockUpdate {
    fn from(product: &Product) -> Self {
        StockUpdate {
            barcode: product.barcode.clone(),
            stock: product.stock,
            updated_at: product.updated_at,
        }
    }
}

/// Body returned by `POST /sync/receive`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveResponse {
    pub status: String,
    pub sales_created: u64,
    pub returns_created: u64,
    pub stock_updates_received: u64,
    pub sync_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub sales_skipped: u64,
    #[serde(default)]
    pub returns_skipped: u64,
    /// Returns whose parent sale is unknown here.
    #[serde(default)]
    pub returns_orphaned: u64,
    #[serde(default)]
    pub stock_updates_applied: u64,
}

// =============================================================================
// Master Data
// =============================================================================

/// Query string of `GET /sync/master-data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterDataQuery {
    #[serde(default)]
    pub since: Option<String>,
}

impl MasterDataQuery {
    /// Parsed `since`. An unparseable value is ignored and the full catalog is exported.
    pub fn since(&self) -> Option<DateTime<Utc>> {
        let raw = self.since.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!(since = %raw, error = %e, "Ignoring unparseable since");
                None
            }
        }
    }
}

/// Body returned by `GET /sync/master-data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterDataResponse {
    #[serde(default)]
    pub categories: Vec<CategoryRecord>,

    #[serde(default)]
    pub suppliers: Vec<SupplierRecord>,

    #[serde(default)]
    pub products: Vec<ProductRecord>,

    /// Export time on the remote clock; becomes the next `since`.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<&Category> for CategoryRecord {
    fn from(category: &Category) -> Self {
        CategoryRecord {
            name: category.name.clone(),
            description: category.description.clone(),
        }
    }
}

impl CategoryRecord {
    pub fn validate(&self) -> SyncResult<()> {
        validate_reference_name("category", &self.name)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierRecord {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl From<&Supplier> for SupplierRecord {
    fn from(supplier: &Supplier) -> Self {
        SupplierRecord {
            name: supplier.name.clone(),
            email: supplier.email.clone(),
            phone: supplier.phone.clone(),
            address: supplier.address.clone(),
        }
    }
}

impl SupplierRecord {
    pub fn validate(&self) -> SyncResult<()> {
        validate_reference_name("supplier", &self.name)?;
        Ok(())
    }

    pub fn to_details(&self) -> SupplierDetails {
        SupplierDetails {
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            address: self.address.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub barcode: String,
    pub name: String,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub supplier_name: Option<String>,
    pub purchase_price_cents: i64,
    pub sale_price_cents: i64,
    pub tax_rate_bps: u32,
    /// Remote's reference value. Never applied locally.
    pub stock: i64,
    pub min_stock: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl From<&Product> for ProductRecord {
    fn from(product: &Product) -> Self {
        ProductRecord {
            barcode: product.barcode.clone(),
            name: product.name.clone(),
            category_name: product.category.clone(),
            supplier_name: product.supplier.clone(),
            purchase_price_cents: product.purchase_price_cents,
            sale_price_cents: product.sale_price_cents,
            tax_rate_bps: product.tax_rate_bps,
            stock: product.stock,
            min_stock: product.min_stock,
            is_active: product.is_active,
            updated_at: product.updated_at,
        }
    }
}

impl ProductRecord {
    pub fn to_master(&self) -> MasterProduct {
        MasterProduct {
            barcode: self.barcode.clone(),
            name: self.name.clone(),
            category: self.category_name.clone(),
            supplier: self.supplier_name.clone(),
            purchase_price_cents: self.purchase_price_cents,
            sale_price_cents: self.sale_price_cents,
            tax_rate_bps: self.tax_rate_bps,
            min_stock: self.min_stock,
            is_active: self.is_active,
            updated_at: self.updated_at,
        }
    }
}

// =============================================================================
// Trigger
// =============================================================================

/// Outcome of one phase as reported by `POST /sync/trigger`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseReport {
    pub success: bool,
    pub records: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Outcome of one push-then-pull cycle; body returned by `POST /sync/trigger`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub push: PhaseReport,
    pub pull: PhaseReport,
    pub timestamp: DateTime<Utc>,
}
