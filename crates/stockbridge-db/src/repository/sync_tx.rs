//! # Sync Transaction
//!
//! A transaction scoped to one inbound batch (cloud side) or one master-data
//! apply (local side). Every write of the batch goes through it, so a single
//! malformed record rolls the whole batch back.
//!
//! ## Receive Batch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  db.begin_sync()                                                        │
//! │       │                                                                 │
//! │       ├── sale_exists_at(ts)?        yes → skip (already imported)     │
//! │       ├── insert_sale(..)            natural keys → local ids          │
//! │       ├── return_exists_at(ts)?      yes → skip                        │
//! │       ├── sale_id_at(sale_ts)?       no  → skip (orphan return)        │
//! │       ├── insert_return(..)                                            │
//! │       └── apply_stock_reference(..)  LWW, bypasses the ledger          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  commit()          (drop without commit = rollback)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::error::DbResult;
use crate::repository::begin_write;
use crate::repository::catalog::{ensure_category, ensure_supplier, upsert_category, upsert_supplier, SupplierDetails};
use crate::repository::product::fetch_by_barcode;
use crate::repository::user::user_id_by_username;
use stockbridge_core::validation::{
    validate_amount_cents, validate_barcode, validate_product_name, validate_tax_rate_bps,
};
use stockbridge_core::{last_writer_wins, new_id, PaymentMethod, ReturnStatus};

// =============================================================================
// Inputs
// =============================================================================

/// A sale received from another instance, keyed by natural keys only.
#[derive(Debug, Clone)]
pub struct ImportedSale {
    pub created_at: DateTime<Utc>,
    pub username: Option<String>,
    pub payment_method: PaymentMethod,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub origin_system: Option<String>,
    pub origin_local_id: Option<String>,
    pub items: Vec<ImportedSaleItem>,
}

#[derive(Debug, Clone)]
pub struct ImportedSaleItem {
    pub barcode: Option<String>,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
    pub tax_rate_bps: u32,
}

/// A return received from another instance.
#[derive(Debug, Clone)]
pub struct ImportedReturn {
    pub created_at: DateTime<Utc>,
    pub reason: String,
    pub refund_amount_cents: i64,
    pub status: ReturnStatus,
    pub username: Option<String>,
    pub origin_system: Option<String>,
    pub origin_local_id: Option<String>,
    pub items: Vec<ImportedReturnItem>,
}

#[derive(Debug, Clone)]
pub struct ImportedReturnItem {
    pub barcode: Option<String>,
    pub quantity: i64,
    pub refund_amount_cents: i64,
}

/// Catalog fields of a product as exported by the cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterProduct {
    pub barcode: String,
    pub name: String,
    pub category: Option<String>,
    pub supplier: Option<String>,
    pub purchase_price_cents: i64,
    pub sale_price_cents: i64,
    pub tax_rate_bps: u32,
    pub min_stock: i64,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockReferenceOutcome {
    Applied,
    /// Local `updated_at` is the same or newer.
    Stale,
    UnknownProduct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
    /// Local row is the same age or newer and was left untouched.
    KeptLocal,
}

// =============================================================================
// Sync Transaction
// =============================================================================

/// Transaction-scoped writer for sync batches.
pub struct SyncTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl SyncTransaction {
    pub(crate) async fn begin(pool: &SqlitePool) -> DbResult<Self> {
        let tx = begin_write(pool).await?;
        Ok(SyncTransaction { tx })
    }

    /// Commits every write of the batch.
    pub async fn commit(self) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Sales and returns (cloud side)
    // -------------------------------------------------------------------------

    /// True when a sale with exactly this creation timestamp exists.
    pub async fn sale_exists_at(&mut self, created_at: DateTime<Utc>) -> DbResult<bool> {
        Ok(self.sale_id_at(created_at).await?.is_some())
    }

    /// Local id of the sale created at exactly this timestamp.
    pub async fn sale_id_at(&mut self, created_at: DateTime<Utc>) -> DbResult<Option<String>> {
        let id = sqlx::query_scalar("SELECT id FROM sales WHERE created_at = ? ORDER BY rowid LIMIT 1")
            .bind(created_at)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id)
    }

    /// True when a return with exactly this creation timestamp exists.
    pub async fn return_exists_at(&mut self, created_at: DateTime<Utc>) -> DbResult<bool> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM returns WHERE created_at = ? LIMIT 1")
                .bind(created_at)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(id.is_some())
    }

    /// Materializes an imported sale and its items. Returns the new local id.
    ///
    /// Products are resolved by barcode and left null when unknown; the
    /// name snapshot is always kept. The row keeps the source's creation
    /// timestamp so later deliveries of the same sale are recognized.
    pub async fn insert_sale(&mut self, sale: &ImportedSale) -> DbResult<String> {
        let user_id = user_id_by_username(&mut self.tx, sale.username.as_deref()).await?;
        let sale_id = new_id();

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, user_id, subtotal_cents, tax_cents, total_cents, payment_method,
                origin_system, origin_local_id, synced, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(&sale_id)
        .bind(&user_id)
        .bind(sale.subtotal_cents)
        .bind(sale.tax_cents)
        .bind(sale.total_cents)
        .bind(sale.payment_method)
        .bind(&sale.origin_system)
        .bind(&sale.origin_local_id)
        .bind(sale.created_at)
        .execute(&mut *self.tx)
        .await?;

        for (line_no, item) in sale.items.iter().enumerate() {
            let product_id = self.product_id(item.barcode.as_deref()).await?;

            sqlx::query(
                r#"
                INSERT INTO sale_items (
                    id, sale_id, product_id, barcode_snapshot, name_snapshot, quantity,
                    unit_price_cents, line_total_cents, tax_rate_bps, line_no
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(new_id())
            .bind(&sale_id)
            .bind(&product_id)
            .bind(&item.barcode)
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(item.line_total_cents)
            .bind(item.tax_rate_bps)
            .bind(line_no as i64)
            .execute(&mut *self.tx)
            .await?;
        }

        debug!(sale_id = %sale_id, created_at = %sale.created_at, items = sale.items.len(), "Sale imported");
        Ok(sale_id)
    }

    /// Materializes an imported return under an existing local sale.
    ///
    /// Each item is attached to the first line of that sale with the same
    /// barcode, when there is one.
    pub async fn insert_return(&mut self, sale_id: &str, ret: &ImportedReturn) -> DbResult<String> {
        let processed_by = user_id_by_username(&mut self.tx, ret.username.as_deref()).await?;
        let return_id = new_id();

        sqlx::query(
            r#"
            INSERT INTO returns (
                id, sale_id, reason, refund_amount_cents, status, processed_by,
                origin_system, origin_local_id, synced, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(&return_id)
        .bind(sale_id)
        .bind(&ret.reason)
        .bind(ret.refund_amount_cents)
        .bind(ret.status)
        .bind(&processed_by)
        .bind(&ret.origin_system)
        .bind(&ret.origin_local_id)
        .bind(ret.created_at)
        .execute(&mut *self.tx)
        .await?;

        for (line_no, item) in ret.items.iter().enumerate() {
            let product_id = self.product_id(item.barcode.as_deref()).await?;
            let sale_item_id: Option<String> = match item.barcode.as_deref() {
                Some(barcode) => {
                    sqlx::query_scalar(
                        "SELECT id FROM sale_items WHERE sale_id = ? AND barcode_snapshot = ? ORDER BY line_no LIMIT 1",
                    )
                    .bind(sale_id)
                    .bind(barcode)
                    .fetch_optional(&mut *self.tx)
                    .await?
                }
                None => None,
            };

            sqlx::query(
                r#"
                INSERT INTO return_items (
                    id, return_id, sale_item_id, product_id, barcode_snapshot,
                    quantity, refund_amount_cents, line_no
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(new_id())
            .bind(&return_id)
            .bind(&sale_item_id)
            .bind(&product_id)
            .bind(&item.barcode)
            .bind(item.quantity)
            .bind(item.refund_amount_cents)
            .bind(line_no as i64)
            .execute(&mut *self.tx)
            .await?;
        }

        debug!(return_id = %return_id, created_at = %ret.created_at, "Return imported");
        Ok(return_id)
    }

    /// Overwrites a product's reference stock when the incoming value is newer.
    ///
    /// Skips the ledger: the receiving instance has no stock authority, the
    /// value is for display and reporting only.
    ///
    /// The row is stamped with this instance's clock, never earlier than just
    /// after the sender's `updated_at`. A catalog edit made here before the
    /// report therefore still exports as newer than the sender's row.
    pub async fn apply_stock_reference(
        &mut self,
        barcode: &str,
        stock: i64,
        updated_at: DateTime<Utc>,
    ) -> DbResult<StockReferenceOutcome> {
        let Some(product) = fetch_by_barcode(&mut self.tx, barcode).await? else {
            debug!(barcode = %barcode, "Stock update for unknown product ignored");
            return Ok(StockReferenceOutcome::UnknownProduct);
        };

        if !last_writer_wins(product.updated_at, updated_at).applies() {
            debug!(
                barcode = %barcode,
                local = %product.updated_at,
                incoming = %updated_at,
                "Stale stock update skipped"
            );
            return Ok(StockReferenceOutcome::Stale);
        }

        let stamped = Utc::now().max(updated_at + chrono::Duration::microseconds(1));
        sqlx::query("UPDATE products SET stock = ?, updated_at = ? WHERE id = ?")
            .bind(stock)
            .bind(stamped)
            .bind(&product.id)
            .execute(&mut *self.tx)
            .await?;

        Ok(StockReferenceOutcome::Applied)
    }

    // -------------------------------------------------------------------------
    // Master data (local side)
    // -------------------------------------------------------------------------

    pub async fn upsert_category(&mut self, name: &str, description: Option<&str>) -> DbResult<()> {
        upsert_category(&mut self.tx, name, description, Utc::now()).await?;
        Ok(())
    }

    pub async fn upsert_supplier(&mut self, details: &SupplierDetails) -> DbResult<()> {
        upsert_supplier(&mut self.tx, details, Utc::now()).await?;
        Ok(())
    }

    /// Merges one exported product into the local catalog.
    ///
    /// Stock is never written: existing rows keep theirs, new rows start at zero.
    pub async fn merge_product(&mut self, incoming: &MasterProduct) -> DbResult<MergeOutcome> {
        validate_barcode(&incoming.barcode)?;
        validate_product_name(&incoming.name)?;
        validate_amount_cents("purchase_price", incoming.purchase_price_cents)?;
        validate_amount_cents("sale_price", incoming.sale_price_cents)?;
        validate_tax_rate_bps(incoming.tax_rate_bps)?;

        let now = Utc::now();
        let existing = fetch_by_barcode(&mut self.tx, &incoming.barcode).await?;

        if let Some(local) = &existing {
            if !last_writer_wins(local.updated_at, incoming.updated_at).applies() {
                debug!(
                    barcode = %incoming.barcode,
                    local = %local.updated_at,
                    incoming = %incoming.updated_at,
                    "Local product is newer, kept"
                );
                return Ok(MergeOutcome::KeptLocal);
            }
        }

        let category_id = match incoming.category.as_deref() {
            Some(name) => Some(ensure_category(&mut self.tx, name, now).await?),
            None => None,
        };
        let supplier_id = match incoming.supplier.as_deref() {
            Some(name) => Some(ensure_supplier(&mut self.tx, name, now).await?),
            None => None,
        };

        match existing {
            Some(local) => {
                sqlx::query(
                    r#"
                    UPDATE products SET
                        name = ?, category_id = ?, supplier_id = ?,
                        purchase_price_cents = ?, sale_price_cents = ?, tax_rate_bps = ?,
                        min_stock = ?, is_active = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&incoming.name)
                .bind(&category_id)
                .bind(&supplier_id)
                .bind(incoming.purchase_price_cents)
                .bind(incoming.sale_price_cents)
                .bind(incoming.tax_rate_bps)
                .bind(incoming.min_stock)
                .bind(incoming.is_active)
                .bind(incoming.updated_at)
                .bind(&local.id)
                .execute(&mut *self.tx)
                .await?;

                debug!(barcode = %incoming.barcode, "Product updated from master data");
                Ok(MergeOutcome::Updated)
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO products (
                        id, barcode, name, category_id, supplier_id,
                        purchase_price_cents, sale_price_cents, tax_rate_bps,
                        stock, min_stock, is_active, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
                    "#,
                )
                .bind(new_id())
                .bind(&incoming.barcode)
                .bind(&incoming.name)
                .bind(&category_id)
                .bind(&supplier_id)
                .bind(incoming.purchase_price_cents)
                .bind(incoming.sale_price_cents)
                .bind(incoming.tax_rate_bps)
                .bind(incoming.min_stock)
                .bind(incoming.is_active)
                .bind(now)
                .bind(incoming.updated_at)
                .execute(&mut *self.tx)
                .await?;

                info!(barcode = %incoming.barcode, "Product created from master data");
                Ok(MergeOutcome::Created)
            }
        }
    }

    async fn product_id(&mut self, barcode: Option<&str>) -> DbResult<Option<String>> {
        let Some(barcode) = barcode else {
            return Ok(None);
        };
        let id = sqlx::query_scalar("SELECT id FROM products WHERE barcode = ?")
            .bind(barcode)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Duration;
    use stockbridge_core::{MovementMeta, MovementType, NewProduct, UserRole};

    fn imported_sale(created_at: DateTime<Utc>) -> ImportedSale {
        ImportedSale {
            created_at,
            username: Some("cashier1".into()),
            payment_method: PaymentMethod::Cash,
            subtotal_cents: 1600,
            tax_cents: 320,
            total_cents: 1920,
            origin_system: Some("store-1".into()),
            origin_local_id: Some("abc".into()),
            items: vec![
                ImportedSaleItem {
                    barcode: Some("A".into()),
                    product_name: "Milk".into(),
                    quantity: 2,
                    unit_price_cents: 800,
                    line_total_cents: 1600,
                    tax_rate_bps: 2000,
                },
                ImportedSaleItem {
                    barcode: Some("UNKNOWN".into()),
                    product_name: "Discontinued".into(),
                    quantity: 1,
                    unit_price_cents: 0,
                    line_total_cents: 0,
                    tax_rate_bps: 2000,
                },
            ],
        }
    }

    fn master(barcode: &str, price: i64, updated_at: DateTime<Utc>) -> MasterProduct {
        MasterProduct {
            barcode: barcode.into(),
            name: format!("Product {barcode}"),
            category: Some("Dairy".into()),
            supplier: None,
            purchase_price_cents: price / 2,
            sale_price_cents: price,
            tax_rate_bps: 2000,
            min_stock: 5,
            is_active: true,
            updated_at,
        }
    }

    #[tokio::test]
    async fn test_import_sale_resolves_natural_keys() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.products().insert(&NewProduct::new("A", "Milk", 800)).await.unwrap();
        let user = db.users().create("cashier1", UserRole::Cashier).await.unwrap();

        let created_at = Utc::now() - Duration::hours(1);
        let mut tx = db.begin_sync().await.unwrap();
        assert!(!tx.sale_exists_at(created_at).await.unwrap());
        let id = tx.insert_sale(&imported_sale(created_at)).await.unwrap();
        assert!(tx.sale_exists_at(created_at).await.unwrap());
        tx.commit().await.unwrap();

        let sale = db.sales().get(&id).await.unwrap().unwrap();
        assert_eq!(sale.sale.created_at, created_at);
        assert_eq!(sale.sale.user_id.as_deref(), Some(user.id.as_str()));
        assert_eq!(sale.sale.origin_system.as_deref(), Some("store-1"));
        assert!(sale.sale.synced);
        assert!(sale.items[0].product_id.is_some());
        assert!(sale.items[1].product_id.is_none());
        assert_eq!(sale.items[1].name_snapshot, "Discontinued");
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        {
            let mut tx = db.begin_sync().await.unwrap();
            tx.insert_sale(&imported_sale(Utc::now())).await.unwrap();
        }
        assert_eq!(db.sales().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_import_return_links_sale_item() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.products().insert(&NewProduct::new("A", "Milk", 800)).await.unwrap();

        let sale_at = Utc::now() - Duration::hours(2);
        let mut tx = db.begin_sync().await.unwrap();
        let sale_id = tx.insert_sale(&imported_sale(sale_at)).await.unwrap();
        let found = tx.sale_id_at(sale_at).await.unwrap();
        assert_eq!(found.as_deref(), Some(sale_id.as_str()));

        let ret = ImportedReturn {
            created_at: Utc::now(),
            reason: "Spoiled".into(),
            refund_amount_cents: 960,
            status: ReturnStatus::Completed,
            username: None,
            origin_system: None,
            origin_local_id: None,
            items: vec![ImportedReturnItem {
                barcode: Some("A".into()),
                quantity: 1,
                refund_amount_cents: 960,
            }],
        };
        let return_id = tx.insert_return(&sale_id, &ret).await.unwrap();
        assert!(tx.return_exists_at(ret.created_at).await.unwrap());
        tx.commit().await.unwrap();

        let stored = db.returns().get(&return_id).await.unwrap().unwrap();
        assert_eq!(stored.sale_created_at, sale_at);
        assert!(stored.items[0].sale_item_id.is_some());
        assert!(stored.sale_return.synced);
    }

    #[tokio::test]
    async fn test_stock_reference_last_writer_wins() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db.products().insert(&NewProduct::new("A", "Milk", 800)).await.unwrap();

        let mut tx = db.begin_sync().await.unwrap();
        let older = product.updated_at - Duration::seconds(10);
        let newer = product.updated_at + Duration::seconds(10);

        assert_eq!(tx.apply_stock_reference("A", 40, older).await.unwrap(), StockReferenceOutcome::Stale);
        assert_eq!(
            tx.apply_stock_reference("A", 40, product.updated_at).await.unwrap(),
            StockReferenceOutcome::Stale
        );
        assert_eq!(tx.apply_stock_reference("A", 42, newer).await.unwrap(), StockReferenceOutcome::Applied);
        assert_eq!(
            tx.apply_stock_reference("Z", 1, newer).await.unwrap(),
            StockReferenceOutcome::UnknownProduct
        );
        tx.commit().await.unwrap();

        let stored = db.products().get_by_barcode("A").await.unwrap().unwrap();
        assert_eq!(stored.stock, 42);
        assert!(stored.updated_at > newer);
        // Reference writes never touch the ledger
        assert!(db.ledger().history("A").await.unwrap().is_empty());

        // Replaying the same report is stale now
        let mut tx = db.begin_sync().await.unwrap();
        assert_eq!(tx.apply_stock_reference("A", 41, newer).await.unwrap(), StockReferenceOutcome::Stale);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_stock_reference_stamped_with_receiver_clock() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db.products().insert(&NewProduct::new("A", "Milk", 800)).await.unwrap();

        let sent_at = product.updated_at + Duration::milliseconds(1);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let before_apply = Utc::now();

        let mut tx = db.begin_sync().await.unwrap();
        assert_eq!(tx.apply_stock_reference("A", 9, sent_at).await.unwrap(), StockReferenceOutcome::Applied);
        tx.commit().await.unwrap();

        let stored = db.products().get_by_barcode("A").await.unwrap().unwrap();
        assert_eq!(stored.stock, 9);
        assert!(stored.updated_at >= before_apply);
        assert!(stored.updated_at > sent_at);
    }

    #[tokio::test]
    async fn test_merge_product_never_touches_stock() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let local = db.products().insert(&NewProduct::new("A", "Milk", 800)).await.unwrap();
        db.ledger()
            .record_movement("A", MovementType::In, 12, MovementMeta::default())
            .await
            .unwrap();

        let later = Utc::now() + Duration::minutes(5);
        let mut tx = db.begin_sync().await.unwrap();
        assert_eq!(tx.merge_product(&master("A", 950, later)).await.unwrap(), MergeOutcome::Updated);
        assert_eq!(tx.merge_product(&master("N", 300, later)).await.unwrap(), MergeOutcome::Created);
        tx.commit().await.unwrap();

        let updated = db.products().get_by_barcode("A").await.unwrap().unwrap();
        assert_eq!(updated.id, local.id);
        assert_eq!(updated.sale_price_cents, 950);
        assert_eq!(updated.stock, 12);
        assert_eq!(updated.updated_at, later);
        assert_eq!(updated.category.as_deref(), Some("Dairy"));

        let created = db.products().get_by_barcode("N").await.unwrap().unwrap();
        assert_eq!(created.stock, 0);
        assert!(db.catalog().get_category("Dairy").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_merge_keeps_newer_local() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let local = db.products().insert(&NewProduct::new("A", "Milk", 800)).await.unwrap();

        let mut tx = db.begin_sync().await.unwrap();
        let stale = master("A", 1, local.updated_at - Duration::hours(1));
        assert_eq!(tx.merge_product(&stale).await.unwrap(), MergeOutcome::KeptLocal);
        tx.commit().await.unwrap();

        let kept = db.products().get_by_barcode("A").await.unwrap().unwrap();
        assert_eq!(kept.sale_price_cents, 800);
        assert_eq!(kept.name, "Milk");
    }
}
