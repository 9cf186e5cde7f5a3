//! # Sale Repository
//!
//! Creates sales on the local instance and feeds the push.
//!
//! ## Sale Creation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_sale(user, payment, [ (barcode, qty), ... ])                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ledger lock ─► BEGIN                                                  │
//! │       ├── resolve each barcode, price the line (integer money)         │
//! │       ├── INSERT sales (totals)                                        │
//! │       ├── INSERT sale_items (name / barcode / price snapshots)         │
//! │       └── one OUT movement per line, reference = sale id               │
//! │  COMMIT                                                                │
//! │                                                                         │
//! │  Insufficient stock on any line → nothing is written                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sync Lifecycle
//! A sale is written once with `synced = 0` and flipped exactly once,
//! after the cloud acknowledges the push that carried it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::ledger::apply_movement;
use crate::repository::product::fetch_by_barcode;
use stockbridge_core::validation::validate_line_quantity;
use stockbridge_core::{
    new_id, CoreError, Money, MovementMeta, MovementType, PaymentMethod, Sale, SaleItem,
    ValidationError,
};

pub(crate) const SALE_SELECT: &str = r#"
    SELECT
        id, user_id, subtotal_cents, tax_cents, total_cents, payment_method,
        origin_system, origin_local_id, synced, created_at
    FROM sales
"#;

const SALE_ITEM_SELECT: &str = r#"
    SELECT
        id, sale_id, product_id, barcode_snapshot, name_snapshot, quantity,
        unit_price_cents, line_total_cents, tax_rate_bps
    FROM sale_items
"#;

/// One requested line of a new sale.
#[derive(Debug, Clone)]
pub struct SaleLine {
    pub barcode: String,
    pub quantity: i64,
}

impl SaleLine {
    pub fn new(barcode: impl Into<String>, quantity: i64) -> Self {
        SaleLine {
            barcode: barcode.into(),
            quantity,
        }
    }
}

/// A sale with its lines and its actor's username.
#[derive(Debug, Clone)]
pub struct SaleWithItems {
    pub sale: Sale,
    pub username: Option<String>,
    pub items: Vec<SaleItem>,
}

#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
    lock: Arc<Mutex<()>>,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool, lock: Arc<Mutex<()>>) -> Self {
        SaleRepository { pool, lock }
    }

    /// Creates a sale, its items and one OUT movement per line.
    ///
    /// Tax is computed per line with banker's rounding.
    pub async fn create_sale(
        &self,
        user_id: Option<&str>,
        payment_method: PaymentMethod,
        lines: &[SaleLine],
    ) -> DbResult<SaleWithItems> {
        if lines.is_empty() {
            return Err(ValidationError::Required {
                field: "lines".to_string(),
            }
            .into());
        }
        for line in lines {
            validate_line_quantity(line.quantity)?;
        }

        let _guard = self.lock.lock().await;
        let mut tx = begin_write(&self.pool).await?;
        let now = Utc::now();
        let sale_id = new_id();

        // Price every line before writing anything
        let mut priced = Vec::with_capacity(lines.len());
        let mut subtotal = Money::zero();
        let mut tax = Money::zero();
        for line in lines {
            let product = fetch_by_barcode(&mut tx, &line.barcode)
                .await?
                .ok_or_else(|| CoreError::ProductNotFound(line.barcode.clone()))?;

            let line_total = product.sale_price().multiply_quantity(line.quantity);
            subtotal += line_total;
            tax += line_total.calculate_tax(product.tax_rate());
            priced.push((product, line.quantity, line_total));
        }
        let total = subtotal + tax;

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, user_id, subtotal_cents, tax_cents, total_cents,
                payment_method, synced, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&sale_id)
        .bind(user_id)
        .bind(subtotal.cents())
        .bind(tax.cents())
        .bind(total.cents())
        .bind(payment_method)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let meta = MovementMeta::reference(sale_id.clone()).by(user_id.map(str::to_string));
        for (line_no, (product, quantity, line_total)) in priced.iter().enumerate() {
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
            .bind(&product.id)
            .bind(&product.barcode)
            .bind(&product.name)
            .bind(*quantity)
            .bind(product.sale_price_cents)
            .bind(line_total.cents())
            .bind(product.tax_rate_bps)
            .bind(line_no as i64)
            .execute(&mut *tx)
            .await?;

            apply_movement(&mut tx, product, MovementType::Out, *quantity, &meta, now).await?;
        }

        tx.commit().await?;

        info!(
            sale_id = %sale_id,
            lines = lines.len(),
            total = %total,
            "Sale created"
        );

        self.get(&sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id.clone()))
    }

    /// Gets a sale with its items.
    pub async fn get(&self, id: &str) -> DbResult<Option<SaleWithItems>> {
        let sql = format!("{SALE_SELECT} WHERE id = ?");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match sale {
            Some(sale) => Ok(Some(self.with_items(sale).await?)),
            None => Ok(None),
        }
    }

    /// Finds a sale by its exact creation timestamp.
    pub async fn find_by_created_at(&self, created_at: DateTime<Utc>) -> DbResult<Option<Sale>> {
        let sql = format!("{SALE_SELECT} WHERE created_at = ? ORDER BY rowid LIMIT 1");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(created_at)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sale)
    }

    /// Sales not yet acknowledged by the cloud, oldest first.
    pub async fn unsynced(&self) -> DbResult<Vec<SaleWithItems>> {
        let sql = format!("{SALE_SELECT} WHERE synced = 0 ORDER BY created_at, rowid");
        let sales = sqlx::query_as::<_, Sale>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let mut result = Vec::with_capacity(sales.len());
        for sale in sales {
            result.push(self.with_items(sale).await?);
        }

        debug!(count = result.len(), "Loaded unsynced sales");
        Ok(result)
    }

    pub async fn count_unsynced(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales WHERE synced = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Flips `synced` on exactly the given sales.
    ///
    /// Returns the number of rows changed.
    pub async fn mark_synced(&self, ids: &[String]) -> DbResult<u64> {
        let mut tx = begin_write(&self.pool).await?;
        let mut changed = 0;
        for id in ids {
            changed += sqlx::query("UPDATE sales SET synced = 1 WHERE id = ? AND synced = 0")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        debug!(requested = ids.len(), changed, "Sales marked synced");
        Ok(changed)
    }

    async fn with_items(&self, sale: Sale) -> DbResult<SaleWithItems> {
        let sql = format!("{SALE_ITEM_SELECT} WHERE sale_id = ? ORDER BY line_no, rowid");
        let items = sqlx::query_as::<_, SaleItem>(&sql)
            .bind(&sale.id)
            .fetch_all(&self.pool)
            .await?;

        let username: Option<String> = match sale.user_id.as_deref() {
            Some(user_id) => sqlx::query_scalar("SELECT username FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
            None => None,
        };

        Ok(SaleWithItems {
            sale,
            username,
            items,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
