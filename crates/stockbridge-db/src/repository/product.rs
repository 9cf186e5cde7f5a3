//! # Product Repository
//!
//! Database operations for products.
//!
//! ## Key Operations
//! - Lookup by barcode (the natural key shared between instances)
//! - Creation with zero stock
//! - Change feeds for the push stock snapshot and the master-data export
//!
//! Stock is never written here. Only the ledger moves it on the local
//! instance, and only the receive path overwrites the reference value on
//! the cloud instance.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::catalog::{ensure_category, ensure_supplier};
use stockbridge_core::validation::{
    validate_amount_cents, validate_barcode, validate_product_name, validate_tax_rate_bps,
};
use stockbridge_core::{new_id, NewProduct, Product};

/// Product columns with category and supplier names joined in.
pub(crate) const PRODUCT_SELECT: &str = r#"
    SELECT
        p.id,
        p.barcode,
        p.name,
        c.name AS category,
        s.name AS supplier,
        p.purchase_price_cents,
        p.sale_price_cents,
        p.tax_rate_bps,
        p.stock,
        p.min_stock,
        p.is_active,
        p.created_at,
        p.updated_at
    FROM products p
    LEFT JOIN categories c ON c.id = p.category_id
    LEFT JOIN suppliers s ON s.id = p.supplier_id
"#;

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Creates a product with zero stock.
    ///
    /// Category and supplier are resolved by name and created when missing.
    /// Initial stock, if any, is recorded afterwards as an IN movement.
    pub async fn insert(&self, product: &NewProduct) -> DbResult<Product> {
        validate_barcode(&product.barcode)?;
        validate_product_name(&product.name)?;
        validate_amount_cents("purchase_price", product.purchase_price_cents)?;
        validate_amount_cents("sale_price", product.sale_price_cents)?;
        validate_tax_rate_bps(product.tax_rate_bps)?;

        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;

        if fetch_by_barcode(&mut tx, &product.barcode).await?.is_some() {
            return Err(DbError::duplicate("barcode", product.barcode.clone()));
        }

        let category_id = match product.category.as_deref() {
            Some(name) => Some(ensure_category(&mut tx, name, now).await?),
            None => None,
        };
        let supplier_id = match product.supplier.as_deref() {
            Some(name) => Some(ensure_supplier(&mut tx, name, now).await?),
            None => None,
        };

        let id = new_id();
        sqlx::query(
            r#"
            INSERT INTO products (
                id, barcode, name, category_id, supplier_id,
                purchase_price_cents, sale_price_cents, tax_rate_bps,
                stock, min_stock, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 1, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&product.barcode)
        .bind(product.name.trim())
        .bind(&category_id)
        .bind(&supplier_id)
        .bind(product.purchase_price_cents)
        .bind(product.sale_price_cents)
        .bind(product.tax_rate_bps)
        .bind(product.min_stock)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let created = fetch_by_barcode(&mut tx, &product.barcode)
            .await?
            .ok_or_else(|| DbError::not_found("Product", product.barcode.clone()))?;

        tx.commit().await?;

        info!(barcode = %created.barcode, id = %created.id, "Product created");
        Ok(created)
    }

    /// Gets a product by barcode.
    pub async fn get_by_barcode(&self, barcode: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_barcode(&mut conn, barcode).await
    }

    /// Products modified strictly after `since`, or all products when `None`.
    ///
    /// ## Used By
    /// - Push: the stock snapshot sent to the cloud
    /// - Master-data export: the product list served to the local instance
    pub async fn modified_since(&self, since: Option<DateTime<Utc>>) -> DbResult<Vec<Product>> {
        let products = match since {
            Some(since) => {
                let sql = format!("{PRODUCT_SELECT} WHERE p.updated_at > ? ORDER BY p.updated_at, p.barcode");
                sqlx::query_as::<_, Product>(&sql)
                    .bind(since)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("{PRODUCT_SELECT} ORDER BY p.updated_at, p.barcode");
                sqlx::query_as::<_, Product>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        debug!(since = ?since, count = products.len(), "Loaded modified products");
        Ok(products)
    }

    /// Counts all products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Connection-level helpers (shared with ledger and sync transactions)
// =============================================================================

pub(crate) async fn fetch_by_barcode(
    conn: &mut SqliteConnection,
    barcode: &str,
) -> DbResult<Option<Product>> {
    let sql = format!("{PRODUCT_SELECT} WHERE p.barcode = ?");
    let product = sqlx::query_as::<_, Product>(&sql)
        .bind(barcode)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(product)
}

pub(crate) async fn fetch_by_id(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
    let sql = format!("{PRODUCT_SELECT} WHERE p.id = ?");
    let product = sqlx::query_as::<_, Product>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(product)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig, DbError};
    use chrono::Duration;
    use stockbridge_core::{MovementMeta, MovementType, NewProduct};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_starts_at_zero_stock() {
        let db = test_db().await;
        let mut new = NewProduct::new("6111000000017", "Olive Oil 1L", 4500);
        new.category = Some("Grocery".into());
        new.supplier = Some("Atlas Foods".into());

        let product = db.products().insert(&new).await.unwrap();
        assert_eq!(product.stock, 0);
        assert_eq!(product.category.as_deref(), Some("Grocery"));
        assert_eq!(product.supplier.as_deref(), Some("Atlas Foods"));
        assert_eq!(product.tax_rate_bps, 2000);

        let categories = db.catalog().list_categories().await.unwrap();
        assert_eq!(categories.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_barcode_rejected() {
        let db = test_db().await;
        let new = NewProduct::new("123", "Tea", 150);
        db.products().insert(&new).await.unwrap();

        let err = db.products().insert(&new).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_invalid_product_rejected() {
        let db = test_db().await;
        let err = db
            .products()
            .insert(&NewProduct::new("", "Tea", 150))
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(db.products().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_modified_since_filters_strictly() {
        let db = test_db().await;
        let a = db.products().insert(&NewProduct::new("A1", "Apple", 100)).await.unwrap();
        db.products().insert(&NewProduct::new("B1", "Bread", 200)).await.unwrap();

        let all = db.products().modified_since(None).await.unwrap();
        assert_eq!(all.len(), 2);

        // A movement bumps updated_at past the cutoff
        let cutoff = a.updated_at + Duration::milliseconds(1);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.ledger()
            .record_movement("A1", MovementType::In, 3, MovementMeta::default())
            .await
            .unwrap();

        let changed = db.products().modified_since(Some(cutoff)).await.unwrap();
        let barcodes: Vec<_> = changed.iter().map(|p| p.barcode.as_str()).collect();
        assert!(barcodes.contains(&"A1"));
        assert!(changed.iter().all(|p| p.updated_at > cutoff));
    }
}
