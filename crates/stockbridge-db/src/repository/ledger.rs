//! # Stock Ledger Repository
//!
//! The only writer of `products.stock` on the local instance.
//!
//! ## One Movement, One Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  record_movement(barcode, type, quantity, meta)                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  acquire ledger lock                                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN IMMEDIATE                                                       │
//! │   ├── SELECT product (stock_before)                                    │
//! │   ├── MovementType::apply(before, quantity)  ← stockbridge-core        │
//! │   ├── INSERT stock_movements (before, after, recorded quantity)        │
//! │   └── UPDATE products SET stock = after, updated_at = now              │
//! │  COMMIT                                                                │
//! │                                                                         │
//! │  Any failure → ROLLBACK → neither row written                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::product::fetch_by_barcode;
use stockbridge_core::ledger::is_consistent;
use stockbridge_core::{new_id, MovementMeta, MovementType, Product, StockMovement};

const MOVEMENT_SELECT: &str = r#"
    SELECT
        id, product_id, movement_type, quantity, stock_before, stock_after,
        unit_cost_cents, reference, notes, supplier_id, created_by, created_at
    FROM stock_movements
"#;

/// Repository for stock movements.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
    lock: Arc<Mutex<()>>,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool, lock: Arc<Mutex<()>>) -> Self {
        LedgerRepository { pool, lock }
    }

    /// Records one movement and updates the product's stock atomically.
    ///
    /// For [`MovementType::Adjust`], `quantity` is the counted stock; the
    /// stored movement holds the difference.
    ///
    /// ## Errors
    /// - `NotFound` when the barcode is unknown
    /// - `Domain(InsufficientStock)` when an OUT would go below zero
    /// - `Domain(InvalidQuantity | InvalidAdjustTarget)` for negative input
    pub async fn record_movement(
        &self,
        barcode: &str,
        movement_type: MovementType,
        quantity: i64,
        meta: MovementMeta,
    ) -> DbResult<StockMovement> {
        let _guard = self.lock.lock().await;
        let mut tx = begin_write(&self.pool).await?;

        let product = fetch_by_barcode(&mut tx, barcode)
            .await?
            .ok_or_else(|| DbError::not_found("Product", barcode))?;

        let movement = apply_movement(&mut tx, &product, movement_type, quantity, &meta, Utc::now()).await?;

        tx.commit().await?;

        info!(
            barcode = %barcode,
            movement_type = %movement.movement_type,
            quantity = movement.quantity,
            stock_before = movement.stock_before,
            stock_after = movement.stock_after,
            "Stock movement recorded"
        );
        Ok(movement)
    }

    /// All movements for a product, oldest first.
    pub async fn history(&self, barcode: &str) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "{MOVEMENT_SELECT} WHERE product_id = (SELECT id FROM products WHERE barcode = ?) ORDER BY rowid"
        );
        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(barcode)
            .fetch_all(&self.pool)
            .await?;
        Ok(movements)
    }

    /// The most recently inserted movement for a product.
    pub async fn latest(&self, barcode: &str) -> DbResult<Option<StockMovement>> {
        let sql = format!(
            "{MOVEMENT_SELECT} WHERE product_id = (SELECT id FROM products WHERE barcode = ?) ORDER BY rowid DESC LIMIT 1"
        );
        let movement = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(barcode)
            .fetch_optional(&self.pool)
            .await?;
        Ok(movement)
    }
}

// =============================================================================
// Connection-level helper
// =============================================================================

/// Applies one movement inside an open transaction.
///
/// The caller must hold the ledger lock and commit.
pub(crate) async fn apply_movement(
    conn: &mut SqliteConnection,
    product: &Product,
    movement_type: MovementType,
    quantity: i64,
    meta: &MovementMeta,
    now: DateTime<Utc>,
) -> DbResult<StockMovement> {
    // Re-read inside the transaction so `before` is the committed value
    let before: i64 = sqlx::query_scalar("SELECT stock FROM products WHERE id = ?")
        .bind(&product.id)
        .fetch_one(&mut *conn)
        .await?;

    let transition = movement_type.apply(before, quantity).map_err(|e| {
        warn!(barcode = %product.barcode, movement_type = %movement_type, quantity, error = %e, "Movement rejected");
        DbError::from(e)
    })?;

    debug_assert!(is_consistent(
        movement_type,
        transition.quantity,
        transition.stock_before,
        transition.stock_after
    ));

    let movement = StockMovement {
        id: new_id(),
        product_id: product.id.clone(),
        movement_type,
        quantity: transition.quantity,
        stock_before: transition.stock_before,
        stock_after: transition.stock_after,
        unit_cost_cents: meta.unit_cost_cents,
        reference: meta.reference.clone(),
        notes: meta.notes.clone(),
        supplier_id: meta.supplier_id.clone(),
        created_by: meta.created_by.clone(),
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, product_id, movement_type, quantity, stock_before, stock_after,
            unit_cost_cents, reference, notes, supplier_id, created_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&movement.id)
    .bind(&movement.product_id)
    .bind(movement.movement_type)
    .bind(movement.quantity)
    .bind(movement.stock_before)
    .bind(movement.stock_after)
    .bind(movement.unit_cost_cents)
    .bind(&movement.reference)
    .bind(&movement.notes)
    .bind(&movement.supplier_id)
    .bind(&movement.created_by)
    .bind(movement.created_at)
    .execute(&mut *conn)
    .await?;

    sqlx::query("UPDATE products SET stock = ?, updated_at = ? WHERE id = ?")
        .bind(movement.stock_after)
        .bind(now)
        .bind(&product.id)
        .execute(&mut *conn)
        .await?;

    debug!(barcode = %product.barcode, movement_id = %movement.id, "Movement applied");
    Ok(movement)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig, DbError};
    use stockbridge_core::ledger::is_consistent;
    use stockbridge_core::{CoreError, MovementMeta, MovementType, NewProduct};

    async fn db_with_product(barcode: &str) -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.products()
            .insert(&NewProduct::new(barcode, "Sugar 1kg", 1200))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_in_then_out() {
        let db = db_with_product("S1").await;
        let ledger = db.ledger();

        ledger.record_movement("S1", MovementType::In, 10, MovementMeta::default()).await.unwrap();
        let out = ledger
            .record_movement("S1", MovementType::Out, 4, MovementMeta::reference("manual"))
            .await
            .unwrap();

        assert_eq!(out.stock_before, 10);
        assert_eq!(out.stock_after, 6);
        assert_eq!(out.reference.as_deref(), Some("manual"));

        let product = db.products().get_by_barcode("S1").await.unwrap().unwrap();
        assert_eq!(product.stock, 6);
    }

    #[tokio::test]
    async fn test_adjust_records_signed_delta() {
        let db = db_with_product("S1").await;
        let ledger = db.ledger();

        ledger.record_movement("S1", MovementType::In, 100, MovementMeta::default()).await.unwrap();
        let adjust = ledger
            .record_movement("S1", MovementType::Adjust, 75, MovementMeta::default())
            .await
            .unwrap();

        assert_eq!(adjust.quantity, -25);
        assert_eq!(adjust.stock_before, 100);
        assert_eq!(adjust.stock_after, 75);
        assert_eq!(db.products().get_by_barcode("S1").await.unwrap().unwrap().stock, 75);
    }

    #[tokio::test]
    async fn test_out_beyond_stock_writes_nothing() {
        let db = db_with_product("S1").await;
        let ledger = db.ledger();

        ledger.record_movement("S1", MovementType::In, 3, MovementMeta::default()).await.unwrap();
        let err = ledger
            .record_movement("S1", MovementType::Out, 5, MovementMeta::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { available: 3, requested: 5 })
        ));
        assert_eq!(db.products().get_by_barcode("S1").await.unwrap().unwrap().stock, 3);
        assert_eq!(ledger.history("S1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_negative_inputs_rejected() {
        let db = db_with_product("S1").await;
        let ledger = db.ledger();

        assert!(ledger
            .record_movement("S1", MovementType::In, -1, MovementMeta::default())
            .await
            .unwrap_err()
            .is_rejection());
        assert!(ledger
            .record_movement("S1", MovementType::Adjust, -3, MovementMeta::default())
            .await
            .unwrap_err()
            .is_rejection());
        assert!(ledger.history("S1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_barcode() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db
            .ledger()
            .record_movement("nope", MovementType::In, 1, MovementMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_ledger_replays_to_current_stock() {
        let db = db_with_product("S1").await;
        let ledger = db.ledger();

        let steps = [
            (MovementType::In, 20),
            (MovementType::Out, 7),
            (MovementType::Return, 2),
            (MovementType::Adjust, 11),
            (MovementType::Out, 11),
            (MovementType::In, 4),
        ];
        for (movement_type, quantity) in steps {
            ledger
                .record_movement("S1", movement_type, quantity, MovementMeta::default())
                .await
                .unwrap();
        }

        let history = ledger.history("S1").await.unwrap();
        assert_eq!(history.len(), steps.len());

        let mut running = 0;
        for m in &history {
            assert_eq!(m.stock_before, running);
            assert!(is_consistent(m.movement_type, m.quantity, m.stock_before, m.stock_after));
            running = m.stock_after;
        }

        let latest = ledger.latest("S1").await.unwrap().unwrap();
        let product = db.products().get_by_barcode("S1").await.unwrap().unwrap();
        assert_eq!(latest.stock_after, 4);
        assert_eq!(product.stock, latest.stock_after);
    }

    #[tokio::test]
    async fn test_concurrent_outs_never_oversell() {
        let db = db_with_product("S1").await;
        db.ledger()
            .record_movement("S1", MovementType::In, 5, MovementMeta::default())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = db.ledger();
            handles.push(tokio::spawn(async move {
                ledger
                    .record_movement("S1", MovementType::Out, 1, MovementMeta::default())
                    .await
                    .is_ok()
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 5);
        assert_eq!(db.products().get_by_barcode("S1").await.unwrap().unwrap().stock, 0);
    }
}
