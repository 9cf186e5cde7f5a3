//! # Return Repository
//!
//! Refunds against prior sales. Returned units go back into stock through
//! RETURN movements, in the same transaction as the return itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::ledger::apply_movement;
use crate::repository::product::fetch_by_id;
use crate::repository::sale::SALE_SELECT;
use stockbridge_core::validation::{validate_line_quantity, validate_reference_name};
use stockbridge_core::{
    new_id, CoreError, Money, MovementMeta, MovementType, ReturnItem, ReturnStatus, Sale,
    SaleItem, SaleReturn, TaxRate, ValidationError,
};

const RETURN_SELECT: &str = r#"
    SELECT
        id, sale_id, reason, refund_amount_cents, status, processed_by,
        origin_system, origin_local_id, synced, created_at
    FROM returns
"#;

const RETURN_ITEM_SELECT: &str = r#"
    SELECT
        id, return_id, sale_item_id, product_id, barcode_snapshot, quantity, refund_amount_cents
    FROM return_items
"#;

/// One requested line of a new return.
#[derive(Debug, Clone)]
pub struct ReturnLine {
    pub sale_item_id: String,
    pub quantity: i64,
}

/// A return with its lines, its parent sale's timestamp and its actor.
#[derive(Debug, Clone)]
pub struct ReturnWithItems {
    pub sale_return: SaleReturn,
    /// Identity of the parent sale across instances.
    pub sale_created_at: DateTime<Utc>,
    pub processed_by_username: Option<String>,
    pub items: Vec<ReturnItem>,
}

#[derive(Debug, Clone)]
pub struct ReturnRepository {
    pool: SqlitePool,
    lock: Arc<Mutex<()>>,
}

impl ReturnRepository {
    pub fn new(pool: SqlitePool, lock: Arc<Mutex<()>>) -> Self {
        ReturnRepository { pool, lock }
    }

    /// Creates a completed return and restocks every returned unit.
    ///
    /// ## Errors
    /// - `Domain(SaleNotFound)` when the sale doesn't exist
    /// - `NotFound` when a line names an item of another sale
    /// - `Domain(ReturnExceedsSold)` when a line, together with earlier
    ///   returns, asks for more units than were sold
    pub async fn create_return(
        &self,
        sale_id: &str,
        reason: &str,
        lines: &[ReturnLine],
        processed_by: Option<&str>,
    ) -> DbResult<ReturnWithItems> {
        validate_reference_name("reason", reason)?;
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

        let sale_sql = format!("{SALE_SELECT} WHERE id = ?");
        let sale = sqlx::query_as::<_, Sale>(&sale_sql)
            .bind(sale_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(sale_id.to_string()))?;

        let mut refunds = Vec::with_capacity(lines.len());
        let mut total_refund = Money::zero();
        for line in lines {
            let item = sqlx::query_as::<_, SaleItem>(
                r#"
                SELECT
                    id, sale_id, product_id, barcode_snapshot, name_snapshot, quantity,
                    unit_price_cents, line_total_cents, tax_rate_bps
                FROM sale_items WHERE id = ? AND sale_id = ?
                "#,
            )
            .bind(&line.sale_item_id)
            .bind(&sale.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("SaleItem", line.sale_item_id.clone()))?;

            let already_returned: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(quantity), 0) FROM return_items WHERE sale_item_id = ?",
            )
            .bind(&item.id)
            .fetch_one(&mut *tx)
            .await?;

            if already_returned + line.quantity > item.quantity {
                return Err(CoreError::ReturnExceedsSold {
                    barcode: item.barcode_snapshot.clone().unwrap_or_else(|| item.name_snapshot.clone()),
                    sold: item.quantity,
                    requested: already_returned + line.quantity,
                }
                .into());
            }

            let net = Money::from_cents(item.unit_price_cents).multiply_quantity(line.quantity);
            let refund = net + net.calculate_tax(TaxRate::from_bps(item.tax_rate_bps));
            total_refund += refund;
            refunds.push((item, line.quantity, refund));
        }

        let return_id = new_id();
        sqlx::query(
            r#"
            INSERT INTO returns (
                id, sale_id, reason, refund_amount_cents, status, processed_by, synced, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&return_id)
        .bind(&sale.id)
        .bind(reason.trim())
        .bind(total_refund.cents())
        .bind(ReturnStatus::Completed)
        .bind(processed_by)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let meta = MovementMeta::reference(return_id.clone()).by(processed_by.map(str::to_string));
        for (line_no, (item, quantity, refund)) in refunds.iter().enumerate() {
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
            .bind(&item.id)
            .bind(&item.product_id)
            .bind(&item.barcode_snapshot)
            .bind(*quantity)
            .bind(refund.cents())
            .bind(line_no as i64)
            .execute(&mut *tx)
            .await?;

            let product = match item.product_id.as_deref() {
                Some(product_id) => fetch_by_id(&mut tx, product_id).await?,
                None => None,
            };
            match product {
                Some(product) => {
                    apply_movement(&mut tx, &product, MovementType::Return, *quantity, &meta, now).await?;
                }
                None => {
                    warn!(
                        sale_item_id = %item.id,
                        name = %item.name_snapshot,
                        "Returned item has no local product, stock not restored"
                    );
                }
            }
        }

        tx.commit().await?;

        info!(
            return_id = %return_id,
            sale_id = %sale.id,
            refund = %total_refund,
            "Return created"
        );

        self.get(&return_id)
            .await?
            .ok_or_else(|| DbError::not_found("Return", return_id.clone()))
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<ReturnWithItems>> {
        let sql = format!("{RETURN_SELECT} WHERE id = ?");
        let sale_return = sqlx::query_as::<_, SaleReturn>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match sale_return {
            Some(sale_return) => Ok(Some(self.with_items(sale_return).await?)),
            None => Ok(None),
        }
    }

    /// Finds a return by its exact creation timestamp.
    pub async fn find_by_created_at(&self, created_at: DateTime<Utc>) -> DbResult<Option<SaleReturn>> {
        let sql = format!("{RETURN_SELECT} WHERE created_at = ? ORDER BY rowid LIMIT 1");
        let sale_return = sqlx::query_as::<_, SaleReturn>(&sql)
            .bind(created_at)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sale_return)
    }

    /// Returns not yet acknowledged by the cloud, oldest first.
    pub async fn unsynced(&self) -> DbResult<Vec<ReturnWithItems>> {
        let sql = format!("{RETURN_SELECT} WHERE synced = 0 ORDER BY created_at, rowid");
        let returns = sqlx::query_as::<_, SaleReturn>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let mut result = Vec::with_capacity(returns.len());
        for sale_return in returns {
            result.push(self.with_items(sale_return).await?);
        }

        debug!(count = result.len(), "Loaded unsynced returns");
        Ok(result)
    }

    pub async fn count_unsynced(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM returns WHERE synced = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM returns")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Flips `synced` on exactly the given returns.
    pub async fn mark_synced(&self, ids: &[String]) -> DbResult<u64> {
        let mut tx = begin_write(&self.pool).await?;
        let mut changed = 0;
        for id in ids {
            changed += sqlx::query("UPDATE returns SET synced = 1 WHERE id = ? AND synced = 0")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        debug!(requested = ids.len(), changed, "Returns marked synced");
        Ok(changed)
    }

    async fn with_items(&self, sale_return: SaleReturn) -> DbResult<ReturnWithItems> {
        let sql = format!("{RETURN_ITEM_SELECT} WHERE return_id = ? ORDER BY line_no, rowid");
        let items = sqlx::query_as::<_, ReturnItem>(&sql)
            .bind(&sale_return.id)
            .fetch_all(&self.pool)
            .await?;

        let sale_created_at: DateTime<Utc> =
            sqlx::query_scalar("SELECT created_at FROM sales WHERE id = ?")
                .bind(&sale_return.sale_id)
                .fetch_one(&self.pool)
                .await?;

        let processed_by_username: Option<String> = match sale_return.processed_by.as_deref() {
            Some(user_id) => sqlx::query_scalar("SELECT username FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
            None => None,
        };

        Ok(ReturnWithItems {
            sale_return,
            sale_created_at,
            processed_by_username,
            items,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::ReturnLine;
    use crate::repository::sale::SaleLine;
    use crate::{Database, DbConfig, DbError};
    use stockbridge_core::{
        CoreError, MovementMeta, MovementType, NewProduct, PaymentMethod, ReturnStatus,
    };

    async fn db_with_sale() -> (Database, crate::repository::sale::SaleWithItems) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.products().insert(&NewProduct::new("A", "Milk", 1000)).await.unwrap();
        db.ledger()
            .record_movement("A", MovementType::In, 10, MovementMeta::default())
            .await
            .unwrap();
        let sale = db
            .sales()
            .create_sale(None, PaymentMethod::Cash, &[SaleLine::new("A", 4)])
            .await
            .unwrap();
        (db, sale)
    }

    #[tokio::test]
    async fn test_return_restocks() {
        let (db, sale) = db_with_sale().await;
        let line = ReturnLine {
            sale_item_id: sale.items[0].id.clone(),
            quantity: 2,
        };

        let created = db
            .returns()
            .create_return(&sale.sale.id, "Damaged", &[line], None)
            .await
            .unwrap();

        assert_eq!(created.sale_return.status, ReturnStatus::Completed);
        // 2 × 10.00 + 20% tax
        assert_eq!(created.sale_return.refund_amount_cents, 2400);
        assert_eq!(created.sale_created_at, sale.sale.created_at);
        assert_eq!(db.products().get_by_barcode("A").await.unwrap().unwrap().stock, 8);

        let latest = db.ledger().latest("A").await.unwrap().unwrap();
        assert_eq!(latest.movement_type, MovementType::Return);
        assert_eq!((latest.stock_before, latest.stock_after), (6, 8));
    }

    #[tokio::test]
    async fn test_return_cannot_exceed_sold() {
        let (db, sale) = db_with_sale().await;
        let item_id = sale.items[0].id.clone();
        let returns = db.returns();

        returns
            .create_return(&sale.sale.id, "Wrong size", &[ReturnLine { sale_item_id: item_id.clone(), quantity: 3 }], None)
            .await
            .unwrap();

        let err = returns
            .create_return(&sale.sale.id, "Again", &[ReturnLine { sale_item_id: item_id, quantity: 2 }], None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::Domain(CoreError::ReturnExceedsSold { sold: 4, requested: 5, .. })
        ));
        assert_eq!(returns.count().await.unwrap(), 1);
        assert_eq!(db.products().get_by_barcode("A").await.unwrap().unwrap().stock, 9);
    }

    #[tokio::test]
    async fn test_return_for_unknown_sale() {
        let (db, _) = db_with_sale().await;
        let err = db
            .returns()
            .create_return(
                "missing",
                "Damaged",
                &[ReturnLine { sale_item_id: "x".into(), quantity: 1 }],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::SaleNotFound(_))));
    }

    #[tokio::test]
    async fn test_unsynced_returns() {
        let (db, sale) = db_with_sale().await;
        let returns = db.returns();
        let created = returns
            .create_return(
                &sale.sale.id,
                "Damaged",
                &[ReturnLine { sale_item_id: sale.items[0].id.clone(), quantity: 1 }],
                None,
            )
            .await
            .unwrap();

        assert_eq!(returns.count_unsynced().await.unwrap(), 1);
        returns.mark_synced(&[created.sale_return.id]).await.unwrap();
        assert!(returns.unsynced().await.unwrap().is_empty());
    }
}
