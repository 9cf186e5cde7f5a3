//! # Inbound Receive
//!
//! Applies a [`PushPayload`] on the cloud instance.
//!
//! ## Batch Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Validate every record          any failure ──► 400, nothing written │
//! │  2. BEGIN                                                               │
//! │  3. sales    created_at already here?   yes ──► skip                    │
//! │                                         no  ──► insert (synced)         │
//! │  4. returns  created_at already here?   yes ──► skip                    │
//! │              parent sale_created_at?    no  ──► warn, skip              │
//! │                                         yes ──► insert under parent     │
//! │  5. stock    newer than local row?      yes ──► overwrite reference     │
//! │  6. COMMIT                                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Receiving the same payload twice creates nothing the second time.
//! The receiving instance never records ledger movements for incoming data.

use chrono::Utc;
use tracing::{error, info, warn};

use stockbridge_core::SyncPhase;
use stockbridge_db::{Database, StockReferenceOutcome};

use crate::error::SyncResult;
use crate::protocol::{PushPayload, ReceiveResponse};

/// Cloud-side handler for pushed batches.
#[derive(Debug, Clone)]
pub struct Receiver {
    db: Database,
}

impl Receiver {
    pub fn new(db: Database) -> Self {
        Receiver { db }
    }

    /// Applies one batch atomically and logs the outcome.
    pub async fn receive(&self, payload: &PushPayload) -> SyncResult<ReceiveResponse> {
        let result = self.apply(payload).await;

        let logged = match &result {
            Ok(response) => {
                self.db
                    .sync_logs()
                    .record_success(
                        SyncPhase::Receive,
                        (response.sales_created + response.returns_created) as i64,
                        response,
                    )
                    .await
            }
            Err(e) => {
                error!(error = %e, "Receive failed, batch rolled back");
                self.db
                    .sync_logs()
                    .record_failure(SyncPhase::Receive, &e.to_string())
                    .await
            }
        };
        if let Err(log_err) = logged {
            warn!(error = %log_err, "Receive outcome not logged");
        }

        result
    }

    async fn apply(&self, payload: &PushPayload) -> SyncResult<ReceiveResponse> {
        for sale in &payload.sales {
            sale.validate()?;
        }
        for ret in &payload.returns {
            ret.validate()?;
        }
        for update in &payload.stock_updates {
            update.validate()?;
        }

        let mut response = ReceiveResponse {
            status: "success".to_string(),
            stock_updates_received: payload.stock_updates.len() as u64,
            ..Default::default()
        };

        // Dropping `tx` on an early return rolls the whole batch back.
        let mut tx = self.db.begin_sync().await?;

        for sale in &payload.sales {
            if tx.sale_exists_at(sale.created_at).await? {
                response.sales_skipped += 1;
                continue;
            }
            tx.insert_sale(&sale.to_imported()).await?;
            response.sales_created += 1;
        }

        for ret in &payload.returns {
            if tx.return_exists_at(ret.created_at).await? {
                response.returns_skipped += 1;
                continue;
            }
            let Some(sale_id) = tx.sale_id_at(ret.sale_created_at).await? else {
                warn!(
                    local_id = %ret.local_id,
                    sale_created_at = %ret.sale_created_at,
                    "Return references an unknown sale, skipped"
                );
                response.returns_orphaned += 1;
                continue;
            };
            tx.insert_return(&sale_id, &ret.to_imported()).await?;
            response.returns_created += 1;
        }

        for update in &payload.stock_updates {
            let outcome = tx
                .apply_stock_reference(&update.barcode, update.stock, update.updated_at)
                .await?;
            if outcome == StockReferenceOutcome::Applied {
                response.stock_updates_applied += 1;
            }
        }

        tx.commit().await?;
        response.sync_time = Some(Utc::now());

        info!(
            sales_created = response.sales_created,
            sales_skipped = response.sales_skipped,
            returns_created = response.returns_created,
            returns_skipped = response.returns_skipped,
            returns_orphaned = response.returns_orphaned,
            stock_updates_applied = response.stock_updates_applied,
            "Batch received"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use stockbridge_core::{MovementMeta, MovementType, NewProduct, PaymentMethod};
    use stockbridge_db::{DbConfig, ReturnLine, SaleLine};

    use crate::protocol::{ReturnRecord, SaleRecord, StockUpdate};

    /// A store that sold and returned one unit, and the payload it would push.
    async fn store_payload() -> PushPayload {
        let store = Database::new(DbConfig::in_memory()).await.unwrap();
        store.products().insert(&NewProduct::new("A", "Milk", 500)).await.unwrap();
        store
            .ledger()
            .record_movement("A", MovementType::In, 10, MovementMeta::default())
            .await
            .unwrap();
        let sale = store
            .sales()
            .create_sale(None, PaymentMethod::Cash, &[SaleLine::new("A", 2)])
            .await
            .unwrap();
        let ret = store
            .returns()
            .create_return(
                &sale.sale.id,
                "Damaged",
                &[ReturnLine {
                    sale_item_id: sale.items[0].id.clone(),
                    quantity: 1,
                }],
                None,
            )
            .await
            .unwrap();
        let product = store.products().get_by_barcode("A").await.unwrap().unwrap();

        PushPayload {
            sales: vec![SaleRecord::from_local(&sale, "downtown")],
            returns: vec![ReturnRecord::from_local(&ret, "downtown")],
            stock_updates: vec![StockUpdate::from(&product)],
            sync_timestamp: Utc::now(),
        }
    }

    async fn cloud() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut product = NewProduct::new("A", "Milk", 500);
        product.min_stock = 2;
        db.products().insert(&product).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_receive_is_idempotent() {
        let cloud = cloud().await;
        let receiver = Receiver::new(cloud.clone());
        let payload = store_payload().await;

        let first = receiver.receive(&payload).await.unwrap();
        assert_eq!(first.status, "success");
        assert_eq!(first.sales_created, 1);
        assert_eq!(first.returns_created, 1);
        assert!(first.sync_time.is_some());

        let second = receiver.receive(&payload).await.unwrap();
        assert_eq!(second.sales_created, 0);
        assert_eq!(second.sales_skipped, 1);
        assert_eq!(second.returns_created, 0);
        assert_eq!(second.returns_skipped, 1);

        assert_eq!(cloud.sales().count().await.unwrap(), 1);
        assert_eq!(cloud.returns().count().await.unwrap(), 1);

        let sale = cloud
            .sales()
            .find_by_created_at(payload.sales[0].created_at)
            .await
            .unwrap()
            .unwrap();
        assert!(sale.synced);
        assert_eq!(sale.origin_local_id.as_deref(), Some(payload.sales[0].local_id.as_str()));
    }

    #[tokio::test]
    async fn test_incoming_data_never_touches_the_ledger() {
        let cloud = cloud().await;
        Receiver::new(cloud.clone()).receive(&store_payload().await).await.unwrap();
        assert!(cloud.ledger().history("A").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_record_rejects_whole_batch() {
        let cloud = cloud().await;
        let receiver = Receiver::new(cloud.clone());
        let mut payload = store_payload().await;
        payload.returns[0].reason = String::new();

        let err = receiver.receive(&payload).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(cloud.sales().count().await.unwrap(), 0);
        assert_eq!(cloud.returns().count().await.unwrap(), 0);

        let log = cloud.sync_logs().latest(SyncPhase::Receive).await.unwrap().unwrap();
        assert!(!log.success);
    }

    #[tokio::test]
    async fn test_committed_batch_survives_log_write_failure() {
        let cloud = cloud().await;
        let receiver = Receiver::new(cloud.clone());
        sqlx::query("DROP TABLE sync_logs").execute(cloud.pool()).await.unwrap();

        let response = receiver.receive(&store_payload().await).await.unwrap();
        assert_eq!(response.sales_created, 1);
        assert_eq!(cloud.sales().count().await.unwrap(), 1);

        // A rejected batch keeps its own error
        let mut bad = store_payload().await;
        bad.returns[0].reason = String::new();
        let err = receiver.receive(&bad).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_orphan_return_skipped() {
        let cloud = cloud().await;
        let receiver = Receiver::new(cloud.clone());
        let mut payload = store_payload().await;
        payload.sales.clear();

        let response = receiver.receive(&payload).await.unwrap();
        assert_eq!(response.returns_created, 0);
        assert_eq!(response.returns_orphaned, 1);
        assert_eq!(cloud.returns().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stock_reference_last_writer_wins() {
        let cloud = cloud().await;
        let receiver = Receiver::new(cloud.clone());
        let local = cloud.products().get_by_barcode("A").await.unwrap().unwrap();

        let stale = PushPayload {
            stock_updates: vec![StockUpdate {
                barcode: "A".into(),
                stock: 3,
                updated_at: local.updated_at - Duration::minutes(1),
            }],
            sync_timestamp: Utc::now(),
            ..Default::default()
        };
        let response = receiver.receive(&stale).await.unwrap();
        assert_eq!(response.stock_updates_received, 1);
        assert_eq!(response.stock_updates_applied, 0);
        assert_eq!(cloud.products().get_by_barcode("A").await.unwrap().unwrap().stock, 0);

        let fresh = PushPayload {
            stock_updates: vec![StockUpdate {
                barcode: "A".into(),
                stock: 9,
                updated_at: local.updated_at + Duration::minutes(1),
            }],
            sync_timestamp: Utc::now(),
            ..Default::default()
        };
        let response = receiver.receive(&fresh).await.unwrap();
        assert_eq!(response.stock_updates_applied, 1);
        assert_eq!(cloud.products().get_by_barcode("A").await.unwrap().unwrap().stock, 9);
    }
}
