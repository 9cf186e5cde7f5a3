//! # Master-Data Reconciliation
//!
//! Catalog changes flow from the cloud to the local instance.
//!
//! ```text
//! ┌──────────────── CLOUD ────────────────┐      ┌──────────────── LOCAL ────────────────┐
//! │ export_master_data(since)             │      │ Reconciler::pull                      │
//! │   timestamp = now                     │      │   since = last_pull checkpoint        │
//! │   all categories                      │─────►│   BEGIN                               │
//! │   all suppliers                       │      │   upsert categories, suppliers        │
//! │   products updated_at > since         │      │   merge products (LWW, stock kept)    │
//! └───────────────────────────────────────┘      │   COMMIT                              │
//!                                                │   last_pull = response.timestamp      │
//!                                                └───────────────────────────────────────┘
//! ```
//!
//! The checkpoint stores the cloud's clock, so the next `since` filter is
//! compared against values the cloud itself wrote.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use stockbridge_core::SyncPhase;
use stockbridge_db::{Database, MergeOutcome};

use crate::checkpoint::{CheckpointStore, Direction};
use crate::client::RemoteClient;
use crate::error::SyncResult;
use crate::protocol::{CategoryRecord, MasterDataResponse, ProductRecord, SupplierRecord};

/// Builds the master-data export served by the cloud instance.
pub async fn export_master_data(db: &Database, since: Option<DateTime<Utc>>) -> SyncResult<MasterDataResponse> {
    // Taken before reading so a row changed mid-export is sent again next time.
    let timestamp = Utc::now();

    let categories = db.catalog().list_categories().await?;
    let suppliers = db.catalog().list_suppliers().await?;
    let products = db.products().modified_since(since).await?;

    info!(
        since = ?since,
        categories = categories.len(),
        suppliers = suppliers.len(),
        products = products.len(),
        "Master data exported"
    );

    Ok(MasterDataResponse {
        categories: categories.iter().map(CategoryRecord::from).collect(),
        suppliers: suppliers.iter().map(SupplierRecord::from).collect(),
        products: products.iter().map(ProductRecord::from).collect(),
        timestamp,
    })
}

/// Counters of one applied export.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PullReport {
    pub categories: u64,
    pub suppliers: u64,
    pub products_created: u64,
    pub products_updated: u64,
    pub products_kept_local: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PullReport {
    pub fn records(&self) -> u64 {
        self.products_created + self.products_updated
    }
}

/// Pull phase of the local instance.
#[derive(Debug, Clone)]
pub struct Reconciler {
    db: Database,
    checkpoints: CheckpointStore,
}

impl Reconciler {
    pub fn new(db: Database, checkpoints: CheckpointStore) -> Self {
        Reconciler { db, checkpoints }
    }

    /// Fetches changes since the last pull and merges them.
    pub async fn pull(&self, client: &RemoteClient) -> SyncResult<PullReport> {
        let result = self.try_pull(client).await;

        let logged = match &result {
            Ok(report) => {
                self.db
                    .sync_logs()
                    .record_success(SyncPhase::Pull, report.records() as i64, report)
                    .await
            }
            Err(e) => {
                error!(
                    error = %e,
                    retryable = e.is_retryable(),
                    needs_operator = e.is_config_error() || e.is_auth_error(),
                    "Pull failed"
                );
                self.db
                    .sync_logs()
                    .record_failure(SyncPhase::Pull, &e.to_string())
                    .await
            }
        };
        if let Err(log_err) = logged {
            warn!(error = %log_err, "Pull outcome not logged");
        }

        result
    }

    async fn try_pull(&self, client: &RemoteClient) -> SyncResult<PullReport> {
        let since = self.checkpoints.read(Direction::Pull).await?;
        let response = client.master_data(since).await?;

        let report = self.apply(&response).await?;
        self.checkpoints.advance(Direction::Pull, response.timestamp).await?;
        Ok(report)
    }

    /// Merges one export into the local catalog in a single transaction.
    ///
    /// Local stock is never written. An invalid record aborts the whole apply.
    pub async fn apply(&self, response: &MasterDataResponse) -> SyncResult<PullReport> {
        for category in &response.categories {
            category.validate()?;
        }
        for supplier in &response.suppliers {
            supplier.validate()?;
        }

        let mut report = PullReport {
            timestamp: Some(response.timestamp),
            ..Default::default()
        };

        let mut tx = self.db.begin_sync().await?;

        for category in &response.categories {
            tx.upsert_category(&category.name, category.description.as_deref()).await?;
            report.categories += 1;
        }

        for supplier in &response.suppliers {
            tx.upsert_supplier(&supplier.to_details()).await?;
            report.suppliers += 1;
        }

        for product in &response.products {
            match tx.merge_product(&product.to_master()).await? {
                MergeOutcome::Created => report.products_created += 1,
                MergeOutcome::Updated => report.products_updated += 1,
                MergeOutcome::KeptLocal => report.products_kept_local += 1,
            }
        }

        tx.commit().await?;

        info!(
            categories = report.categories,
            suppliers = report.suppliers,
            created = report.products_created,
            updated = report.products_updated,
            kept_local = report.products_kept_local,
            "Master data applied"
        );
        Ok(report)
    }
}
