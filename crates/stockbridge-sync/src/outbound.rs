//! # Outbound Push
//!
//! Sends every not-yet-synced sale and return, plus a stock snapshot, to the
//! cloud instance in a single request.
//!
//! ## Push Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Push (LOCAL → CLOUD)                            │
//! │                                                                         │
//! │  1. started_at = now                                                   │
//! │  2. sales   WHERE synced = 0  ──┐                                      │
//! │     returns WHERE synced = 0  ──┼──► PushPayload                       │
//! │     products modified since   ──┘    (natural keys only)               │
//! │     last_push checkpoint                                               │
//! │  3. POST /sync/receive                                                 │
//! │       │                                                                 │
//! │       ├── 2xx ──► mark exactly those rows synced                       │
//! │       │          last_push = started_at                                │
//! │       │          sync log (success)                                    │
//! │       │                                                                 │
//! │       └── error / timeout / non-2xx ──► nothing changes,               │
//! │                  sync log (failure), next cycle resends the same set   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows created while a push is in flight are not in the payload and stay
//! unsynced. Two overlapping pushes may send the same rows twice; the
//! receiver's timestamp dedup absorbs that.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use stockbridge_core::SyncPhase;
use stockbridge_db::Database;

use crate::checkpoint::{CheckpointStore, Direction};
use crate::client::RemoteClient;
use crate::error::SyncResult;
use crate::protocol::{PushPayload, ReceiveResponse, ReturnRecord, SaleRecord, StockUpdate};

/// A payload together with the local ids it covers.
#[derive(Debug, Clone)]
pub struct PendingPush {
    pub payload: PushPayload,
    pub sale_ids: Vec<String>,
    pub return_ids: Vec<String>,
}

/// Counters of a successful push.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PushReport {
    pub sales: u64,
    pub returns: u64,
    pub stock_updates: u64,
    pub remote: ReceiveResponse,
}

impl PushReport {
    pub fn records(&self) -> u64 {
        self.sales + self.returns
    }
}

/// Push phase of the local instance.
#[derive(Debug, Clone)]
pub struct Outbound {
    db: Database,
    checkpoints: CheckpointStore,
    origin_system: String,
}

impl Outbound {
    pub fn new(db: Database, checkpoints: CheckpointStore, origin_system: impl Into<String>) -> Self {
        Outbound {
            db,
            checkpoints,
            origin_system: origin_system.into(),
        }
    }

    /// Builds the payload from the current unsynced rows.
    pub async fn collect(&self, sync_timestamp: DateTime<Utc>) -> SyncResult<PendingPush> {
        let sales = self.db.sales().unsynced().await?;
        let returns = self.db.returns().unsynced().await?;
        let since = self.checkpoints.read(Direction::Push).await?;
        let products = self.db.products().modified_since(since).await?;

        let payload = PushPayload {
            sales: sales
                .iter()
                .map(|s| SaleRecord::from_local(s, &self.origin_system))
                .collect(),
            returns: returns
                .iter()
                .map(|r| ReturnRecord::from_local(r, &self.origin_system))
                .collect(),
            stock_updates: products.iter().map(StockUpdate::from).collect(),
            sync_timestamp,
        };

        Ok(PendingPush {
            payload,
            sale_ids: sales.into_iter().map(|s| s.sale.id).collect(),
            return_ids: returns.into_iter().map(|r| r.sale_return.id).collect(),
        })
    }

    /// Runs one push. An empty payload is still sent.
    pub async fn push(&self, client: &RemoteClient) -> SyncResult<PushReport> {
        let result = self.try_push(client).await;

        let logged = match &result {
            Ok(report) => {
                self.db
                    .sync_logs()
                    .record_success(SyncPhase::Push, report.records() as i64, report)
                    .await
            }
            Err(e) => {
                error!(
                    error = %e,
                    retryable = e.is_retryable(),
                    needs_operator = e.is_config_error() || e.is_auth_error(),
                    "Push failed"
                );
                self.db
                    .sync_logs()
                    .record_failure(SyncPhase::Push, &e.to_string())
                    .await
            }
        };
        if let Err(log_err) = logged {
            warn!(error = %log_err, "Push outcome not logged");
        }

        result
    }

    async fn try_push(&self, client: &RemoteClient) -> SyncResult<PushReport> {
        let started_at = Utc::now();
        let pending = self.collect(started_at).await?;

        let remote = client.push(&pending.payload).await?;

        let sales = self.db.sales().mark_synced(&pending.sale_ids).await?;
        let returns = self.db.returns().mark_synced(&pending.return_ids).await?;
        self.checkpoints.advance(Direction::Push, started_at).await?;

        info!(
            sales,
            returns,
            stock_updates = pending.payload.stock_updates.len(),
            remote_sales_created = remote.sales_created,
            remote_sales_skipped = remote.sales_skipped,
            "Push complete"
        );

        Ok(PushReport {
            sales,
            returns,
            stock_updates: pending.payload.stock_updates.len() as u64,
            remote,
        })
    }
}
