//! # Sync Agent
//!
//! Orchestrates push and pull for one instance and answers status queries.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SyncAgent::full_sync                            │
//! │                                                                         │
//! │   ┌──────────┐   result    ┌──────────┐   result                       │
//! │   │   Push   │ ──────────► │   Pull   │ ──────────► CycleReport        │
//! │   │ outbound │  (ignored   │ reconcile│             { push, pull,      │
//! │   └──────────┘  by pull)   └──────────┘               timestamp }      │
//! │                                                                         │
//! │   Triggered by:                                                        │
//! │   • run_scheduled (every `schedule.interval_secs`)                     │
//! │   • POST /sync/trigger (admin token)                                   │
//! │   • `stockbridge sync`                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed phase never rolls back the other one. [`SyncStatus::last_error`]
//! reports this process's last failure, or the newest logged phase when it
//! failed, so a fresh `stockbridge status` still sees it. A later success
//! clears it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use stockbridge_db::Database;

use crate::checkpoint::{CheckpointStore, Direction};
use crate::client::RemoteClient;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::inbound::Receiver;
use crate::outbound::{Outbound, PushReport};
use crate::protocol::{CycleReport, PhaseReport};
use crate::reconcile::{PullReport, Reconciler};

// =============================================================================
// Sync Status
// =============================================================================

/// Body of `GET /sync/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// Remote URL and shared secret are both set.
    pub cloud_configured: bool,

    /// Last successful push.
    pub last_sync: Option<DateTime<Utc>>,

    /// Last successful pull, on the remote clock.
    pub last_pull: Option<DateTime<Utc>>,

    pub pending_sales: i64,
    pub pending_returns: i64,

    pub is_local_server: bool,

    pub last_error: Option<String>,
}

// =============================================================================
// Sync Agent
// =============================================================================

#[derive(Debug, Clone)]
pub struct SyncAgent {
    config: Arc<SyncConfig>,
    db: Database,
    checkpoints: CheckpointStore,

    /// Present on a local instance with a configured remote.
    client: Option<RemoteClient>,

    last_error: Arc<RwLock<Option<String>>>,
}

impl SyncAgent {
    /// Creates an agent. Fails only when the remote section is unusable.
    pub fn new(config: SyncConfig, db: Database) -> SyncResult<Self> {
        let client = if config.role().is_local() && config.is_cloud_configured() {
            Some(RemoteClient::from_config(&config)?)
        } else {
            None
        };

        let checkpoints = CheckpointStore::new(config.storage.checkpoint_dir.clone());

        info!(
            role = %config.role(),
            instance = %config.instance_name(),
            cloud_configured = client.is_some(),
            "Sync agent created"
        );

        Ok(SyncAgent {
            config: Arc::new(config),
            db,
            checkpoints,
            client,
            last_error: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Cloud-side batch handler.
    pub fn receiver(&self) -> Receiver {
        Receiver::new(self.db.clone())
    }

    fn remote(&self) -> SyncResult<&RemoteClient> {
        if !self.config.role().is_local() {
            return Err(SyncError::InvalidConfig(
                "push and pull run on the local instance only".into(),
            ));
        }
        self.client.as_ref().ok_or(SyncError::NotConfigured("Cloud sync"))
    }

    /// Sends pending sales and returns to the cloud.
    pub async fn push(&self) -> SyncResult<PushReport> {
        let client = self.remote()?;
        Outbound::new(self.db.clone(), self.checkpoints.clone(), self.config.instance_name())
            .push(client)
            .await
    }

    /// Fetches and merges catalog changes from the cloud.
    pub async fn pull(&self) -> SyncResult<PullReport> {
        let client = self.remote()?;
        Reconciler::new(self.db.clone(), self.checkpoints.clone())
            .pull(client)
            .await
    }

    /// Runs push then pull. Each phase is attempted regardless of the other.
    pub async fn full_sync(&self) -> CycleReport {
        let push = self.push().await;
        let pull = self.pull().await;

        let error = push
            .as_ref()
            .err()
            .map(|e| format!("push: {e}"))
            .or_else(|| pull.as_ref().err().map(|e| format!("pull: {e}")));
        *self.last_error.write().await = error;

        let report = CycleReport {
            push: phase_report(&push, PushReport::records),
            pull: phase_report(&pull, PullReport::records),
            timestamp: Utc::now(),
        };

        info!(
            push_ok = report.push.success,
            pushed = report.push.records,
            pull_ok = report.pull.success,
            pulled = report.pull.records,
            "Sync cycle finished"
        );
        report
    }

    /// Records the outcome of a single-phase run for status reporting.
    pub async fn remember<T>(&self, result: &SyncResult<T>) {
        *self.last_error.write().await = result.as_ref().err().map(|e| e.to_string());
    }

    pub async fn status(&self) -> SyncResult<SyncStatus> {
        Ok(SyncStatus {
            cloud_configured: self.config.is_cloud_configured(),
            last_sync: self.checkpoints.read(Direction::Push).await?,
            last_pull: self.checkpoints.read(Direction::Pull).await?,
            pending_sales: self.db.sales().count_unsynced().await?,
            pending_returns: self.db.returns().count_unsynced().await?,
            is_local_server: self.config.role().is_local(),
            last_error: self.last_error().await?,
        })
    }

    async fn last_error(&self) -> SyncResult<Option<String>> {
        if let Some(error) = self.last_error.read().await.clone() {
            return Ok(Some(error));
        }

        let newest = self.db.sync_logs().recent(1).await?.into_iter().next();
        Ok(newest.filter(|entry| !entry.success).map(|entry| {
            let message = entry.error_message.unwrap_or_else(|| "unknown error".to_string());
            format!("{}: {}", entry.phase, message)
        }))
    }

    /// Runs a cycle immediately and then every `every`, until `shutdown` resolves.
    ///
    /// A running cycle is finished before the loop stops.
    pub async fn run_scheduled<F>(&self, every: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = every.as_secs(), "Scheduled sync started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.full_sync().await;
                    if !report.push.success || !report.pull.success {
                        warn!(
                            push_error = ?report.push.error,
                            pull_error = ?report.pull.error,
                            "Sync cycle incomplete, retrying next interval"
                        );
                    }
                }
                _ = &mut shutdown => {
                    info!("Scheduled sync stopping");
                    break;
                }
            }
        }
    }
}

fn phase_report<T>(result: &SyncResult<T>, records: impl Fn(&T) -> u64) -> PhaseReport {
    match result {
        Ok(value) => PhaseReport {
            success: true,
            records: records(value),
            error: None,
        },
        Err(e) => PhaseReport {
            success: false,
            records: 0,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstanceRole;
    use stockbridge_core::{MovementMeta, MovementType, NewProduct, PaymentMethod, SyncPhase};
    use stockbridge_db::{DbConfig, SaleLine};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.storage.checkpoint_dir = dir.path().to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_status_counts_pending() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.products().insert(&NewProduct::new("A", "Milk", 500)).await.unwrap();
        db.ledger()
            .record_movement("A", MovementType::In, 5, MovementMeta::default())
            .await
            .unwrap();
        db.sales()
            .create_sale(None, PaymentMethod::Cash, &[SaleLine::new("A", 1)])
            .await
            .unwrap();

        let dir = TempDir::new().unwrap();
        let agent = SyncAgent::new(config(&dir), db).unwrap();
        let status = agent.status().await.unwrap();

        assert!(!status.cloud_configured);
        assert!(status.is_local_server);
        assert_eq!(status.pending_sales, 1);
        assert_eq!(status.pending_returns, 0);
        assert!(status.last_sync.is_none());
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_cycle_reports_both_phases() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let dir = TempDir::new().unwrap();
        let agent = SyncAgent::new(config(&dir), db).unwrap();

        let report = agent.full_sync().await;
        assert!(!report.push.success);
        assert!(!report.pull.success);
        assert!(report.push.error.unwrap().contains("not configured"));

        let status = agent.status().await.unwrap();
        assert!(status.last_error.unwrap().starts_with("push:"));
    }

    #[tokio::test]
    async fn test_cloud_instance_does_not_push() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.instance.role = InstanceRole::Cloud;
        config.remote.url = Some("http://127.0.0.1:1".into());
        config.remote.shared_secret = Some("s".into());

        let agent = SyncAgent::new(config, db).unwrap();
        assert!(agent.push().await.unwrap_err().is_config_error());
        assert!(!agent.status().await.unwrap().is_local_server);
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_shutdown() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let dir = TempDir::new().unwrap();
        let agent = SyncAgent::new(config(&dir), db).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let runner = agent.clone();
        let task = tokio::spawn(async move {
            runner
                .run_scheduled(Duration::from_secs(3600), async {
                    let _ = rx.await;
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        // The immediate first cycle ran and failed
        assert!(agent.status().await.unwrap().last_error.is_some());
    }

    #[tokio::test]
    async fn test_last_error_read_back_from_sync_log() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let dir = TempDir::new().unwrap();

        db.sync_logs()
            .record_failure(SyncPhase::Push, "Connection failed: refused")
            .await
            .unwrap();
        let restarted = SyncAgent::new(config(&dir), db.clone()).unwrap();
        assert_eq!(
            restarted.status().await.unwrap().last_error.as_deref(),
            Some("push: Connection failed: refused")
        );

        tokio::time::sleep(Duration::from_millis(5)).await;
        db.sync_logs()
            .record_success(SyncPhase::Pull, 3, &serde_json::json!({ "products_updated": 3 }))
            .await
            .unwrap();
        let restarted = SyncAgent::new(config(&dir), db).unwrap();
        assert!(restarted.status().await.unwrap().last_error.is_none());
    }
}
