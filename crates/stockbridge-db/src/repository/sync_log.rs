//! # Sync Log Repository
//!
//! One row per executed sync phase, on both instances. This is what an
//! operator reads when pending counters stop going down.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use stockbridge_core::{new_id, SyncLogEntry, SyncPhase};

#[derive(Debug, Clone)]
pub struct SyncLogRepository {
    pool: SqlitePool,
}

impl SyncLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncLogRepository { pool }
    }

    /// Records a successful phase with its counters serialized as JSON.
    pub async fn record_success<D: Serialize>(
        &self,
        phase: SyncPhase,
        records_synced: i64,
        details: &D,
    ) -> DbResult<SyncLogEntry> {
        let details = serde_json::to_string(details)?;
        self.insert(phase, records_synced, true, Some(details), None).await
    }

    /// Records a failed phase.
    pub async fn record_failure(&self, phase: SyncPhase, error: &str) -> DbResult<SyncLogEntry> {
        self.insert(phase, 0, false, None, Some(error.to_string())).await
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<SyncLogEntry>> {
        let entries = sqlx::query_as::<_, SyncLogEntry>(
            r#"
            SELECT id, phase, records_synced, success, details, error_message, created_at
            FROM sync_logs
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Latest entry for one phase.
    pub async fn latest(&self, phase: SyncPhase) -> DbResult<Option<SyncLogEntry>> {
        let entry = sqlx::query_as::<_, SyncLogEntry>(
            r#"
            SELECT id, phase, records_synced, success, details, error_message, created_at
            FROM sync_logs
            WHERE phase = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(phase)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn insert(
        &self,
        phase: SyncPhase,
        records_synced: i64,
        success: bool,
        details: Option<String>,
        error_message: Option<String>,
    ) -> DbResult<SyncLogEntry> {
        let entry = SyncLogEntry {
            id: new_id(),
            phase,
            records_synced,
            success,
            details,
            error_message,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO sync_logs (id, phase, records_synced, success, details, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.phase)
        .bind(entry.records_synced)
        .bind(entry.success)
        .bind(&entry.details)
        .bind(&entry.error_message)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        debug!(phase = %phase, success, records_synced, "Sync log written");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use serde_json::json;
    use stockbridge_core::SyncPhase;

    #[tokio::test]
    async fn test_record_and_read_back() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let logs = db.sync_logs();

        logs.record_success(SyncPhase::Push, 3, &json!({ "sales": 2, "returns": 1 }))
            .await
            .unwrap();
        logs.record_failure(SyncPhase::Pull, "connection refused").await.unwrap();

        let recent = logs.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);

        let push = logs.latest(SyncPhase::Push).await.unwrap().unwrap();
        assert!(push.success);
        assert_eq!(push.records_synced, 3);
        let details: serde_json::Value = serde_json::from_str(push.details.as_deref().unwrap()).unwrap();
        assert_eq!(details["sales"], 2);

        let pull = logs.latest(SyncPhase::Pull).await.unwrap().unwrap();
        assert!(!pull.success);
        assert_eq!(pull.error_message.as_deref(), Some("connection refused"));

        assert!(logs.latest(SyncPhase::Receive).await.unwrap().is_none());
    }
}
