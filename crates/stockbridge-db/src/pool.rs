//! # Database Handle
//!
//! Opens the SQLite store of one instance and hands out repositories.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Database                                   │
//! │                                                                         │
//! │  DbConfig { path, pool bounds, busy timeout }                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new ── open (WAL, foreign keys) ── migrate                  │
//! │       │                                                                 │
//! │       ├── products() catalog() users() sync_logs()   plain reads/writes │
//! │       ├── ledger() sales() returns()                 share ledger_lock  │
//! │       └── begin_sync()                               one batch, one tx  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! WAL keeps `/sync/status` readable while a receive batch is writing.
//! The busy timeout lets the scheduler and the HTTP server write to the same
//! file without surfacing `SQLITE_BUSY`.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::catalog::CatalogRepository;
use crate::repository::ledger::LedgerRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::SaleRepository;
use crate::repository::sale_return::ReturnRepository;
use crate::repository::sync_log::SyncLogRepository;
use crate::repository::sync_tx::SyncTransaction;
use crate::repository::user::UserRepository;

/// Where a database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    /// Private to one connection; gone when it closes.
    Memory,
}

// =============================================================================
// Configuration
// =============================================================================

/// How to open an instance's store.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/stockbridge/store.db").max_connections(8);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    location: Location,

    pub max_connections: u32,

    /// How long a writer waits on a locked file before failing.
    pub busy_timeout: Duration,

    /// How long to wait for a free pooled connection.
    pub acquire_timeout: Duration,

    pub run_migrations: bool,
}

impl DbConfig {
    /// A file-backed store. Parent directories are created on open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            location: Location::File(path.into()),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(30),
            run_migrations: true,
        }
    }

    /// A private in-memory store on a single connection (tests).
    pub fn in_memory() -> Self {
        DbConfig {
            location: Location::Memory,
            max_connections: 1,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// File path, `None` for an in-memory store.
    pub fn path(&self) -> Option<&PathBuf> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = match &self.location {
            Location::Memory => SqliteConnectOptions::new().in_memory(true),
            Location::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        DbError::ConnectionFailed(format!("cannot create {}: {}", parent.display(), e))
                    })?;
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .journal_mode(SqliteJournalMode::Wal)
                    .create_if_missing(true)
            }
        };

        Ok(options
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout)
            .foreign_keys(true))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to one instance's store. Clones share the pool and the ledger lock.
///
/// ## Ledger Serialization
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  record_movement ─┐                                                     │
/// │  create_sale    ──┼──► ledger lock ──► BEGIN ─ read stock ─ insert     │
/// │  create_return  ──┘                     movement ─ update product ─    │
/// │                                         COMMIT                          │
/// │                                                                         │
/// │  Two writers can never read the same stock_before.                     │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,

    /// Held for the duration of every stock-changing transaction.
    ledger_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Opens the store and applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let options = config.connect_options()?;

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout);

        // The in-memory database lives exactly as long as its one connection.
        if config.location == Location::Memory {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        match config.path() {
            Some(path) => info!(path = %path.display(), max_connections = config.max_connections, "Database opened"),
            None => debug!("In-memory database opened"),
        }

        let db = Database {
            pool,
            ledger_lock: Arc::new(Mutex::new(())),
        };

        if config.run_migrations {
            migrations::run_migrations(&db.pool).await?;
        }

        Ok(db)
    }

    /// Raw pool, for queries no repository covers.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    /// Categories and suppliers.
    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    /// The stock ledger.
    ///
    /// ```rust,ignore
    /// let movement = db
    ///     .ledger()
    ///     .record_movement("6111245590012", MovementType::In, 24, MovementMeta::default())
    ///     .await?;
    /// ```
    pub fn ledger(&self) -> LedgerRepository {
        LedgerRepository::new(self.pool.clone(), self.ledger_lock.clone())
    }

    pub fn sales(&self) -> SaleRepository {
        SaleRepository::new(self.pool.clone(), self.ledger_lock.clone())
    }

    pub fn returns(&self) -> ReturnRepository {
        ReturnRepository::new(self.pool.clone(), self.ledger_lock.clone())
    }

    pub fn sync_logs(&self) -> SyncLogRepository {
        SyncLogRepository::new(self.pool.clone())
    }

    /// Opens a transaction for one inbound batch or one master-data apply.
    ///
    /// Dropping the returned value without calling `commit` rolls back.
    pub async fn begin_sync(&self) -> DbResult<SyncTransaction> {
        SyncTransaction::begin(&self.pool).await
    }

    pub async fn close(&self) {
        debug!("Closing database");
        self.pool.close().await;
    }

    /// True when a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);

        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert!(total > 0);
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_file_database_created_with_parents() {
        let dir = std::env::temp_dir().join(format!("stockbridge-db-{}", stockbridge_core::new_id()));
        let path = dir.join("nested").join("store.db");

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        assert!(db.health_check().await);
        assert!(path.exists());

        db.close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new("/tmp/store.db")
            .max_connections(10)
            .busy_timeout(Duration::from_secs(1))
            .run_migrations(false);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.busy_timeout, Duration::from_secs(1));
        assert!(!config.run_migrations);
        assert!(config.path().is_some());
        assert!(DbConfig::in_memory().path().is_none());
    }
}
