//! # Repository Module
//!
//! Database repository implementations for Stockbridge.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Who Writes What                                   │
//! │                                                                         │
//! │  Local instance                     Cloud instance                      │
//! │  ──────────────                     ──────────────                      │
//! │  db.ledger()   IN/OUT/ADJUST        db.begin_sync()                     │
//! │  db.sales()    sale + OUT lines       ├── imported sales               │
//! │  db.returns()  return + RETURN        ├── imported returns             │
//! │       │                               └── stock references (LWW)       │
//! │       │  (ledger lock held)                                             │
//! │       ▼                             db.products().modified_since(..)    │
//! │  db.begin_sync()                      └── master-data export           │
//! │    └── master-data merge (LWW,                                          │
//! │        never touches stock)                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Product catalog reads and inserts
//! - [`CatalogRepository`](catalog::CatalogRepository) - Categories and suppliers
//! - [`UserRepository`](user::UserRepository) - Users (natural key: username)
//! - [`LedgerRepository`](ledger::LedgerRepository) - Stock movements
//! - [`SaleRepository`](sale::SaleRepository) - Sales and their outbound state
//! - [`ReturnRepository`](sale_return::ReturnRepository) - Returns and their outbound state
//! - [`SyncLogRepository`](sync_log::SyncLogRepository) - Per-phase sync records
//! - [`SyncTransaction`](sync_tx::SyncTransaction) - Batch-scoped sync writes

pub mod catalog;
pub mod ledger;
pub mod product;
pub mod sale;
pub mod sale_return;
pub mod sync_log;
pub mod sync_tx;
pub mod user;

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::DbResult;

/// Opens a transaction that holds the write lock from its first statement.
///
/// A deferred transaction that reads and then writes fails with
/// `SQLITE_BUSY` under WAL once another connection commits in between;
/// `BEGIN IMMEDIATE` waits on the busy timeout instead.
pub(crate) async fn begin_write(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}
