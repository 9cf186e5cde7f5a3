//! # stockbridge-db: Database Layer for Stockbridge
//!
//! SQLite storage shared by both instances of a store. The same schema
//! serves the local point-of-sale database and the cloud replica; only the
//! repositories each side calls differ.
//!
//! ## Where It Sits
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockbridge Data Flow                            │
//! │                                                                         │
//! │  stockbridge-sync (push / receive / master data)                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockbridge-db (THIS CRATE)                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ LedgerRepo     │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ SaleRepo       │    │ 001_initial_ │  │   │
//! │  │   │ ledger lock   │    │ ReturnRepo     │    │   schema.sql │  │   │
//! │  │   │               │    │ SyncTransaction│    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (WAL)                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - `Database` handle, `DbConfig`, ledger lock
//! - [`migrations`] - Schema shipped inside the binary
//! - [`error`] - `DbError` and sqlx mapping
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockbridge_db::{Database, DbConfig, SaleLine};
//! use stockbridge_core::PaymentMethod;
//!
//! let db = Database::new(DbConfig::new("store.db")).await?;
//!
//! let sale = db
//!     .sales()
//!     .create_sale(None, PaymentMethod::Cash, &[SaleLine::new("6111245590012", 2)])
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repositories
pub use repository::catalog::{CatalogRepository, SupplierDetails};
pub use repository::ledger::LedgerRepository;
pub use repository::product::ProductRepository;
pub use repository::sale::{SaleLine, SaleRepository, SaleWithItems};
pub use repository::sale_return::{ReturnLine, ReturnRepository, ReturnWithItems};
pub use repository::sync_log::SyncLogRepository;
pub use repository::sync_tx::{
    ImportedReturn, ImportedReturnItem, ImportedSale, ImportedSaleItem, MasterProduct, MergeOutcome,
    StockReferenceOutcome, SyncTransaction,
};
pub use repository::user::UserRepository;
