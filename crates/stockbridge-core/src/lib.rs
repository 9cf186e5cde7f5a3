//! # stockbridge-core: Pure Domain Logic for Stockbridge
//!
//! Types and rules shared by both instances of a store: the local
//! point-of-sale database and its cloud replica.
//!
//! ## Where It Sits
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockbridge Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/stockbridge (CLI)                          │   │
//! │  │         sync ─ serve ─ status ─ watch                           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 stockbridge-sync (engine)                       │   │
//! │  │   push client, receiver, master data, checkpoints, HTTP server  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               stockbridge-db (SQLite)                           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ stockbridge-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌────────────┐     │   │
//! │  │   │  types   │  │  ledger  │  │ conflict │  │ validation │     │   │
//! │  │   │  money   │  │  rules   │  │   LWW    │  │   rules    │     │   │
//! │  │   └──────────┘  └──────────┘  └──────────┘  └────────────┘     │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, StockMovement, Sale, SaleReturn, ...)
//! - [`ledger`] - Stock transition rules for IN/OUT/ADJUST/RETURN
//! - [`conflict`] - Last-writer-wins resolution
//! - [`money`] - Integer money and tax math
//! - [`validation`] - Field validation
//! - [`error`] - `CoreError` and `ValidationError`

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod error;
pub mod ledger;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports
// =============================================================================

pub use conflict::{last_writer_wins, Resolution};
pub use error::{CoreError, CoreResult, ValidationError};
pub use ledger::Transition;
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Tax rate applied to products created without one (20%).
pub const DEFAULT_TAX_RATE_BPS: u32 = 2000;

/// Low-stock threshold for products created without one.
pub const DEFAULT_MIN_STOCK: i64 = 5;

/// Largest quantity accepted on a single sale or return line.
pub const MAX_LINE_QUANTITY: i64 = 9_999;

/// Generates a new row id.
///
/// Row ids are local to one database; instances match rows by natural key.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
