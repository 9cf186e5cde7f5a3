//! # stockbridge-sync: Sync Engine for Stockbridge
//!
//! Moves sales and returns from a store's local instance to its cloud
//! replica, and catalog changes back.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Two-Instance Topology                           │
//! │                                                                         │
//! │   LOCAL (stock authority)                 CLOUD (reporting replica)     │
//! │  ┌──────────────────────────┐            ┌──────────────────────────┐  │
//! │  │ SyncAgent                │            │ SyncServer               │  │
//! │  │                          │   push     │                          │  │
//! │  │  Outbound ───────────────┼───────────►│ /sync/receive ─► Receiver│  │
//! │  │  (unsynced sales,        │  SyncToken │  (dedup by timestamp,    │  │
//! │  │   returns, stock snap)   │            │   one transaction)       │  │
//! │  │                          │   pull     │                          │  │
//! │  │  Reconciler ◄────────────┼────────────┤ /sync/master-data        │  │
//! │  │  (LWW, stock untouched)  │            │  (export since)          │  │
//! │  │                          │            │                          │  │
//! │  │  CheckpointStore         │            │ /sync/status             │  │
//! │  │  last_push, last_pull    │            │ /sync/trigger (admin)    │  │
//! │  └──────────────────────────┘            └──────────────────────────┘  │
//! │                                                                         │
//! │  Stock moves only through the local ledger. The cloud's stock column   │
//! │  is a display value overwritten by newer snapshots.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `SyncAgent` orchestrator, status, scheduler
//! - [`auth`] - `SyncToken` / `Bearer` header checks
//! - [`checkpoint`] - Per-direction checkpoint files
//! - [`client`] - HTTP client for the remote instance
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Sync error types and HTTP mapping
//! - [`inbound`] - Batch receiver (cloud side)
//! - [`outbound`] - Push phase (local side)
//! - [`protocol`] - JSON bodies on the wire
//! - [`reconcile`] - Master-data export and merge
//! - [`server`] - Axum router and server
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockbridge_sync::{SyncAgent, SyncConfig};
//! use stockbridge_db::{Database, DbConfig};
//!
//! let config = SyncConfig::load(None)?;
//! let db = Database::new(DbConfig::new(&config.storage.database_path)).await?;
//!
//! let agent = SyncAgent::new(config, db)?;
//! let report = agent.full_sync().await;
//! println!("pushed {} records", report.push.records);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod auth;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod protocol;
pub mod reconcile;
pub mod server;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{SyncAgent, SyncStatus};
pub use checkpoint::{CheckpointStore, Direction};
pub use client::RemoteClient;
pub use config::{InstanceRole, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use inbound::Receiver;
pub use outbound::{Outbound, PendingPush, PushReport};
pub use protocol::{
    CycleReport, MasterDataQuery, MasterDataResponse, PhaseReport, PushPayload, ReceiveResponse,
};
pub use reconcile::{export_master_data, PullReport, Reconciler};
pub use server::{router, ServerHandle, SyncServer};
