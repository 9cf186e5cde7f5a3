//! # Conflict Resolution
//!
//! Last-writer-wins on the `updated_at` timestamp. Used for product stock
//! snapshots received on the cloud side and for master-data products
//! pulled on the local side.
//!
//! ```text
//!   existing.updated_at  vs  incoming.updated_at
//!   ───────────────────────────────────────────
//!          older         <        newer        → ApplyIncoming
//!          equal         =        equal        → KeepExisting
//!          newer         >        older        → KeepExisting
//! ```
//!
//! Ties keep the stored row, so replaying the same payload never writes.

use chrono::{DateTime, Utc};

/// Outcome of comparing two versions of the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    ApplyIncoming,
    KeepExisting,
}

impl Resolution {
    pub fn applies(&self) -> bool {
        matches!(self, Resolution::ApplyIncoming)
    }
}

/// Incoming wins only when strictly newer.
pub fn last_writer_wins(existing: DateTime<Utc>, incoming: DateTime<Utc>) -> Resolution {
    if incoming > existing {
        Resolution::ApplyIncoming
    } else {
        Resolution::KeepExisting
    }
}
