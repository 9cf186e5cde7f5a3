//! # Sync Checkpoints
//!
//! One file per direction holding the RFC 3339 timestamp of the last
//! successful cycle.
//!
//! ```text
//! <checkpoint_dir>/
//! ├── last_push    2026-03-14T09:12:44.120Z
//! └── last_pull    2026-03-14T09:12:45.002Z   (remote clock)
//! ```
//!
//! A missing file means "never synced". Writes go to a temporary file that
//! is then renamed over the old one, so a crash never leaves half a
//! timestamp behind.

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Sync direction a checkpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Pull,
}

impl Direction {
    fn file_name(self) -> &'static str {
        match self {
            Direction::Push => "last_push",
            Direction::Pull => "last_pull",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Push => write!(f, "push"),
            Direction::Pull => write!(f, "pull"),
        }
    }
}

/// File-backed checkpoint store.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CheckpointStore { dir: dir.into() }
    }

    pub fn path(&self, direction: Direction) -> PathBuf {
        self.dir.join(direction.file_name())
    }

    /// Reads the checkpoint. `None` when the direction never succeeded.
    ///
    /// A file that does not hold a timestamp is treated like a missing one:
    /// the next push resends every unsynced row anyway, and the next pull
    /// fetches the full catalog.
    pub async fn read(&self, direction: Direction) -> SyncResult<Option<DateTime<Utc>>> {
        let path = self.path(direction);

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::CheckpointFailed(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        match DateTime::parse_from_rfc3339(contents.trim()) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable checkpoint ignored");
                Ok(None)
            }
        }
    }

    /// Persists a new checkpoint. Call only after the cycle fully succeeded.
    pub async fn advance(&self, direction: Direction, at: DateTime<Utc>) -> SyncResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| checkpoint_error(&self.dir, e))?;

        let path = self.path(direction);
        let tmp = path.with_extension("tmp");

        fs::write(&tmp, at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .await
            .map_err(|e| checkpoint_error(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| checkpoint_error(&path, e))?;

        debug!(direction = %direction, at = %at, "Checkpoint advanced");
        Ok(())
    }
}

fn checkpoint_error(path: &Path, err: std::io::Error) -> SyncError {
    SyncError::CheckpointFailed(format!("cannot write {}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_checkpoint_means_never_synced() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.read(Direction::Push).await.unwrap().is_none());
        assert!(store.read(Direction::Pull).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_advance_and_read_per_direction() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested"));

        let push_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 12, 44).unwrap();
        store.advance(Direction::Push, push_at).await.unwrap();

        assert_eq!(store.read(Direction::Push).await.unwrap(), Some(push_at));
        assert!(store.read(Direction::Pull).await.unwrap().is_none());
        assert!(!store.path(Direction::Push).with_extension("tmp").exists());

        let later = push_at + chrono::Duration::minutes(5);
        store.advance(Direction::Push, later).await.unwrap();
        assert_eq!(store.read(Direction::Push).await.unwrap(), Some(later));
    }

    #[tokio::test]
    async fn test_garbage_checkpoint_ignored() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        std::fs::write(store.path(Direction::Pull), "yesterday-ish").unwrap();
        assert!(store.read(Direction::Pull).await.unwrap().is_none());
    }
}
