//! Delivery statistics and their optional on-disk snapshot.
//!
//! Counters live in [`SessionStats`] and are mutated only by the owning
//! session. A [`StatsSnapshot`] is the read-only view handed out to callers;
//! [`StatsFile`] persists the final snapshot when a session closes.
//!
//! # Example
//!
//! ```rust,no_run
//! use translation_publisher::stats::{SessionStats, StatsFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = StatsFile::new("publisher-stats.json");
//!
//!     if let Some(previous) = file.load().await? {
//!         println!("Last session sent {} events", previous.events_sent);
//!     }
//!
//!     let stats = SessionStats::default();
//!     file.save(&stats.snapshot()).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Running counters for one publisher session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Records successfully delivered
    pub events_sent: u64,
    /// Batches successfully flushed
    pub batches_sent: u64,
    /// Failing batches plus records that could not be batched
    pub errors: u64,
    /// Set when the connection is established
    pub start_time: Option<DateTime<Utc>>,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_sent: u64,
    pub batches_sent: u64,
    pub errors: u64,
    pub start_time: Option<DateTime<Utc>>,
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Seconds between `start_time` and `taken_at`, zero if never connected
    pub duration_secs: f64,
}

impl SessionStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let taken_at = Utc::now();
        let duration_secs = self
            .start_time
            .map(|start| (taken_at - start).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        StatsSnapshot {
            events_sent: self.events_sent,
            batches_sent: self.batches_sent,
            errors: self.errors,
            start_time: self.start_time,
            taken_at,
            duration_secs,
        }
    }
}

impl StatsSnapshot {
    pub fn log(&self) {
        info!(
            events_sent = self.events_sent,
            batches_sent = self.batches_sent,
            errors = self.errors,
            duration_secs = self.duration_secs,
            "Session stats"
        );
    }
}

/// Writes stats snapshots to disk atomically.
///
/// The snapshot is written to a temporary file, synced, then renamed over the
/// target, so readers never observe a partial file.
#[derive(Debug, Clone)]
pub struct StatsFile {
    file_path: PathBuf,
}

impl StatsFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file_path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Loads the last saved snapshot, `None` if no file exists yet.
    pub async fn load(&self) -> Result<Option<StatsSnapshot>> {
        if !self.file_path.exists() {
            debug!("No stats file found at {:?}", self.file_path);
            return Ok(None);
        }

        let content = fs::read_to_string(&self.file_path).await.map_err(|e| {
            error!("Failed to read stats file: {}", e);
            Error::Io(e)
        })?;

        serde_json::from_str::<StatsSnapshot>(&content)
            .map(Some)
            .map_err(|e| {
                error!("Failed to parse stats file: {}", e);
                Error::Serialization(e)
            })
    }

    pub async fn save(&self, snapshot: &StatsSnapshot) -> Result<()> {
        debug!("Saving stats snapshot to {:?}", self.file_path);

        let temp_path = self.file_path.with_extension("tmp");

        let json = serde_json::to_string_pretty(snapshot)?;
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.file_path).await?;

        debug!("Stats snapshot saved");
        Ok(())
    }
}
