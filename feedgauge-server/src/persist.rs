//! Durable storage: bounded-history snapshots and the rotating sample log.

use std::path::{Path, PathBuf};

use chrono::Utc;
use feedgauge_types::{iso_now, HistoryView, StatsReport};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Persistence failures. All of them are recoverable: callers log and keep
/// serving from memory.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One line of the rotating sample log: the raw ingestion payload stamped
/// with the server's own receive time.
#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    timestamp: String,
    #[serde(flatten)]
    report: &'a StatsReport,
}

/// Loads bounded history at startup and writes it back on a cadence and at
/// shutdown; separately appends every raw report to a size-rotated log.
#[derive(Debug)]
pub struct PersistenceManager {
    snapshot_path: PathBuf,
    log_path: PathBuf,
    max_log_bytes: u64,
}

impl PersistenceManager {
    /// Store the snapshot as `history.json` and the sample log under
    /// `logs/samples.log` inside `data_dir`.
    pub fn new(data_dir: &Path, max_log_bytes: u64) -> Self {
        Self {
            snapshot_path: data_dir.join("history.json"),
            log_path: data_dir.join("logs").join("samples.log"),
            max_log_bytes,
        }
    }

    /// Read the persisted history, if any exists yet.
    pub async fn load(&self) -> Result<Option<HistoryView>, PersistError> {
        let raw = match tokio::fs::read(&self.snapshot_path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let history = serde_json::from_slice(&raw)?;
        info!(path = %self.snapshot_path.display(), "loaded persisted history");
        Ok(Some(history))
    }

    /// Overwrite the persisted history. The write goes to a temporary file
    /// first and is renamed into place, so a crash mid-write leaves the
    /// previous snapshot intact.
    pub async fn save(&self, history: &HistoryView) -> Result<(), PersistError> {
        if let Some(parent) = self.snapshot_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec(history)?;
        let tmp_path = self.snapshot_path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, &self.snapshot_path).await?;
        debug!(path = %self.snapshot_path.display(), bytes = json.len(), "history saved");
        Ok(())
    }

    /// Append one raw report to the sample log, rotating first if the log
    /// has grown past the configured threshold.
    pub async fn append_log(&self, report: &StatsReport) -> Result<(), PersistError> {
        if let Some(parent) = self.log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.rotate_if_needed().await?;

        let record = LogRecord {
            timestamp: iso_now(),
            report,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn rotate_if_needed(&self) -> Result<(), PersistError> {
        let size = match tokio::fs::metadata(&self.log_path).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if size <= self.max_log_bytes {
            return Ok(());
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let rotated = self.log_path.with_file_name(format!("samples-{stamp}.log"));
        tokio::fs::rename(&self.log_path, &rotated).await?;
        info!(rotated = %rotated.display(), bytes = size, "sample log rotated");
        Ok(())
    }

    /// Path the snapshot is written to.
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Path of the active sample log.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
