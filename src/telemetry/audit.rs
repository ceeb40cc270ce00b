//! Snapshot records and the JSON-lines audit sink

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::connectivity::ConnectionState;
use super::decision::Evaluation;
use super::wire::Sample;

/// Timestamped decision snapshot emitted every decision interval
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRecord {
    pub timestamp: DateTime<Utc>,
    pub sample: Sample,
    pub decision: Evaluation,
    pub connection: ConnectionState,
}

impl SnapshotRecord {
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Appends snapshot records to a file, one JSON object per line
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume records until the sender side closes
    pub async fn run(self, mut rx: broadcast::Receiver<SnapshotRecord>) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        info!("Audit log writing to {}", self.path.display());

        loop {
            match rx.recv().await {
                Ok(record) => {
                    let line = match record.to_json_line() {
                        Ok(line) => line,
                        Err(e) => {
                            error!("Failed to serialize snapshot record: {}", e);
                            continue;
                        }
                    };
                    file.write_all(line.as_bytes()).await?;
                    file.flush().await?;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Audit log lagged, skipped {} snapshot records", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Snapshot channel closed, audit log stopping");
                    return Ok(());
                }
            }
        }
    }
}
