// Database Backup
// Checkpoints a live database and copies it to a timestamped file under the meta directory

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::audit::{append_backup_record, BackupRecord};
use super::path::CanonicalPath;
use super::pool::ConnectionPool;
use super::traits::DatabaseError;

/// Result of a backup request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<BackupRecord>,
}

impl BackupOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            path: None,
            message: Some(message.into()),
            record: None,
        }
    }
}

/// `<stem>_backup_<ISO timestamp with ':' and '.' replaced>.duckdb`
pub fn backup_file_name(source: &Path, at: DateTime<Utc>) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "database".to_string());
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}_backup_{}.duckdb", stem, stamp)
}

pub struct BackupService {
    pool: Arc<ConnectionPool>,
}

impl BackupService {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Back up `filename`. Never errors; failures are reported in the outcome.
    pub async fn backup(&self, filename: &str) -> BackupOutcome {
        let filename = filename.trim();
        if filename.is_empty() {
            return BackupOutcome::failed("Backup failed: Cannot backup in-memory database");
        }

        let source = self.pool.resolve(Some(filename)).await;
        if source.is_memory() {
            return BackupOutcome::failed("Backup failed: Cannot backup in-memory database");
        }

        match self.copy_database(&source).await {
            Ok((backup_path, size_bytes)) => {
                let record = BackupRecord::completed(&backup_path, size_bytes, Utc::now());
                self.record(&source, &record).await;
                info!("[Backup] {} -> {} ({} bytes)", source, backup_path, size_bytes);
                BackupOutcome {
                    success: true,
                    path: Some(backup_path),
                    message: None,
                    record: Some(record),
                }
            }
            Err(e) => {
                warn!("[Backup] {} failed: {}", source, e);
                BackupOutcome::failed(format!("Backup failed: {}", e.message()))
            }
        }
    }

    async fn copy_database(&self, source: &CanonicalPath) -> Result<(String, u64), DatabaseError> {
        if !tokio::fs::try_exists(source.as_path()).await.unwrap_or(false) {
            return Err(DatabaseError::InvalidConfig(format!(
                "Database file not found: {}",
                source
            )));
        }

        let meta_dir = self.pool.resolver().meta_dir();
        tokio::fs::create_dir_all(&meta_dir).await?;
        let destination = meta_dir.join(backup_file_name(source.as_path(), Utc::now()));

        // Flush the WAL so the main file is self-contained
        let handle = self.pool.acquire(source).await?;
        handle
            .run(|conn| {
                conn.execute_batch("CHECKPOINT")?;
                Ok(())
            })
            .await?;

        tokio::fs::copy(source.as_path(), &destination).await?;
        let size_bytes = tokio::fs::metadata(&destination).await?.len();

        Ok((destination.to_string_lossy().to_string(), size_bytes))
    }

    /// Best-effort audit row in the source database
    async fn record(&self, source: &CanonicalPath, record: &BackupRecord) {
        let result = match self.pool.acquire(source).await {
            Ok(handle) => {
                let record = record.clone();
                handle.run(move |conn| append_backup_record(conn, &record)).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("[Backup] Could not record backup of {}: {}", source, e);
        }
    }
}
