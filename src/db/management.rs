// Database File Management
// Open-with-verification, connection info, explicit close and upload import

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::discovery;
use super::path::{CanonicalPath, MEMORY_PATH};
use super::pool::ConnectionPool;
use super::traits::TableDescriptor;

/// Name used when an uploaded file has no usable name
pub const DEFAULT_UPLOAD_NAME: &str = "database.duckdb";

/// Extensions accepted for uploaded database files
pub const ALLOWED_EXTENSIONS: [&str; 2] = [".duckdb", ".db"];

/// Result of opening a database file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<TableDescriptor>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Current connection status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub connected: bool,
    pub path: String,
}

/// Result of a successful upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub success: bool,
    pub filename: String,
    pub path: String,
}

/// Upload errors
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Only .duckdb or .db files are allowed")]
    InvalidExtension,

    #[error("Invalid DuckDB database file: {0}")]
    InvalidDatabase(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open (or create) a database file and report what it contains.
///
/// Any pooled connection to the same file is dropped first so the file is
/// read fresh from disk.
pub async fn open_database(pool: &ConnectionPool, filename: &str) -> OpenOutcome {
    let path = pool.resolve(Some(filename)).await;
    pool.close(Some(&path)).await;

    let is_new = !path.is_memory()
        && !tokio::fs::try_exists(path.as_path()).await.unwrap_or(false);

    match pool.acquire(&path).await {
        Ok(handle) => {
            let tables = discovery::list_tables(&handle).await;
            info!("[Manage] Opened {} (new: {}, {} table(s))", path, is_new, tables.len());
            OpenOutcome {
                success: true,
                path: Some(path.to_string()),
                is_new: Some(is_new),
                table_count: Some(tables.len()),
                tables: Some(tables),
                warning: None,
                message: None,
            }
        }
        Err(e) => {
            warn!("[Manage] Failed to open {}: {}", path, e);
            OpenOutcome {
                success: false,
                path: Some(path.to_string()),
                is_new: None,
                table_count: None,
                tables: None,
                warning: None,
                message: Some(format!("Failed to open database: {}", e.message())),
            }
        }
    }
}

pub async fn database_info(pool: &ConnectionPool) -> DatabaseInfo {
    DatabaseInfo {
        connected: !pool.is_empty().await,
        path: pool
            .active_path()
            .await
            .map(|p| p.to_string())
            .unwrap_or_else(|| MEMORY_PATH.to_string()),
    }
}

/// Close `filename` (default: the active database)
pub async fn close_database(pool: &ConnectionPool, filename: Option<&str>) -> bool {
    let path = pool.resolve(filename).await;
    pool.close(Some(&path)).await
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        DEFAULT_UPLOAD_NAME.to_string()
    } else {
        cleaned
    }
}

pub fn validate_extension(filename: &str) -> Result<(), UploadError> {
    let lower = filename.to_ascii_lowercase();
    if ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        Ok(())
    } else {
        Err(UploadError::InvalidExtension)
    }
}

/// Store uploaded bytes under the data directory and verify they open as a database
pub async fn import_upload(
    pool: &ConnectionPool,
    original_name: &str,
    bytes: &[u8],
) -> Result<UploadOutcome, UploadError> {
    let filename = sanitize_filename(original_name);
    validate_extension(&filename)?;

    let data_dir = pool.resolver().data_dir().to_path_buf();
    tokio::fs::create_dir_all(&data_dir).await?;

    let staged = data_dir.join(format!(".upload-{}.tmp", uuid::Uuid::new_v4()));
    stage_upload(&staged, bytes).await?;

    let target = pool.resolve(Some(&filename)).await;
    pool.close(Some(&target)).await;

    if let Err(e) = tokio::fs::rename(&staged, target.as_path()).await {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(e.into());
    }

    match pool.acquire(&target).await {
        Ok(_) => {
            info!("[Manage] Imported upload {} ({} bytes)", target, bytes.len());
            Ok(UploadOutcome {
                success: true,
                filename,
                path: target.to_string(),
            })
        }
        Err(e) => {
            warn!("[Manage] Rejected upload {}: {}", target, e);
            remove_database_files(&target).await;
            Err(UploadError::InvalidDatabase(e.message()))
        }
    }
}

/// Write the uploaded bytes to `staged`, removing any partial file on failure
async fn stage_upload(staged: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Err(e) = tokio::fs::write(staged, bytes).await {
        if let Err(cleanup) = tokio::fs::remove_file(staged).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!("[Manage] Could not remove staged upload {}: {}", staged.display(), cleanup);
            }
        }
        return Err(e);
    }
    Ok(())
}

/// Delete a database file and its write-ahead log, ignoring missing files
async fn remove_database_files(path: &CanonicalPath) {
    let wal = PathBuf::from(format!("{}.wal", path));
    for file in [path.as_path().to_path_buf(), wal] {
        if let Err(e) = tokio::fs::remove_file(&file).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("[Manage] Could not remove {}: {}", file.display(), e);
            }
        }
    }
}
