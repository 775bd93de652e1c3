// Explorer Configuration
// Runtime settings for the pool, timeouts, uploads and the HTTP listener

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::path::META_DIR;
use crate::db::PoolSettings;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "DB_DATA_DIR";

/// Upload size cap (100 MB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    /// Base directory for database files; backups live in `<data_dir>/meta`
    pub data_dir: PathBuf,
    pub max_pool_size: usize,
    pub idle_timeout: Duration,
    pub exclusive_active_database: bool,
    pub open_timeout: Duration,
    pub query_timeout: Duration,
    pub max_upload_bytes: usize,
    pub host: String,
    pub port: u16,
    /// Pre-built UI to serve for non-API paths
    pub static_dir: Option<PathBuf>,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_pool_size: 10,
            idle_timeout: Duration::from_secs(15 * 60),
            exclusive_active_database: true,
            open_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(300),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            host: "127.0.0.1".to_string(),
            port: 3000,
            static_dir: None,
        }
    }
}

impl ExplorerConfig {
    /// Relative directories are anchored to the current working directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            data_dir: std::path::absolute(&data_dir).unwrap_or(data_dir),
            ..Self::default()
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            data_dir: self.data_dir.clone(),
            max_pool_size: self.max_pool_size,
            idle_timeout: self.idle_timeout,
            exclusive_active_database: self.exclusive_active_database,
            open_timeout: self.open_timeout,
        }
    }

    /// Create the data directory and its backup subdirectory
    pub fn prepare_data_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.data_dir.join(META_DIR))
    }
}

/// `$DB_DATA_DIR` (relative values resolved against the cwd), else `./data`
pub fn default_data_dir() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    data_dir_from(std::env::var(DATA_DIR_ENV).ok().as_deref(), &cwd)
}

fn data_dir_from(value: Option<&str>, cwd: &Path) -> PathBuf {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(dir) => cwd.join(dir),
        None => cwd.join("data"),
    }
}
