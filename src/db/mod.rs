// Database Module
// Connection lifecycle, table discovery, query execution and backups for DuckDB files

pub mod audit;
pub mod backup;
pub mod discovery;
pub mod drivers;
pub mod management;
pub mod path;
pub mod pool;
pub mod query;
pub mod reaper;
pub mod traits;

// ============================================================================
// Re-exports
// ============================================================================

pub use audit::{BackupRecord, QueryLogRecord};
pub use backup::{BackupOutcome, BackupService};
pub use discovery::{discover_tables, Introspect};
pub use drivers::DuckDbConnection;
pub use management::{DatabaseInfo, OpenOutcome, UploadError, UploadOutcome};
pub use path::{CanonicalPath, PathResolver, MEMORY_PATH};
pub use pool::{ConnectionPool, PoolSettings};
pub use query::QueryEngine;
pub use reaper::spawn_idle_reaper;
pub use traits::{CellValue, DatabaseError, RowObject, TableDescriptor, DEFAULT_TABLE};
