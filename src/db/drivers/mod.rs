// Database Drivers
// Engine-specific connection handles and value conversion

pub mod duckdb;

// Re-export driver types
pub use self::duckdb::{read_rows, DuckDbConnection};
