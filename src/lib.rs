// DuckDB Explorer
// Connection lifecycle manager for DuckDB files with a thin HTTP surface

// Module declarations
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod server;

pub use commands::AppState;
pub use config::ExplorerConfig;
pub use error::ApiError;
pub use server::{create_router, run_server, ServerArgs};
