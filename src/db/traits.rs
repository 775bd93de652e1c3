// Shared Database Types
// Value, row, table and error types used by the pool, discovery, query and backup layers

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Name of the table seeded into in-memory databases and reported when discovery finds nothing
pub const DEFAULT_TABLE: &str = "items";

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Query execution error: {0}")]
    QueryError(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Timeout error")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DatabaseError {
    /// The bare message without the variant prefix, as surfaced to API callers
    pub fn message(&self) -> String {
        match self {
            DatabaseError::ConnectionFailed(msg)
            | DatabaseError::ConnectionClosed(msg)
            | DatabaseError::QueryError(msg)
            | DatabaseError::InvalidConfig(msg)
            | DatabaseError::Internal(msg) => msg.clone(),
            DatabaseError::Timeout => "Operation timed out".to_string(),
            DatabaseError::IoError(e) => e.to_string(),
        }
    }
}

impl From<duckdb::Error> for DatabaseError {
    fn from(err: duckdb::Error) -> Self {
        DatabaseError::QueryError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DatabaseError {
    fn from(err: tokio::task::JoinError) -> Self {
        DatabaseError::Internal(format!("DuckDB task panicked: {}", err))
    }
}

/// Cell value in a result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(String),
    Binary(Vec<u8>),
}

impl CellValue {
    /// Borrow the value as text when it holds a string
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::String(s) | CellValue::DateTime(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// One result row: column name -> value, in the engine's column order
pub type RowObject = IndexMap<String, CellValue>;

/// A user-visible table as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl TableDescriptor {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "table".to_string(),
        }
    }
}
