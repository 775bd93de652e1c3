// HTTP Error Mapping
// API error type and its JSON response shapes

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::db::UploadError;

/// API error type with automatic HTTP status mapping
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad or missing input (400)
    #[error("{0}")]
    Validation(String),

    /// Query referenced a relation that does not exist (400)
    #[error("Table not found: {message}")]
    TableNotFound {
        message: String,
        target_table: Option<String>,
        available_tables: Vec<String>,
    },

    /// Any other query failure (400)
    #[error("Query error: {message}")]
    Query { message: String },

    /// Uploaded file did not open as a database (400)
    #[error("Invalid DuckDB database file: {details}")]
    InvalidDatabase { details: String },

    /// Unexpected failure (500, logged)
    #[error("{context}: {message}")]
    Internal { context: &'static str, message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Validation(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            Self::TableNotFound {
                message,
                target_table,
                available_tables,
            } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Table not found",
                    "message": message,
                    "targetTable": target_table,
                    "availableTables": available_tables
                }),
            ),
            Self::Query { message } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Query error",
                    "message": message
                }),
            ),
            Self::InvalidDatabase { details } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Invalid DuckDB database file",
                    "details": details
                }),
            ),
            Self::Internal { context, message } => {
                tracing::error!("{}: {}", context, message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": context,
                        "message": message
                    }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::InvalidExtension => Self::Validation(UploadError::InvalidExtension.to_string()),
            UploadError::InvalidDatabase(details) => Self::InvalidDatabase { details },
            UploadError::Io(err) => Self::Internal {
                context: "Upload failed",
                message: err.to_string(),
            },
        }
    }
}
