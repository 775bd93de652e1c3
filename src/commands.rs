// HTTP Command Handlers
// Request/response marshaling between the web UI and the connection lifecycle manager

use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::config::ExplorerConfig;
use crate::db::management;
use crate::db::query::{available_tables_from_message, is_missing_relation_error, target_table};
use crate::db::{
    BackupOutcome, BackupRecord, BackupService, ConnectionPool, DatabaseInfo, OpenOutcome,
    QueryEngine, QueryLogRecord, RowObject, TableDescriptor, DEFAULT_TABLE,
};
use crate::error::ApiError;

/// Default number of query log rows returned by the history route
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ConnectionPool>,
    pub query_engine: Arc<QueryEngine>,
    pub backups: Arc<BackupService>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(config: &ExplorerConfig) -> Self {
        let pool = Arc::new(ConnectionPool::new(config.pool_settings()));
        Self {
            query_engine: Arc::new(QueryEngine::new(Arc::clone(&pool), config.query_timeout)),
            backups: Arc::new(BackupService::new(Arc::clone(&pool))),
            pool,
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub sql: Option<String>,
    pub db_path: Option<String>,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub results: Vec<RowObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbPathQuery {
    pub db_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TablesResponse {
    pub tables: Vec<TableDescriptor>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilenameRequest {
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub db_path: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub queries: Vec<QueryLogRecord>,
    pub backups: Vec<BackupRecord>,
}

fn required_filename(body: &FilenameRequest) -> Result<&str, ApiError> {
    body.filename
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::Validation("Filename is required".to_string()))
}

// ============================================================================
// Query Commands
// ============================================================================

/// POST /api/db/query
pub async fn execute_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let sql = request
        .sql
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::Validation("SQL query is required".to_string()))?;
    let db_path = request.db_path.as_deref();

    match state.query_engine.execute(sql, &request.params, db_path).await {
        Ok(results) => Ok(Json(QueryResponse { results })),
        Err(e) => {
            let message = e.message();
            if !is_missing_relation_error(&message) {
                return Err(ApiError::Query { message });
            }

            let available_tables = match available_tables_from_message(&message) {
                Some(tables) => tables,
                None => {
                    let discovered: Vec<String> = state
                        .query_engine
                        .list_tables(db_path)
                        .await
                        .into_iter()
                        .map(|t| t.name)
                        .collect();
                    if discovered.is_empty() {
                        vec![DEFAULT_TABLE.to_string()]
                    } else {
                        discovered
                    }
                }
            };

            Err(ApiError::TableNotFound {
                message,
                target_table: target_table(sql),
                available_tables,
            })
        }
    }
}

/// GET /api/db/tables
pub async fn list_tables(
    State(state): State<AppState>,
    Query(query): Query<DbPathQuery>,
) -> Json<TablesResponse> {
    let tables = state.query_engine.list_tables(query.db_path.as_deref()).await;
    Json(TablesResponse { tables })
}

/// GET /api/db/history
pub async fn query_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let (queries, backups) = state
        .query_engine
        .history(query.db_path.as_deref(), limit)
        .await
        .map_err(|e| ApiError::Query { message: e.message() })?;
    Ok(Json(HistoryResponse { queries, backups }))
}

// ============================================================================
// Database Management Commands
// ============================================================================

/// GET /api/db/info
pub async fn database_info(State(state): State<AppState>) -> Json<DatabaseInfo> {
    Json(management::database_info(&state.pool).await)
}

/// POST /api/db/open
pub async fn open_database(
    State(state): State<AppState>,
    Json(body): Json<FilenameRequest>,
) -> Result<Json<OpenOutcome>, ApiError> {
    let filename = required_filename(&body)?;
    Ok(Json(management::open_database(&state.pool, filename).await))
}

/// POST /api/db/close
pub async fn close_database(
    State(state): State<AppState>,
    Json(body): Json<FilenameRequest>,
) -> Json<Value> {
    let filename = body.filename.as_deref().filter(|f| !f.trim().is_empty());
    let success = management::close_database(&state.pool, filename).await;
    Json(json!({ "success": success }))
}

/// POST /api/db/backup
pub async fn create_backup(
    State(state): State<AppState>,
    Json(body): Json<FilenameRequest>,
) -> Result<(StatusCode, Json<BackupOutcome>), ApiError> {
    let filename = required_filename(&body)?;
    let outcome = state.backups.backup(filename).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(outcome)))
}

/// POST /api/db/upload (multipart field `file`)
pub async fn upload_database(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Upload failed: {}", e.body_text())))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("Upload failed: {}", e.body_text())))?;

        if bytes.len() > state.max_upload_bytes {
            return Err(ApiError::Validation(format!(
                "File exceeds the {} byte upload limit",
                state.max_upload_bytes
            )));
        }

        info!("[Upload] Received {} ({} bytes)", original_name, bytes.len());
        let outcome = management::import_upload(&state.pool, &original_name, &bytes).await?;
        return Ok(Json(outcome));
    }

    Err(ApiError::Validation("No file uploaded".to_string()))
}

/// GET /api/db/health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
