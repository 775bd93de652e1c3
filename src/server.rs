// HTTP Server
// Router construction, middleware stack and the serve loop with graceful shutdown

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::commands::{self, AppState};
use crate::config::ExplorerConfig;
use crate::db::spawn_idle_reaper;

/// Server command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "duckdb-explorer", about = "Browse, query and back up DuckDB files over HTTP")]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    pub port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Directory holding database files (default: $DB_DATA_DIR or ./data)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Maximum number of pooled connections
    #[arg(long, default_value = "10")]
    pub max_pool_size: usize,

    /// Close connections idle for this many seconds
    #[arg(long, default_value = "900")]
    pub idle_timeout: u64,

    /// Keep connections to previously active databases open when switching
    #[arg(long)]
    pub keep_inactive: bool,

    /// Query timeout in seconds
    #[arg(long, default_value = "300")]
    pub query_timeout: u64,

    /// Serve a pre-built UI from this directory
    #[arg(long)]
    pub static_dir: Option<PathBuf>,
}

impl ServerArgs {
    pub fn into_config(self) -> ExplorerConfig {
        let mut config = match self.data_dir {
            Some(dir) => ExplorerConfig::with_data_dir(dir),
            None => ExplorerConfig::default(),
        };
        config.host = self.bind;
        config.port = self.port;
        config.max_pool_size = self.max_pool_size;
        config.idle_timeout = std::time::Duration::from_secs(self.idle_timeout);
        config.exclusive_active_database = !self.keep_inactive;
        config.query_timeout = std::time::Duration::from_secs(self.query_timeout);
        config.static_dir = self.static_dir;
        config
    }
}

/// Run the server until Ctrl+C / SIGTERM
pub async fn run_server(config: ExplorerConfig) -> anyhow::Result<()> {
    config
        .prepare_data_dir()
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    let state = AppState::new(&config);
    let reaper = spawn_idle_reaper(Arc::clone(&state.pool));
    let app = create_router(state.clone(), config.static_dir.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;

    info!("Starting duckdb-explorer on http://{}", addr);
    info!("Data directory: {}", config.data_dir.display());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    state.pool.close_all().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Create the Axum router with all routes
pub fn create_router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Multipart framing needs a little headroom over the file itself
    let upload_limit = state.max_upload_bytes.saturating_add(1024 * 1024);

    let api = Router::new()
        .route("/query", post(commands::execute_query))
        .route("/tables", get(commands::list_tables))
        .route("/info", get(commands::database_info))
        .route("/open", post(commands::open_database))
        .route("/close", post(commands::close_database))
        .route("/backup", post(commands::create_backup))
        .route(
            "/upload",
            post(commands::upload_database).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/history", get(commands::query_history))
        .route("/health", get(commands::health));

    let router = Router::new().nest("/api/db", api).with_state(state);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(middleware)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir) -> (AppState, Router) {
        let state = AppState::new(&ExplorerConfig::with_data_dir(dir.path()));
        let router = create_router(state.clone(), None);
        (state, router)
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn multipart(filename: &str, content: &[u8]) -> Request<Body> {
        let boundary = "XBOUNDARYX";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/db/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = TempDir::new().unwrap();
        let (_, router) = app(&dir);

        let (status, body) = send(&router, get("/api/db/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_query_requires_sql() {
        let dir = TempDir::new().unwrap();
        let (_, router) = app(&dir);

        let (status, body) = send(&router, post_json("/api/db/query", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "SQL query is required" }));
    }

    #[tokio::test]
    async fn test_query_memory_items() {
        let dir = TempDir::new().unwrap();
        let (_, router) = app(&dir);

        let (status, body) = send(
            &router,
            post_json(
                "/api/db/query",
                json!({ "sql": "SELECT id, name FROM items ORDER BY id LIMIT 2", "dbPath": ":memory:" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "results": [{ "id": 1, "name": "Alpha" }, { "id": 2, "name": "Bravo" }] })
        );
    }

    #[tokio::test]
    async fn test_query_missing_table() {
        let dir = TempDir::new().unwrap();
        let (_, router) = app(&dir);

        let (status, body) = send(
            &router,
            post_json("/api/db/query", json!({ "sql": "SELECT * FROM missing_table" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Table not found");
        assert_eq!(body["targetTable"], "missing_table");
        assert_eq!(body["availableTables"], json!(["items"]));
    }

    #[tokio::test]
    async fn test_query_syntax_error() {
        let dir = TempDir::new().unwrap();
        let (_, router) = app(&dir);

        let (status, body) = send(&router, post_json("/api/db/query", json!({ "sql": "SELEC 1" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Query error");
    }

    #[tokio::test]
    async fn test_open_info_tables_close() {
        let dir = TempDir::new().unwrap();
        let (_, router) = app(&dir);

        let (status, body) = send(&router, get("/api/db/info")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "connected": false, "path": ":memory:" }));

        let (status, body) = send(&router, post_json("/api/db/open", json!({ "filename": "web.duckdb" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["isNew"], true);
        assert_eq!(body["tableCount"], 1);

        send(
            &router,
            post_json("/api/db/query", json!({ "sql": "CREATE TABLE visits (id INTEGER)" })),
        )
        .await;
        let (status, body) = send(&router, get("/api/db/tables?dbPath=web.duckdb")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "tables": [{ "name": "visits", "type": "table" }] }));

        let (_, body) = send(&router, get("/api/db/info")).await;
        assert_eq!(body["connected"], true);
        assert!(body["path"].as_str().unwrap().ends_with("web.duckdb"));

        let (status, body) = send(&router, post_json("/api/db/close", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let (_, body) = send(&router, get("/api/db/info")).await;
        assert_eq!(body["connected"], false);
    }

    #[tokio::test]
    async fn test_open_requires_filename() {
        let dir = TempDir::new().unwrap();
        let (_, router) = app(&dir);

        let (status, body) = send(&router, post_json("/api/db/open", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Filename is required" }));
    }

    #[tokio::test]
    async fn test_backup_routes() {
        let dir = TempDir::new().unwrap();
        let (_, router) = app(&dir);

        let (status, body) = send(&router, post_json("/api/db/backup", json!({ "filename": ":memory:" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        send(&router, post_json("/api/db/open", json!({ "filename": "keep.duckdb" }))).await;
        let (status, body) = send(&router, post_json("/api/db/backup", json!({ "filename": "keep.duckdb" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["path"].as_str().unwrap().contains("keep_backup_"));

        let (status, body) = send(&router, get("/api/db/history?dbPath=keep.duckdb")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["backups"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let dir = TempDir::new().unwrap();
        let (_, router) = app(&dir);

        let (status, body) = send(&router, multipart("notes.txt", b"hello")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Only .duckdb or .db files are allowed");

        let (status, body) = send(&router, multipart("fake.duckdb", b"not a database")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid DuckDB database file");
        assert!(!dir.path().join("fake.duckdb").exists());
    }

    #[tokio::test]
    async fn test_wrong_method_is_405() {
        let dir = TempDir::new().unwrap();
        let (_, router) = app(&dir);

        let (status, _) = send(&router, get("/api/db/query")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_args_into_config() {
        let args = ServerArgs::parse_from([
            "duckdb-explorer",
            "--port",
            "8080",
            "--data-dir",
            "/tmp/dbs",
            "--keep-inactive",
        ]);
        let config = args.into_config();
        assert_eq!(config.port, 8080);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/dbs"));
        assert!(!config.exclusive_active_database);
        assert_eq!(config.idle_timeout, std::time::Duration::from_secs(900));
    }
}
