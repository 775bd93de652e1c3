// Query Execution Engine
// Runs SQL against pooled DuckDB connections, logs executions and enriches failures

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::audit::{append_query_log, backup_history, recent_query_log, BackupRecord, QueryLogRecord};
use super::discovery::{self, fallback_tables};
use super::drivers::duckdb::read_rows;
use super::pool::ConnectionPool;
use super::traits::{DatabaseError, RowObject, TableDescriptor};

const AVAILABLE_TABLES_MARKER: &str = "Available tables: ";

/// Phrases DuckDB (and friends) use when a relation is missing
const MISSING_RELATION_PHRASES: [&str; 4] = ["not exist", "No table", "Unknown relation", "Catalog Error"];

static AVAILABLE_TABLES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Available tables: (.*?)(?:$|\n)").expect("available tables regex"));

static TARGET_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bFROM\s+([^\s;]+)").expect("target table regex"));

/// Query execution engine
pub struct QueryEngine {
    pool: Arc<ConnectionPool>,
    query_timeout: Duration,
}

impl QueryEngine {
    pub fn new(pool: Arc<ConnectionPool>, query_timeout: Duration) -> Self {
        Self { pool, query_timeout }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Execute `sql` against `db_path` (default: the active database).
    ///
    /// Parameters are bound positionally when present. Failures come back as
    /// `QueryError` whose message lists the tables that do exist; a timeout
    /// is returned as-is.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[serde_json::Value],
        db_path: Option<&str>,
    ) -> Result<Vec<RowObject>, DatabaseError> {
        let path = self.pool.resolve(db_path).await;
        let handle = match self.pool.acquire(&path).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("[QUERY] Could not open {}: {}", path, e);
                return Err(DatabaseError::QueryError(format!("Query failed: {}", e.message())));
            }
        };

        info!("[QUERY] Executing on {}", path);
        let started = Instant::now();
        let statement = sql.to_string();
        let bound = params.to_vec();
        let result = match tokio::time::timeout(
            self.query_timeout,
            handle.run(move |conn| read_rows(conn, &statement, &bound)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DatabaseError::Timeout),
        };
        let elapsed_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok(rows) => {
                debug!("[QUERY] {} row(s) in {}ms", rows.len(), elapsed_ms);
                if !path.is_memory() {
                    let record = QueryLogRecord::new(sql, elapsed_ms, rows.len(), Utc::now());
                    if let Err(e) = handle.run(move |conn| append_query_log(conn, &record)).await {
                        warn!("[QUERY] Failed to log query for {}: {}", path, e);
                    }
                }
                Ok(rows)
            }
            Err(DatabaseError::Timeout) => {
                // The engine call is still running and holds the connection
                warn!("[QUERY] Timed out on {} after {}ms", path, elapsed_ms);
                Err(DatabaseError::Timeout)
            }
            Err(e) => {
                let message = e.message();
                warn!("[QUERY] Failed on {}: {}", path, message);
                let tables = discovery::list_tables(&handle).await;
                Err(DatabaseError::QueryError(enrich_error_message(&message, &tables)))
            }
        }
    }

    /// Tables of `db_path`; the default list if the database cannot be opened
    pub async fn list_tables(&self, db_path: Option<&str>) -> Vec<TableDescriptor> {
        let path = self.pool.resolve(db_path).await;
        match self.pool.acquire(&path).await {
            Ok(handle) => discovery::list_tables(&handle).await,
            Err(e) => {
                warn!("[QUERY] Could not open {} for table listing: {}", path, e);
                fallback_tables()
            }
        }
    }

    /// Recent query log and backup history of `db_path`, newest first
    pub async fn history(
        &self,
        db_path: Option<&str>,
        limit: usize,
    ) -> Result<(Vec<QueryLogRecord>, Vec<BackupRecord>), DatabaseError> {
        let path = self.pool.resolve(db_path).await;
        if path.is_memory() {
            return Ok((Vec::new(), Vec::new()));
        }

        let handle = self.pool.acquire(&path).await?;
        handle
            .run(move |conn| Ok((recent_query_log(conn, limit)?, backup_history(conn)?)))
            .await
    }
}

fn enrich_error_message(message: &str, tables: &[TableDescriptor]) -> String {
    if tables.is_empty() {
        return format!("Query failed: {}", message);
    }
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    format!("{} {}{}", message, AVAILABLE_TABLES_MARKER, names.join(", "))
}

/// Table names embedded in an enriched error message
pub fn available_tables_from_message(message: &str) -> Option<Vec<String>> {
    let captures = AVAILABLE_TABLES_RE.captures(message)?;
    let list = captures.get(1)?.as_str().trim();
    if list.is_empty() {
        return None;
    }
    Some(list.split(", ").map(|s| s.trim().to_string()).collect())
}

/// Whether `message` describes a missing table or relation
pub fn is_missing_relation_error(message: &str) -> bool {
    MISSING_RELATION_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}

/// First identifier after `FROM`, if any
pub fn target_table(sql: &str) -> Option<String> {
    TARGET_TABLE_RE
        .captures(sql)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
