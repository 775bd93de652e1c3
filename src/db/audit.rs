// Audit Tables
// Query log and backup history kept inside each file-backed database

use chrono::{DateTime, Utc};
use duckdb::{params, Connection};
use serde::{Deserialize, Serialize};

use super::traits::DatabaseError;

/// Prefix shared by internal tables; never shown to users
pub const AUDIT_TABLE_PREFIX: &str = "_meta_";
pub const BACKUP_HISTORY_TABLE: &str = "_meta_backup_history";
pub const QUERY_LOG_TABLE: &str = "_meta_query_log";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// True for internal tables, with or without a schema qualifier
pub fn is_audit_table(name: &str) -> bool {
    let bare = name.rsplit('.').next().unwrap_or(name);
    bare.starts_with(AUDIT_TABLE_PREFIX)
}

/// A single executed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLogRecord {
    pub timestamp: String,
    pub query: String,
    pub execution_time_ms: i64,
    pub row_count: i64,
}

impl QueryLogRecord {
    pub fn new(query: &str, execution_time_ms: i64, row_count: usize, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            query: query.to_string(),
            execution_time_ms,
            row_count: row_count as i64,
        }
    }
}

/// A completed backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub timestamp: String,
    pub backup_path: String,
    pub size_bytes: i64,
    pub status: String,
}

impl BackupRecord {
    pub fn completed(backup_path: &str, size_bytes: u64, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            backup_path: backup_path.to_string(),
            size_bytes: i64::try_from(size_bytes).unwrap_or(i64::MAX),
            status: "completed".to_string(),
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Create both audit tables if they do not exist yet
pub fn ensure_audit_tables(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        r#"CREATE SEQUENCE IF NOT EXISTS _meta_backup_history_seq;
         CREATE TABLE IF NOT EXISTS _meta_backup_history (
             id INTEGER PRIMARY KEY DEFAULT nextval('_meta_backup_history_seq'),
             "timestamp" TIMESTAMP NOT NULL,
             backup_path VARCHAR NOT NULL,
             backup_size_bytes BIGINT,
             status VARCHAR
         );
         CREATE SEQUENCE IF NOT EXISTS _meta_query_log_seq;
         CREATE TABLE IF NOT EXISTS _meta_query_log (
             id INTEGER PRIMARY KEY DEFAULT nextval('_meta_query_log_seq'),
             "timestamp" TIMESTAMP NOT NULL,
             query VARCHAR NOT NULL,
             execution_time_ms BIGINT,
             row_count BIGINT
         );"#,
    )
    .map_err(|e| DatabaseError::QueryError(format!("Failed to create audit tables: {}", e)))
}

// ============================================================================
// Writers
// ============================================================================

pub fn append_query_log(conn: &Connection, record: &QueryLogRecord) -> Result<(), DatabaseError> {
    ensure_audit_tables(conn)?;
    conn.execute(
        r#"INSERT INTO _meta_query_log ("timestamp", query, execution_time_ms, row_count)
         VALUES (CAST(? AS TIMESTAMP), ?, ?, ?)"#,
        params![
            record.timestamp,
            record.query,
            record.execution_time_ms,
            record.row_count
        ],
    )?;
    Ok(())
}

pub fn append_backup_record(conn: &Connection, record: &BackupRecord) -> Result<(), DatabaseError> {
    ensure_audit_tables(conn)?;
    conn.execute(
        r#"INSERT INTO _meta_backup_history ("timestamp", backup_path, backup_size_bytes, status)
         VALUES (CAST(? AS TIMESTAMP), ?, ?, ?)"#,
        params![
            record.timestamp,
            record.backup_path,
            record.size_bytes,
            record.status
        ],
    )?;
    Ok(())
}

// ============================================================================
// Readers
// ============================================================================

/// Most recent query log rows, newest first
pub fn recent_query_log(conn: &Connection, limit: usize) -> Result<Vec<QueryLogRecord>, DatabaseError> {
    ensure_audit_tables(conn)?;
    let mut stmt = conn.prepare(
        r#"SELECT CAST("timestamp" AS VARCHAR), query, execution_time_ms, row_count
         FROM _meta_query_log
         ORDER BY "timestamp" DESC, id DESC
         LIMIT ?"#,
    )?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(params![limit], |row| {
        Ok(QueryLogRecord {
            timestamp: row.get(0)?,
            query: row.get(1)?,
            execution_time_ms: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
            row_count: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
        })
    })?;

    let mut records = Vec::new();
    for record in rows {
        records.push(record?);
    }
    Ok(records)
}

/// Every backup recorded for this database, newest first
pub fn backup_history(conn: &Connection) -> Result<Vec<BackupRecord>, DatabaseError> {
    ensure_audit_tables(conn)?;
    let mut stmt = conn.prepare(
        r#"SELECT CAST("timestamp" AS VARCHAR), backup_path, backup_size_bytes, status
         FROM _meta_backup_history
         ORDER BY "timestamp" DESC, id DESC"#,
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(BackupRecord {
            timestamp: row.get(0)?,
            backup_path: row.get(1)?,
            size_bytes: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
            status: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        })
    })?;

    let mut records = Vec::new();
    for record in rows {
        records.push(record?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_is_audit_table() {
        assert!(is_audit_table("_meta_query_log"));
        assert!(is_audit_table("main._meta_backup_history"));
        assert!(!is_audit_table("items"));
        assert!(!is_audit_table("sales.orders"));
    }

    #[test]
    fn test_ensure_audit_tables_is_idempotent() {
        let conn = conn();
        ensure_audit_tables(&conn).unwrap();
        ensure_audit_tables(&conn).unwrap();

        for table in [BACKUP_HISTORY_TABLE, QUERY_LOG_TABLE] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn test_query_log_round_trip_newest_first() {
        let conn = conn();
        let first = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();

        append_query_log(&conn, &QueryLogRecord::new("SELECT 1", 3, 1, first)).unwrap();
        append_query_log(&conn, &QueryLogRecord::new("SELECT 2", 4, 7, second)).unwrap();

        let log = recent_query_log(&conn, 10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].query, "SELECT 2");
        assert_eq!(log[0].row_count, 7);
        assert!(log[0].timestamp.starts_with("2024-05-01 11:00:00"));

        let limited = recent_query_log(&conn, 1).unwrap();
        assert_eq!(limited.len(), 1);

        let unbounded = recent_query_log(&conn, usize::MAX).unwrap();
        assert_eq!(unbounded.len(), 2);
    }

    #[test]
    fn test_backup_history_round_trip() {
        let conn = conn();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        append_backup_record(&conn, &BackupRecord::completed("/data/meta/x.duckdb", 4096, at)).unwrap();

        let history = backup_history(&conn).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].backup_path, "/data/meta/x.duckdb");
        assert_eq!(history[0].size_bytes, 4096);
        assert_eq!(history[0].status, "completed");
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let json = serde_json::to_value(QueryLogRecord::new("SELECT 1", 2, 3, at)).unwrap();
        assert_eq!(json["executionTimeMs"], 2);
        assert_eq!(json["rowCount"], 3);
    }
}
