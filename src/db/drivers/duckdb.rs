// DuckDB Driver
// Pooled connection handle, blocking-call offloading and row conversion for DuckDB

use crate::db::path::CanonicalPath;
use crate::db::traits::{CellValue, DatabaseError, RowObject};
use ::duckdb::types::{TimeUnit, Value};
use ::duckdb::{params_from_iter, Connection};
use chrono::{DateTime, NaiveDate, NaiveTime};
use std::sync::{Arc, Mutex};

/// A single DuckDB connection owned by the pool.
///
/// The underlying `Connection` is `Send` but not `Sync`, so it sits behind a
/// std mutex and every call runs on the blocking pool. Closing takes the
/// connection out of the slot; clones of the handle that outlive the pool
/// entry then fail with `ConnectionClosed` instead of touching the file.
pub struct DuckDbConnection {
    path: CanonicalPath,
    conn: Mutex<Option<Connection>>,
}

impl DuckDbConnection {
    /// Open a connection (blocking)
    pub fn open(path: &CanonicalPath) -> Result<Self, DatabaseError> {
        let conn = if path.is_memory() {
            Connection::open_in_memory().map_err(|e| {
                DatabaseError::ConnectionFailed(format!("Failed to open DuckDB in-memory: {}", e))
            })?
        } else {
            Connection::open(path.as_path()).map_err(|e| {
                DatabaseError::ConnectionFailed(format!(
                    "Failed to open DuckDB file '{}': {}",
                    path, e
                ))
            })?
        };

        Ok(Self {
            path: path.clone(),
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn path(&self) -> &CanonicalPath {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }

    /// Run `f` against the connection on the current thread (blocking)
    pub fn with_conn<F, R>(&self, f: F) -> Result<R, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<R, DatabaseError>,
    {
        let slot = self
            .conn
            .lock()
            .map_err(|e| DatabaseError::Internal(format!("Failed to lock DuckDB connection: {}", e)))?;
        match slot.as_ref() {
            Some(conn) => f(conn),
            None => Err(DatabaseError::ConnectionClosed(self.path.to_string())),
        }
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn run<F, R>(self: &Arc<Self>, f: F) -> Result<R, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<R, DatabaseError> + Send + 'static,
        R: Send + 'static,
    {
        let handle = Arc::clone(self);
        tokio::task::spawn_blocking(move || handle.with_conn(f)).await?
    }

    /// Disconnect (blocking). Closing an already-closed handle is a no-op.
    pub fn close(&self) -> Result<(), DatabaseError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DatabaseError::Internal(format!("Failed to lock DuckDB connection: {}", e)))?
            .take();

        match conn {
            Some(conn) => conn
                .close()
                .map_err(|(_, e)| DatabaseError::ConnectionFailed(format!("Failed to close {}: {}", self.path, e))),
            None => Ok(()),
        }
    }
}

/// Execute `sql` and collect every row as a column-name -> value map.
///
/// With no parameters the statement runs as-is; otherwise the parameters are
/// bound positionally. Both paths yield the same row shape.
pub fn read_rows(
    conn: &Connection,
    sql: &str,
    params: &[serde_json::Value],
) -> Result<Vec<RowObject>, DatabaseError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

    let bound: Vec<Value> = params.iter().map(json_to_duckdb).collect();
    let mut rows = stmt
        .query(params_from_iter(bound.iter()))
        .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

    // DuckDB only knows the result columns once the statement has executed
    let mut columns: Option<Vec<String>> = None;
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| DatabaseError::QueryError(e.to_string()))?
    {
        let names = columns.get_or_insert_with(|| row.as_ref().column_names());
        let mut object = RowObject::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            let value: Value = row
                .get(idx)
                .map_err(|e| DatabaseError::QueryError(e.to_string()))?;
            object.insert(name.clone(), CellValue::from(value));
        }
        out.push(object);
    }

    Ok(out)
}

/// Convert a JSON request parameter into a bindable DuckDB value
pub fn json_to_duckdb(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::BigInt(i),
            None => Value::Double(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

impl From<Value> for CellValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => CellValue::Null,
            Value::Boolean(b) => CellValue::Bool(b),
            Value::TinyInt(v) => CellValue::Int(v.into()),
            Value::SmallInt(v) => CellValue::Int(v.into()),
            Value::Int(v) => CellValue::Int(v.into()),
            Value::BigInt(v) => CellValue::Int(v),
            Value::HugeInt(v) => i64::try_from(v)
                .map(CellValue::Int)
                .unwrap_or_else(|_| CellValue::String(v.to_string())),
            Value::UTinyInt(v) => CellValue::Int(v.into()),
            Value::USmallInt(v) => CellValue::Int(v.into()),
            Value::UInt(v) => CellValue::Int(v.into()),
            Value::UBigInt(v) => i64::try_from(v)
                .map(CellValue::Int)
                .unwrap_or_else(|_| CellValue::String(v.to_string())),
            Value::Float(v) => CellValue::Float(v.into()),
            Value::Double(v) => CellValue::Float(v),
            Value::Decimal(d) => CellValue::String(d.to_string()),
            Value::Text(s) => CellValue::String(s),
            Value::Enum(s) => CellValue::String(s),
            Value::Blob(b) => CellValue::Binary(b),
            Value::Timestamp(unit, v) => format_timestamp(to_micros(unit, v))
                .map(CellValue::DateTime)
                .unwrap_or(CellValue::Int(v)),
            Value::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                .map(|d| CellValue::DateTime(d.to_string()))
                .unwrap_or(CellValue::Int(days.into())),
            Value::Time64(unit, v) => {
                let micros = to_micros(unit, v);
                NaiveTime::from_num_seconds_from_midnight_opt(
                    (micros / 1_000_000) as u32,
                    ((micros % 1_000_000) * 1_000) as u32,
                )
                .map(|t| CellValue::DateTime(t.to_string()))
                .unwrap_or(CellValue::Int(v))
            }
            other => CellValue::String(format!("{:?}", other)),
        }
    }
}

/// Days between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

fn format_timestamp(micros: i64) -> Option<String> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory_handle() -> DuckDbConnection {
        DuckDbConnection::open(&CanonicalPath::memory()).unwrap()
    }

    #[test]
    fn test_read_rows_with_and_without_params_share_shape() {
        let handle = memory_handle();
        handle
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TABLE t (id INTEGER, label VARCHAR);
                     INSERT INTO t VALUES (1, 'one'), (2, 'two');",
                )?;
                Ok(())
            })
            .unwrap();

        let direct = handle
            .with_conn(|conn| read_rows(conn, "SELECT id, label FROM t WHERE id = 2", &[]))
            .unwrap();
        let bound = handle
            .with_conn(|conn| read_rows(conn, "SELECT id, label FROM t WHERE id = ?", &[json!(2)]))
            .unwrap();

        assert_eq!(direct, bound);
        assert_eq!(direct.len(), 1);
        let keys: Vec<&String> = direct[0].keys().collect();
        assert_eq!(keys, vec!["id", "label"]);
        assert_eq!(direct[0]["label"], CellValue::String("two".to_string()));
    }

    #[test]
    fn test_empty_result_has_no_rows() {
        let handle = memory_handle();
        let rows = handle
            .with_conn(|conn| read_rows(conn, "SELECT 1 AS x WHERE 1 = 0", &[]))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_value_conversion() {
        let handle = memory_handle();
        let rows = handle
            .with_conn(|conn| {
                read_rows(
                    conn,
                    "SELECT NULL AS n, true AS b, 3.5::DOUBLE AS f, DATE '2024-02-29' AS d, \
                     TIMESTAMP '2024-01-02 03:04:05' AS ts",
                    &[],
                )
            })
            .unwrap();

        let row = &rows[0];
        assert_eq!(row["n"], CellValue::Null);
        assert_eq!(row["b"], CellValue::Bool(true));
        assert_eq!(row["f"], CellValue::Float(3.5));
        assert_eq!(row["d"], CellValue::DateTime("2024-02-29".to_string()));
        assert_eq!(row["ts"], CellValue::DateTime("2024-01-02 03:04:05".to_string()));
    }

    #[test]
    fn test_syntax_error_is_query_error() {
        let handle = memory_handle();
        let err = handle
            .with_conn(|conn| read_rows(conn, "SELEC nonsense", &[]))
            .unwrap_err();
        assert!(matches!(err, DatabaseError::QueryError(_)));
    }

    #[test]
    fn test_closed_handle_rejects_calls() {
        let handle = memory_handle();
        handle.close().unwrap();
        assert!(handle.is_closed());
        let err = handle.with_conn(|_| Ok(())).unwrap_err();
        assert!(matches!(err, DatabaseError::ConnectionClosed(_)));
        // Second close is a no-op
        handle.close().unwrap();
    }

    #[test]
    fn test_json_params() {
        assert_eq!(json_to_duckdb(&json!(7)), Value::BigInt(7));
        assert_eq!(json_to_duckdb(&json!("x")), Value::Text("x".to_string()));
        assert_eq!(json_to_duckdb(&json!(null)), Value::Null);
        assert_eq!(json_to_duckdb(&json!(1.5)), Value::Double(1.5));
    }
}
