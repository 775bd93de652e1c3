// Table Discovery
// Ordered catalog strategies that enumerate user tables across engine dialects

use std::sync::Arc;
use tracing::debug;

use super::audit::is_audit_table;
use super::drivers::duckdb::{read_rows, DuckDbConnection};
use super::traits::{CellValue, DatabaseError, RowObject, TableDescriptor, DEFAULT_TABLE};

/// Anything that can run a SQL string and hand back row objects
pub trait Introspect {
    fn query_rows(&self, sql: &str) -> Result<Vec<RowObject>, DatabaseError>;
}

impl Introspect for duckdb::Connection {
    fn query_rows(&self, sql: &str) -> Result<Vec<RowObject>, DatabaseError> {
        read_rows(self, sql, &[])
    }
}

type Strategy = fn(&dyn Introspect) -> Result<Vec<TableDescriptor>, DatabaseError>;

/// Tried in order; the first non-empty result wins
static STRATEGIES: &[(&str, Strategy)] = &[
    ("sqlite_master", from_sqlite_master),
    ("information_schema", from_information_schema),
    ("show_tables", from_show_tables),
    ("schema_walk", from_schema_walk),
];

/// Result used when every strategy fails or finds nothing
pub fn fallback_tables() -> Vec<TableDescriptor> {
    vec![TableDescriptor::table(DEFAULT_TABLE)]
}

/// Enumerate user tables. Never fails; audit tables are always hidden.
pub fn discover_tables(source: &dyn Introspect) -> Vec<TableDescriptor> {
    for (label, strategy) in STRATEGIES {
        match strategy(source) {
            Ok(tables) => {
                let tables: Vec<_> = tables
                    .into_iter()
                    .filter(|t| !is_audit_table(&t.name))
                    .collect();
                if !tables.is_empty() {
                    debug!("[Discovery] {} found {} table(s)", label, tables.len());
                    return tables;
                }
            }
            Err(e) => debug!("[Discovery] {} failed: {}", label, e),
        }
    }

    fallback_tables()
}

/// Discovery against a pooled connection, run on the blocking pool
pub async fn list_tables(handle: &Arc<DuckDbConnection>) -> Vec<TableDescriptor> {
    match handle.run(|conn| Ok(discover_tables(conn))).await {
        Ok(tables) => tables,
        Err(e) => {
            debug!("[Discovery] Connection unusable: {}", e);
            fallback_tables()
        }
    }
}

// ============================================================================
// Strategies
// ============================================================================

fn from_sqlite_master(source: &dyn Introspect) -> Result<Vec<TableDescriptor>, DatabaseError> {
    let rows = source.query_rows(
        "SELECT name, type FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;
    Ok(table_names(&rows))
}

fn from_information_schema(source: &dyn Introspect) -> Result<Vec<TableDescriptor>, DatabaseError> {
    let rows = source.query_rows(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema NOT IN ('pg_catalog', 'information_schema')",
    )?;
    Ok(table_names(&rows))
}

fn from_show_tables(source: &dyn Introspect) -> Result<Vec<TableDescriptor>, DatabaseError> {
    let rows = source.query_rows("SHOW TABLES")?;
    Ok(table_names(&rows))
}

fn from_schema_walk(source: &dyn Introspect) -> Result<Vec<TableDescriptor>, DatabaseError> {
    let schemas = source.query_rows("SHOW SCHEMAS")?;
    let mut tables = Vec::new();

    for schema in schemas.iter().filter_map(|row| text_field(row, &["name", "schema_name"])) {
        if schema == "information_schema" || schema == "pg_catalog" {
            continue;
        }
        let sql = format!("SHOW TABLES IN {}", quote_identifier(schema));
        match source.query_rows(&sql) {
            Ok(rows) => tables.extend(
                table_names(&rows)
                    .into_iter()
                    .map(|t| TableDescriptor::table(format!("{}.{}", schema, t.name))),
            ),
            Err(e) => debug!("[Discovery] Skipping schema {}: {}", schema, e),
        }
    }

    Ok(tables)
}

fn table_names(rows: &[RowObject]) -> Vec<TableDescriptor> {
    rows.iter()
        .filter_map(|row| text_field(row, &["name", "table_name"]))
        .map(TableDescriptor::table)
        .collect()
}

fn text_field<'a>(row: &'a RowObject, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| row.get(*key))
        .find_map(CellValue::as_text)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::audit::ensure_audit_tables;
    use duckdb::Connection;

    fn row(pairs: &[(&str, &str)]) -> RowObject {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), CellValue::String(v.to_string())))
            .collect()
    }

    /// Canned responses keyed by SQL prefix; anything else errors
    struct Scripted(Vec<(&'static str, Vec<RowObject>)>);

    impl Introspect for Scripted {
        fn query_rows(&self, sql: &str) -> Result<Vec<RowObject>, DatabaseError> {
            self.0
                .iter()
                .find(|(prefix, _)| sql.starts_with(prefix))
                .map(|(_, rows)| rows.clone())
                .ok_or_else(|| DatabaseError::QueryError(format!("Catalog Error: {}", sql)))
        }
    }

    #[test]
    fn test_duckdb_with_only_items() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE items (id INTEGER, name VARCHAR, value INTEGER)")
            .unwrap();
        assert_eq!(discover_tables(&conn), vec![TableDescriptor::table("items")]);
    }

    #[test]
    fn test_audit_tables_are_hidden() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_audit_tables(&conn).unwrap();
        conn.execute_batch("CREATE TABLE orders (id INTEGER)").unwrap();
        assert_eq!(discover_tables(&conn), vec![TableDescriptor::table("orders")]);
    }

    #[test]
    fn test_only_audit_tables_falls_back() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_audit_tables(&conn).unwrap();
        assert_eq!(discover_tables(&conn), fallback_tables());
    }

    #[test]
    fn test_nothing_works_falls_back() {
        let broken = Scripted(vec![]);
        assert_eq!(discover_tables(&broken), vec![TableDescriptor::table("items")]);
    }

    #[test]
    fn test_show_tables_used_when_catalogs_fail() {
        let source = Scripted(vec![("SHOW TABLES", vec![row(&[("name", "events")])])]);
        assert_eq!(discover_tables(&source), vec![TableDescriptor::table("events")]);
    }

    #[test]
    fn test_schema_walk_qualifies_names() {
        let source = Scripted(vec![
            ("SHOW TABLES IN \"sales\"", vec![row(&[("name", "orders")])]),
            ("SHOW SCHEMAS", vec![
                row(&[("schema_name", "information_schema")]),
                row(&[("schema_name", "sales")]),
                row(&[("schema_name", "broken")]),
            ]),
        ]);
        assert_eq!(discover_tables(&source), vec![TableDescriptor::table("sales.orders")]);
    }
}
